use serde::{Deserialize, Serialize};

use crate::core::dice::DicePlan;

/// How a table selects a row when rolled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableKind {
    /// Uniform selection over the entries.
    Flat,
    /// Selection driven by the table's declared dice expression, with each
    /// entry claiming an interval of possible roll values.
    Range,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Range => "range",
        }
    }
}

/// The header of a table declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    pub kind: TableKind,
    /// Dice expression driving ranged selection. Present iff `kind` is
    /// `Range` (a spurious one on a flat table is dropped with a warning).
    pub roll: Option<String>,
    pub note: String,
    /// Lower-cased, deduplicated, sorted.
    pub tags: Vec<String>,
}

/// A sub-table declared inside a parent table. Promoted to a first-class
/// catalog entry named `parent.id` at ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTable {
    pub id: u32,
    pub full_name: String,
    pub entries: Vec<String>,
}

/// One row of a ranged table: `text` is returned for any roll in
/// `low..=high`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangedRow {
    pub low: i64,
    pub high: i64,
    pub text: String,
}

/// A validated table entry. Built by the validator, owned by the catalog,
/// replaced wholesale on re-ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub definition: Definition,
    /// Entry bodies as declared. For ranged tables these still carry their
    /// leading `{lo-hi}`/`{v}` interval expression.
    pub raw_entries: Vec<String>,
    /// Parsed rows, populated only for `TableKind::Range`.
    pub ranged_entries: Vec<RangedRow>,
    pub sub_tables: Vec<SubTable>,
    /// True for the synthetic entries promoted from `sub_tables`. Inline
    /// entries are stored in the catalog but hidden from search and listing.
    pub is_inline: bool,
    /// Pre-resolved sampling plan: the declared roll for ranged tables, a
    /// uniform one-die plan over the entry count otherwise.
    pub parsed_dice: DicePlan,
}
