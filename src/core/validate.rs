//! Declarative table parsing and validation.
//!
//! The textual format is RON mirroring the table data model: a `definition`
//! header, a `content` list, and an optional `inline` list of sub-tables.
//! The front-end deserializes into loose intermediate structs (kinds and
//! sub-table ids arrive as strings) so that semantic problems become
//! diagnostics in a [`ValidationReport`] rather than serde errors; only a
//! blob that is not RON at all is a hard error.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::FxHashSet;
use serde::Deserialize;

use crate::core::dice::DicePlan;
use crate::core::refs::{self, TableRef};
use crate::schema::table::{Definition, RangedRow, SubTable, Table, TableKind};

const SECTION_DEFINITION: &str = "Definition";
const SECTION_CONTENT: &str = "Content";
const SECTION_INLINE: &str = "Inline";

static RANGE_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{([0-9]+)-([0-9]+)\}(.*)$").expect("range row pattern"));
static FIXED_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{([0-9]+)\}(.*)$").expect("fixed row pattern"));

/// Errors block storage; warnings are advisory and never block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn fail(&mut self, section: &str, reason: impl fmt::Display) {
        self.errors.push(format!("{section}: {reason}"));
    }

    pub fn warn(&mut self, section: &str, reason: impl fmt::Display) {
        self.warnings.push(format!("{section}: {reason}"));
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn warn_count(&self) -> usize {
        self.warnings.len()
    }

    pub fn issue_count(&self) -> usize {
        self.errors.len() + self.warnings.len()
    }
}

// Intermediate deserialization targets. The RON shape uses loose string
// fields so bad kinds and ids surface as diagnostics, not parse errors.

#[derive(Debug, Deserialize)]
struct RawTable {
    definition: RawDefinition,
    #[serde(default)]
    content: Vec<String>,
    #[serde(default)]
    inline: Vec<RawSubTable>,
}

#[derive(Debug, Deserialize)]
struct RawDefinition {
    #[serde(default)]
    name: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    roll: String,
    #[serde(default)]
    note: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawSubTable {
    #[serde(default)]
    id: String,
    #[serde(default)]
    content: Vec<String>,
}

/// Parse and validate a declaration blob.
///
/// Returns the report plus the validated table when the report carries no
/// errors. A blob that does not deserialize at all is a hard `Err`.
pub fn validate_blob(
    blob: &str,
) -> Result<(ValidationReport, Option<Table>), ron::error::SpannedError> {
    let raw: RawTable = ron::from_str(blob)?;
    let mut report = ValidationReport::default();

    // Header.
    let name = raw.definition.name.clone();
    if !refs::is_valid_identifier(&name) {
        report.fail(
            SECTION_DEFINITION,
            format!("invalid table name: {name:?}"),
        );
    }
    let kind = match raw.definition.kind.as_str() {
        "flat" => Some(TableKind::Flat),
        "range" => Some(TableKind::Range),
        other => {
            report.fail(SECTION_DEFINITION, format!("unknown table kind: {other:?}"));
            None
        }
    };
    match kind {
        Some(TableKind::Flat) if !raw.definition.roll.is_empty() => {
            report.warn(
                SECTION_DEFINITION,
                "roll defined but not used for flat tables",
            );
        }
        Some(TableKind::Range) if raw.definition.roll.is_empty() => {
            report.fail(SECTION_DEFINITION, "roll must be defined for range tables");
        }
        _ => {}
    }
    let tags = normalize_tags(&raw.definition.tags);

    // Dice.
    let mut declared_plan = None;
    if !raw.definition.roll.is_empty() {
        match DicePlan::parse(&raw.definition.roll) {
            Ok(plan) => declared_plan = Some(plan),
            Err(e) => report.fail(SECTION_DEFINITION, e),
        }
    }

    // Sub-tables.
    let mut sub_tables = Vec::with_capacity(raw.inline.len());
    let mut declared_ids = FxHashSet::default();
    for raw_sub in &raw.inline {
        let id = match raw_sub.id.trim().parse::<u32>() {
            Ok(id) if id >= 1 => id,
            _ => {
                report.fail(
                    SECTION_INLINE,
                    format!("invalid sub-table id: {:?}", raw_sub.id),
                );
                continue;
            }
        };
        if !declared_ids.insert(id) {
            report.fail(SECTION_INLINE, format!("sub-table id {id} defined twice"));
        }
        if raw_sub.content.is_empty() {
            report.fail(SECTION_INLINE, format!("sub-table {id} has no content"));
        }
        sub_tables.push(SubTable {
            id,
            full_name: refs::full_name(&name, id),
            entries: raw_sub.content.clone(),
        });
    }

    if raw.content.is_empty() {
        report.fail(SECTION_CONTENT, "a table must have content");
    }

    // Ranged entries. Parsed before any body inspection so the leading
    // interval expressions are not mistaken for references.
    let mut ranged_entries = Vec::new();
    if kind == Some(TableKind::Range) {
        ranged_entries = parse_ranged_entries(&raw.content, &mut report);
    }

    let Some(kind) = kind else {
        return Ok((report, None));
    };

    // Placeholder balance, then shape. The shape pass runs only on a
    // report that is still clean, mirroring the brace pass gating: a body
    // with unbalanced braces yields one structural diagnostic, not a
    // cascade of bogus reference errors.
    let bodies: Vec<&str> = match kind {
        TableKind::Flat => raw.content.iter().map(String::as_str).collect(),
        TableKind::Range => ranged_entries.iter().map(|r| r.text.as_str()).collect(),
    };
    for body in &bodies {
        check_brace_balance(body, SECTION_CONTENT, &mut report);
    }
    for sub in &sub_tables {
        for body in &sub.entries {
            check_brace_balance(body, SECTION_INLINE, &mut report);
        }
    }

    let shapes_checkable = report.is_valid();
    let mut referenced_ids = FxHashSet::default();
    if shapes_checkable {
        for body in &bodies {
            check_reference_shapes(body, SECTION_CONTENT, &mut report, &mut referenced_ids);
        }
        // Sub-table bodies get the same shape checks; their own `{#id}`
        // references resolve (or BADREF) at expansion time, so the ids they
        // mention are not held against the parent's declarations.
        let mut ignored = FxHashSet::default();
        for sub in &sub_tables {
            for body in &sub.entries {
                check_reference_shapes(body, SECTION_INLINE, &mut report, &mut ignored);
            }
        }
    }

    // Internal inline consistency: a referenced id must be declared, and a
    // declared id ought to be referenced. Meaningful only when the bodies
    // were scanned.
    if shapes_checkable {
        for id in &referenced_ids {
            if !declared_ids.contains(id) {
                report.fail(
                    SECTION_INLINE,
                    format!("reference to undeclared sub-table: {id}"),
                );
            }
        }
        for sub in &sub_tables {
            if !referenced_ids.contains(&sub.id) {
                report.warn(
                    SECTION_INLINE,
                    format!("sub-table {} is never referenced", sub.id),
                );
            }
        }
    }

    if !report.is_valid() {
        return Ok((report, None));
    }

    let parsed_dice = match kind {
        TableKind::Flat => DicePlan::uniform(raw.content.len()),
        TableKind::Range => match declared_plan {
            Some(plan) => plan,
            None => return Ok((report, None)),
        },
    };

    let table = Table {
        definition: Definition {
            name,
            kind,
            roll: (!raw.definition.roll.is_empty()).then(|| raw.definition.roll.clone()),
            note: raw.definition.note,
            tags,
        },
        raw_entries: raw.content,
        ranged_entries,
        sub_tables,
        is_inline: false,
        parsed_dice,
    };
    Ok((report, Some(table)))
}

/// Case-fold, deduplicate, and sort a declared tag list.
fn normalize_tags(tags: &[String]) -> Vec<String> {
    let set: FxHashSet<String> = tags.iter().map(|t| t.to_lowercase()).collect();
    let mut out: Vec<String> = set.into_iter().collect();
    out.sort();
    out
}

fn parse_ranged_entries(content: &[String], report: &mut ValidationReport) -> Vec<RangedRow> {
    let mut rows = Vec::with_capacity(content.len());
    for entry in content {
        if let Some(caps) = RANGE_ROW.captures(entry) {
            let low = caps[1].parse::<i64>();
            let high = caps[2].parse::<i64>();
            match (low, high) {
                (Ok(low), Ok(high)) if low < high => rows.push(RangedRow {
                    low,
                    high,
                    text: caps[3].to_string(),
                }),
                (Ok(low), Ok(high)) => {
                    report.fail(
                        SECTION_CONTENT,
                        format!("invalid range: {low} is not below {high}"),
                    );
                }
                _ => {
                    report.fail(SECTION_CONTENT, format!("invalid ranged entry: {entry}"));
                }
            }
        } else if let Some(caps) = FIXED_ROW.captures(entry) {
            match caps[1].parse::<i64>() {
                Ok(v) => rows.push(RangedRow {
                    low: v,
                    high: v,
                    text: caps[2].to_string(),
                }),
                Err(_) => {
                    report.fail(SECTION_CONTENT, format!("invalid ranged entry: {entry}"));
                }
            }
        } else {
            report.fail(SECTION_CONTENT, format!("invalid ranged entry: {entry}"));
        }
    }

    // Intervals must be strictly increasing and contiguous: no overlaps,
    // no gaps. One diagnostic is enough.
    for pair in rows.windows(2) {
        if pair[1].low != pair[0].high + 1 {
            report.fail(
                SECTION_CONTENT,
                format!(
                    "ranged entries must be contiguous and increasing: {}-{} is followed by {}-{}",
                    pair[0].low, pair[0].high, pair[1].low, pair[1].high
                ),
            );
            break;
        }
    }
    rows
}

/// Every `{` must open exactly one placeholder closed by a later `}`;
/// nesting is disallowed.
fn check_brace_balance(body: &str, section: &str, report: &mut ValidationReport) {
    let mut open = false;
    for c in body.chars() {
        match c {
            '{' if open => {
                report.fail(section, format!("unexpected open brace in: {body}"));
                return;
            }
            '{' => open = true,
            '}' if !open => {
                report.fail(section, format!("unexpected close brace in: {body}"));
                return;
            }
            '}' => open = false,
            _ => {}
        }
    }
    if open {
        report.fail(section, format!("unclosed open brace in: {body}"));
    }
}

/// Each placeholder must take one of the four reference forms; names must
/// be valid identifiers and embedded dice expressions must parse. Collects
/// the sub-table ids the body mentions.
fn check_reference_shapes(
    body: &str,
    section: &str,
    report: &mut ValidationReport,
    referenced_ids: &mut FxHashSet<u32>,
) {
    let mut rest = body;
    while let Some((_, reference, suffix)) = refs::split_next_ref(rest) {
        let inner = &reference[1..reference.len() - 1];
        match refs::classify(inner) {
            Some(TableRef::External(name)) => {
                if !refs::is_valid_identifier(&name) {
                    report.fail(section, format!("invalid table reference: {reference}"));
                }
            }
            Some(TableRef::Inline(id)) => {
                referenced_ids.insert(id);
            }
            Some(TableRef::Pick { name, .. }) => {
                if !refs::is_valid_identifier(&name) {
                    report.fail(section, format!("invalid table reference: {reference}"));
                }
            }
            Some(TableRef::Dice(expr)) => {
                if let Err(e) = DicePlan::parse(&expr) {
                    report.fail(section, e);
                }
            }
            None => {
                report.fail(section, format!("invalid table reference: {reference}"));
            }
        }
        rest = suffix;
    }
}
