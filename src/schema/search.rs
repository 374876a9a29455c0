use std::fmt;

use serde::{Deserialize, Serialize};

/// What kind of catalog item a search hit refers to.
///
/// Scripts sort ahead of tables in search output, so the variant order here
/// is load-bearing for the derived `Ord`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ItemKind {
    Script,
    Table,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script => f.write_str("script"),
            Self::Table => f.write_str("table"),
        }
    }
}

/// A lightweight view of one catalog item, handed out by value from
/// `Catalog::search`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub name: String,
    pub kind: ItemKind,
    pub tags: Vec<String>,
}

impl SearchResult {
    pub fn new(name: impl Into<String>, kind: ItemKind, tags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            tags,
        }
    }

    /// Identity key: two hits with the same name and kind are the same item.
    pub fn key(&self) -> (String, ItemKind) {
        (self.name.clone(), self.kind)
    }

    /// Full comparison key, including the tag set irrespective of order.
    pub fn full_key(&self) -> (String, ItemKind, Vec<String>) {
        let mut tags = self.tags.clone();
        tags.sort();
        (self.name.clone(), self.kind, tags)
    }
}
