//! Placeholder scanning and classification.
//!
//! Entry bodies embed four brace-delimited reference forms:
//! `{@Name}` rolls once on a named table, `{#id}` rolls once on the current
//! table's sub-table, `{N!Name}` picks N distinct rows, and `{$expr}`
//! inlines a dice-expression result.

use std::sync::LazyLock;

use regex::Regex;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("identifier pattern"));
static EXTERNAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@(.+)$").expect("external pattern"));
static INLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#([0-9]+)$").expect("inline pattern"));
static PICK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+)!(.+)$").expect("pick pattern"));
static DICE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\$(.+)$").expect("dice pattern"));

/// True if `s` is a legal top-level table or script name.
pub fn is_valid_identifier(s: &str) -> bool {
    IDENTIFIER.is_match(s)
}

/// Canonical catalog name of a sub-table: `parent.id`.
pub fn full_name(parent: &str, id: u32) -> String {
    format!("{parent}.{id}")
}

/// A classified placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableRef {
    /// `{@Name}` — roll once on the named top-level table.
    External(String),
    /// `{#id}` — roll once on the current table's sub-table `id`.
    Inline(u32),
    /// `{N!Name}` — pick `count` distinct rows from the named table.
    Pick { count: usize, name: String },
    /// `{$expr}` — evaluate the dice expression and inline the integer.
    Dice(String),
}

/// Split `s` around its first placeholder: everything before the opening
/// brace, the `{...}` token itself, and everything after the closing brace.
/// Returns `None` when no complete placeholder remains.
pub fn split_next_ref(s: &str) -> Option<(&str, &str, &str)> {
    let start = s.find('{')?;
    let stop = start + s[start..].find('}')?;
    Some((&s[..start], &s[start..=stop], &s[stop + 1..]))
}

/// Classify the text between the braces. Name validity is not checked here;
/// ingest-time validation enforces it and runtime resolution failures
/// surface as BADREF markers.
pub fn classify(inner: &str) -> Option<TableRef> {
    if let Some(caps) = EXTERNAL.captures(inner) {
        return Some(TableRef::External(caps[1].to_string()));
    }
    if let Some(caps) = INLINE.captures(inner) {
        let id = caps[1].parse::<u32>().ok()?;
        return Some(TableRef::Inline(id));
    }
    if let Some(caps) = PICK.captures(inner) {
        let count = caps[1].parse::<usize>().ok()?;
        return Some(TableRef::Pick {
            count,
            name: caps[2].to_string(),
        });
    }
    if let Some(caps) = DICE.captures(inner) {
        return Some(TableRef::Dice(caps[1].to_string()));
    }
    None
}
