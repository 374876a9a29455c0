//! The process-wide catalog: tables and scripts behind one reader-writer
//! lock, with tag and name indices co-maintained on every write.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use regex::Regex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

use crate::core::dice::{DiceError, DicePlan};
use crate::core::expand::{self, ExpansionEngine, NameResolver};
use crate::core::result::TableResult;
use crate::core::script;
use crate::core::validate::{self, ValidationReport};
use crate::core::refs;
use crate::schema::param::ParamCallback;
use crate::schema::search::{ItemKind, SearchResult};
use crate::schema::table::{Definition, Table, TableKind};

static SCRIPT_TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--TAGS:(.*)").expect("script tags pattern"));

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Table does not exist: {0}")]
    TableNotFound(String),
    #[error("Script does not exist: {0}")]
    ScriptNotFound(String),
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("table declaration is not valid RON: {0}")]
    Format(#[from] ron::error::SpannedError),
    #[error("invalid name pattern: {0}")]
    BadPattern(#[from] regex::Error),
    #[error("script compilation failed: {0}")]
    ScriptCompile(#[source] mlua::Error),
}

pub(crate) struct TableRecord {
    /// The declaration blob exactly as ingested; empty for promoted
    /// sub-table entries.
    source: String,
    table: Arc<Table>,
    tags: Vec<String>,
}

pub(crate) struct ScriptRecord {
    pub(crate) source: String,
    /// Stripped bytecode dump from the ingest-time compilation pass.
    pub(crate) bytecode: Vec<u8>,
    pub(crate) tags: Vec<String>,
}

#[derive(Default)]
pub(crate) struct CatalogInner {
    pub(crate) tables: FxHashMap<String, TableRecord>,
    pub(crate) scripts: FxHashMap<String, Arc<ScriptRecord>>,
    pub(crate) tag_index: FxHashMap<String, Vec<SearchResult>>,
    pub(crate) name_index: FxHashMap<(String, ItemKind), SearchResult>,
}

impl NameResolver for CatalogInner {
    fn table_for_name(&self, name: &str) -> Result<Arc<Table>, CatalogError> {
        self.tables
            .get(name)
            .map(|r| Arc::clone(&r.table))
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))
    }
}

impl CatalogInner {
    fn record_tags(&self, name: &str, kind: ItemKind) -> Vec<String> {
        match kind {
            ItemKind::Table => self
                .tables
                .get(name)
                .map(|r| r.tags.clone())
                .unwrap_or_default(),
            ItemKind::Script => self
                .scripts
                .get(name)
                .map(|r| r.tags.clone())
                .unwrap_or_default(),
        }
    }

    /// Reconcile the tag index with an item's new tag set. Must run before
    /// the store itself is overwritten so the previous tags are still
    /// observable.
    fn update_tag_index(&mut self, name: &str, kind: ItemKind, new_tags: &[String]) {
        let prev = self.record_tags(name, kind);
        if prev.is_empty() && new_tags.is_empty() {
            return;
        }
        let hit = SearchResult::new(name, kind, new_tags.to_vec());
        if !prev.is_empty() {
            self.remove_from_tag_index(&hit, &prev);
        }
        if !new_tags.is_empty() {
            self.add_to_tag_index(&hit);
        }
    }

    fn remove_from_tag_index(&mut self, hit: &SearchResult, old_tags: &[String]) {
        for tag in old_tags {
            if let Some(items) = self.tag_index.get_mut(tag) {
                items.retain(|i| !(i.name == hit.name && i.kind == hit.kind));
                // Tombstone: an emptied tag disappears from the index.
                if items.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
    }

    fn add_to_tag_index(&mut self, hit: &SearchResult) {
        for tag in &hit.tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .push(hit.clone());
        }
    }

    fn set_name_index(&mut self, hit: SearchResult) {
        self.name_index.insert(hit.key(), hit);
    }

    pub(crate) fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            tables: self
                .tables
                .iter()
                .map(|(k, r)| (k.clone(), Arc::clone(&r.table)))
                .collect(),
            scripts: self.scripts.clone(),
        }
    }
}

/// An immutable view of the stores, cloned under a brief read lock so
/// script execution (and its bounded callback wait) never holds the
/// catalog lock.
pub(crate) struct CatalogSnapshot {
    pub(crate) tables: FxHashMap<String, Arc<Table>>,
    pub(crate) scripts: FxHashMap<String, Arc<ScriptRecord>>,
}

impl NameResolver for CatalogSnapshot {
    fn table_for_name(&self, name: &str) -> Result<Arc<Table>, CatalogError> {
        self.tables
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))
    }
}

impl CatalogSnapshot {
    pub(crate) fn roll(&self, name: &str, count: usize) -> TableResult {
        expand::perform_roll(self, name, count, ExpansionEngine::new())
    }

    pub(crate) fn pick(&self, name: &str, pick_count: usize) -> TableResult {
        expand::perform_pick(self, name, pick_count, ExpansionEngine::new())
    }
}

/// The catalog. Cheap to share behind an `Arc`; all operations take
/// `&self`. Readers run concurrently, writers are exclusive.
#[derive(Default)]
pub struct Catalog {
    inner: RwLock<CatalogInner>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CatalogInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CatalogInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate a declaration blob and, when it carries no errors, store
    /// the table plus its promoted sub-tables as one atomic mutation.
    /// Re-ingesting an existing name replaces it wholesale.
    pub fn add_table(&self, blob: &str) -> Result<ValidationReport, CatalogError> {
        // Parse and validate outside the lock so ingestion can run
        // multithreaded; only the store mutation is exclusive.
        let (report, table) = validate::validate_blob(blob)?;
        let Some(table) = table else {
            return Ok(report);
        };

        let inlines = promote_sub_tables(&table);
        let name = table.definition.name.clone();
        let tags = table.definition.tags.clone();

        let mut inner = self.write();
        inner.update_tag_index(&name, ItemKind::Table, &tags);
        inner.set_name_index(SearchResult::new(name.clone(), ItemKind::Table, tags.clone()));

        // Drop promoted entries left over from a previous revision of this
        // parent. Top-level names cannot contain '.', so the prefix only
        // matches this parent's own sub-tables.
        let stale_prefix = format!("{name}.");
        inner
            .tables
            .retain(|key, record| !(record.table.is_inline && key.starts_with(&stale_prefix)));

        inner.tables.insert(
            name.clone(),
            TableRecord {
                source: blob.to_string(),
                table: Arc::new(table),
                tags,
            },
        );
        for inline in inlines {
            inner.tables.insert(
                inline.definition.name.clone(),
                TableRecord {
                    source: String::new(),
                    table: Arc::new(inline),
                    tags: Vec::new(),
                },
            );
        }
        debug!(table = %name, "stored table");
        Ok(report)
    }

    /// Compile and store a script. Tags come from the first `--TAGS:`
    /// comment line, comma-separated, trimmed, case preserved.
    pub fn add_script(&self, name: &str, source: &str) -> Result<(), CatalogError> {
        if !refs::is_valid_identifier(name) {
            return Err(CatalogError::InvalidName(name.to_string()));
        }
        let tags = extract_script_tags(source);
        let bytecode = script::compile(source).map_err(CatalogError::ScriptCompile)?;

        let mut inner = self.write();
        inner.update_tag_index(name, ItemKind::Script, &tags);
        inner.set_name_index(SearchResult::new(name, ItemKind::Script, tags.clone()));
        inner.scripts.insert(
            name.to_string(),
            Arc::new(ScriptRecord {
                source: source.to_string(),
                bytecode,
                tags,
            }),
        );
        debug!(script = name, "stored script");
        Ok(())
    }

    /// The raw source of a stored item. Promoted sub-table entries have no
    /// source of their own and list as the empty string.
    pub fn list(&self, name: &str, kind: ItemKind) -> Result<String, CatalogError> {
        let inner = self.read();
        match kind {
            ItemKind::Table => inner
                .tables
                .get(name)
                .map(|r| r.source.clone())
                .ok_or_else(|| CatalogError::TableNotFound(name.to_string())),
            ItemKind::Script => inner
                .scripts
                .get(name)
                .map(|r| r.source.clone())
                .ok_or_else(|| CatalogError::ScriptNotFound(name.to_string())),
        }
    }

    /// Roll `count` times on the named table. Failures become log entries
    /// on the returned result, never errors.
    pub fn roll(&self, name: &str, count: usize) -> TableResult {
        expand::perform_roll(&*self.read(), name, count, ExpansionEngine::new())
    }

    /// `roll` with a fixed PRNG seed, for reproducible output.
    pub fn roll_seeded(&self, name: &str, count: usize, seed: u64) -> TableResult {
        expand::perform_roll(&*self.read(), name, count, ExpansionEngine::seeded(seed))
    }

    /// Pick `count` distinct rows from the named flat table.
    pub fn pick(&self, name: &str, count: usize) -> TableResult {
        expand::perform_pick(&*self.read(), name, count, ExpansionEngine::new())
    }

    /// `pick` with a fixed PRNG seed.
    pub fn pick_seeded(&self, name: &str, count: usize, seed: u64) -> TableResult {
        expand::perform_pick(&*self.read(), name, count, ExpansionEngine::seeded(seed))
    }

    /// Run a stored script in a fresh sandbox against a point-in-time view
    /// of the catalog. The catalog lock is released before the script (or
    /// its parameter callback) runs, so a stalled callback cannot block
    /// writers.
    pub fn execute(
        &self,
        script_name: &str,
        callback: Option<ParamCallback>,
    ) -> HashMap<String, String> {
        let snapshot = self.read().snapshot();
        script::execute_script(script_name, snapshot, callback)
    }

    /// Validate and evaluate a standalone dice expression.
    pub fn evaluate_dice(&self, expr: &str) -> Result<i64, DiceError> {
        expand::evaluate_dice(expr)
    }

    /// Search stored items by optional name regex and/or tag set. See the
    /// ordering and filtering rules on `CatalogInner::execute_search`.
    pub fn search(
        &self,
        name_predicate: Option<&str>,
        tags: &[String],
    ) -> Result<Vec<SearchResult>, CatalogError> {
        self.read().execute_search(name_predicate, tags)
    }
}

/// Build first-class flat entries from a parent's sub-tables so inline
/// lookups resolve like any other reference at expansion time.
fn promote_sub_tables(parent: &Table) -> Vec<Table> {
    parent
        .sub_tables
        .iter()
        .map(|sub| Table {
            definition: Definition {
                name: sub.full_name.clone(),
                kind: TableKind::Flat,
                roll: None,
                note: String::new(),
                tags: Vec::new(),
            },
            raw_entries: sub.entries.clone(),
            ranged_entries: Vec::new(),
            sub_tables: Vec::new(),
            is_inline: true,
            parsed_dice: DicePlan::uniform(sub.entries.len()),
        })
        .collect()
}

fn extract_script_tags(source: &str) -> Vec<String> {
    for line in source.lines() {
        if let Some(caps) = SCRIPT_TAGS.captures(line) {
            return caps[1]
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
    }
    Vec::new()
}
