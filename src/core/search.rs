//! Search execution over the catalog's name and tag indices.
//!
//! Four query shapes: no filters (full listing), tags only, name regex
//! only, or tag-filter first then regex-filter. Results always come back
//! scripts first, then tables, lexicographic by name within kind.

use regex::Regex;
use rustc_hash::FxHashMap;

use crate::core::catalog::{CatalogError, CatalogInner};
use crate::schema::search::{ItemKind, SearchResult};

impl CatalogInner {
    pub(crate) fn execute_search(
        &self,
        name_predicate: Option<&str>,
        tags: &[String],
    ) -> Result<Vec<SearchResult>, CatalogError> {
        let predicate = name_predicate.filter(|p| !p.is_empty());
        match (predicate, tags.is_empty()) {
            (None, true) => Ok(self.full_listing()),
            (None, false) => Ok(self.by_tags(tags)),
            (Some(pattern), true) => by_name(pattern, self.full_listing()),
            (Some(pattern), false) => by_name(pattern, self.by_tags(tags)),
        }
    }

    /// Every indexed item. Promoted sub-table entries never enter the
    /// indices, so they never appear here.
    fn full_listing(&self) -> Vec<SearchResult> {
        let mut hits: Vec<SearchResult> = self.name_index.values().cloned().collect();
        sort_results(&mut hits);
        hits
    }

    /// Union over the queried tags, deduplicated by item identity since one
    /// item appears under each of its tags.
    fn by_tags(&self, tags: &[String]) -> Vec<SearchResult> {
        let mut set: FxHashMap<(String, ItemKind), SearchResult> = FxHashMap::default();
        for tag in tags {
            if let Some(items) = self.tag_index.get(tag) {
                for item in items {
                    set.insert(item.key(), item.clone());
                }
            }
        }
        let mut hits: Vec<SearchResult> = set.into_values().collect();
        sort_results(&mut hits);
        hits
    }
}

fn by_name(
    pattern: &str,
    candidates: Vec<SearchResult>,
) -> Result<Vec<SearchResult>, CatalogError> {
    let regex = Regex::new(pattern)?;
    let mut hits: Vec<SearchResult> = candidates
        .into_iter()
        .filter(|hit| regex.is_match(&hit.name))
        .collect();
    sort_results(&mut hits);
    Ok(hits)
}

fn sort_results(hits: &mut [SearchResult]) {
    hits.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
}
