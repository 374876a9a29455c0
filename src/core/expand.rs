//! The expansion interpreter: samples a table, then repeatedly rewrites
//! embedded references until none remain or the call-depth cap trips.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use crate::core::catalog::CatalogError;
use crate::core::dice::{DiceError, DicePlan, SENTINEL_BAD_DICE};
use crate::core::refs::{self, TableRef};
use crate::core::result::TableResult;
use crate::schema::table::{Table, TableKind};

/// Hard cap on nested table resolutions within one roll or pick. Blocks
/// circular references, malicious or otherwise, with a hammer.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 25;

/// Resolves fully-qualified names to tables during expansion. Implemented
/// by the catalog (under its read lock) and by catalog snapshots.
pub trait NameResolver {
    fn table_for_name(&self, name: &str) -> Result<Arc<Table>, CatalogError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Roll,
    Pick,
}

/// One unit of expansion work: which table, which operation, how often.
pub struct WorkItem<'a> {
    pub resolver: &'a dyn NameResolver,
    pub table: Arc<Table>,
    pub operation: Operation,
    /// Number of independent top-level iterations.
    pub count: usize,
    /// Rows to draw per iteration, for `Operation::Pick`.
    pub pick_count: usize,
}

/// Per-invocation interpreter state: a recursion counter and a PRNG.
/// A fresh engine is created for every top-level call.
pub struct ExpansionEngine {
    call_depth: usize,
    rng: StdRng,
}

impl ExpansionEngine {
    /// Engine seeded from the clock; results differ call to call.
    pub fn new() -> Self {
        Self::seeded(nano_seed())
    }

    /// Engine with a caller-supplied seed, for deterministic output.
    pub fn seeded(seed: u64) -> Self {
        Self {
            call_depth: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Run the work item, appending one result per iteration. The depth
    /// counter resets between iterations: each requested roll or pick is an
    /// independent expansion.
    pub fn execute(&mut self, work: &WorkItem<'_>, out: &mut TableResult) {
        if work.count > DEFAULT_MAX_CALL_DEPTH {
            out.add_log(format!(
                "Too many rolls requested, max is: {DEFAULT_MAX_CALL_DEPTH}"
            ));
            return;
        }

        for _ in 0..work.count {
            let generated = self.execute_internal(work, out);
            out.add_result(generated);
            self.call_depth = 0;
        }
    }

    /// Called once per iteration and recursively for every reference the
    /// produced text contains, until all references are resolved.
    fn execute_internal(&mut self, work: &WorkItem<'_>, out: &mut TableResult) -> String {
        match work.operation {
            Operation::Roll => {
                out.add_log(format!(
                    "Executing Roll on table: {}",
                    work.table.definition.name
                ));
                self.execute_roll(work, out)
            }
            Operation::Pick => {
                out.add_log(format!(
                    "Executing Pick {} on table: {} ",
                    work.pick_count, work.table.definition.name
                ));
                self.execute_pick(work, out)
            }
        }
    }

    /// Sample one row from a flat or ranged table and expand it.
    fn execute_roll(&mut self, work: &WorkItem<'_>, out: &mut TableResult) -> String {
        if !self.check_call_depth(out) {
            return String::new();
        }

        let rolled = work.table.parsed_dice.roll(&mut self.rng);
        out.add_log(format!("Rolled: {rolled}"));

        let body = match work.table.definition.kind {
            TableKind::Flat => {
                match work.table.raw_entries.get((rolled - 1) as usize) {
                    Some(entry) => entry.clone(),
                    // Unreachable for validated tables; the uniform plan
                    // covers exactly the entry count.
                    None => {
                        return bounds_error(rolled, &work.table.definition.name);
                    }
                }
            }
            TableKind::Range => {
                match work
                    .table
                    .ranged_entries
                    .iter()
                    .find(|row| rolled >= row.low && rolled <= row.high)
                {
                    Some(row) => row.text.clone(),
                    // A declared roll wider than the covered interval is
                    // validator-accepted; surface the miss in the output
                    // and do not recurse.
                    None => {
                        return bounds_error(rolled, &work.table.definition.name);
                    }
                }
            }
        };

        self.expand_refs(body, work, out)
    }

    /// Draw distinct rows from a flat table, joined by `,` in pick order.
    fn execute_pick(&mut self, work: &WorkItem<'_>, out: &mut TableResult) -> String {
        if !self.check_call_depth(out) {
            return String::new();
        }

        let table = &work.table;
        if table.definition.kind == TableKind::Range {
            out.add_log(format!(
                "Pick requested on ranged table: {}",
                table.definition.name
            ));
            return "Pick on range table not allowed".to_string();
        }

        if work.pick_count >= table.raw_entries.len() {
            out.add_log(format!(
                "Pick {} on table: {} requested but it has only {} entries",
                work.pick_count,
                table.definition.name,
                table.raw_entries.len()
            ));
            return table.raw_entries.join(",");
        }

        let mut picked = vec![false; table.raw_entries.len()];
        let mut chosen = Vec::with_capacity(work.pick_count);
        let mut remaining = work.pick_count;
        while remaining > 0 {
            let idx = self.rng.gen_range(0..table.raw_entries.len());
            if !picked[idx] {
                picked[idx] = true;
                remaining -= 1;
                chosen.push(table.raw_entries[idx].clone());
            }
        }

        let joined = chosen.join(",");
        self.expand_refs(joined, work, out)
    }

    /// The rewrite loop. Resolves the leftmost reference, splices its
    /// expansion into the working string, and rescans from the top so that
    /// newly produced text is itself expanded.
    fn expand_refs(&mut self, buf: String, work: &WorkItem<'_>, out: &mut TableResult) -> String {
        let mut current = buf;
        loop {
            let Some((prefix, reference, suffix)) = refs::split_next_ref(&current) else {
                return current;
            };
            let reference = reference.to_string();
            let suffix = suffix.to_string();
            let mut assembled = prefix.to_string();

            let inner = &reference[1..reference.len() - 1];
            let nested = match refs::classify(inner) {
                Some(TableRef::External(name)) => self.nested_roll(work, &name, out),
                Some(TableRef::Inline(id)) => {
                    let target = refs::full_name(&work.table.definition.name, id);
                    self.nested_roll(work, &target, out)
                }
                Some(TableRef::Pick { count, name }) => {
                    match work.resolver.table_for_name(&name) {
                        Ok(table) => {
                            let next = WorkItem {
                                resolver: work.resolver,
                                table,
                                operation: Operation::Pick,
                                count: 1,
                                pick_count: count,
                            };
                            Ok(self.execute_internal(&next, out))
                        }
                        Err(e) => Err(e),
                    }
                }
                Some(TableRef::Dice(expr)) => Ok(self.inline_dice(&expr, out)),
                None => {
                    // Validated content cannot produce this; generated text
                    // in practice cannot either, since expansions splice in
                    // plain text or digits.
                    let msg = format!("Unexpected table ref: {reference}");
                    out.add_log(msg.clone());
                    return msg;
                }
            };

            match nested {
                Ok(generated) => assembled.push_str(&generated),
                Err(e) => {
                    // Non-fatal: mark the failure in the output and give up
                    // on the rest of this frame.
                    warn!(reference = %reference, "reference lookup failed");
                    out.add_log(e.to_string());
                    assembled.push_str(&format!(" --BADREF: {reference}--"));
                    return assembled;
                }
            }

            assembled.push_str(&suffix);
            current = assembled;
        }
    }

    fn nested_roll(
        &mut self,
        work: &WorkItem<'_>,
        name: &str,
        out: &mut TableResult,
    ) -> Result<String, CatalogError> {
        let table = work.resolver.table_for_name(name)?;
        let next = WorkItem {
            resolver: work.resolver,
            table,
            operation: Operation::Roll,
            count: 1,
            pick_count: 0,
        };
        Ok(self.execute_internal(&next, out))
    }

    fn inline_dice(&mut self, expr: &str, out: &mut TableResult) -> String {
        match DicePlan::parse(expr) {
            Ok(plan) => plan.roll(&mut self.rng).to_string(),
            Err(e) => {
                out.add_log(e.to_string());
                SENTINEL_BAD_DICE.to_string()
            }
        }
    }

    fn check_call_depth(&mut self, out: &mut TableResult) -> bool {
        self.call_depth += 1;
        if self.call_depth > DEFAULT_MAX_CALL_DEPTH {
            warn!(depth = self.call_depth, "expansion depth cap exceeded");
            out.add_log(format!(
                "Unable to roll on table, max call depth of: {DEFAULT_MAX_CALL_DEPTH} exceeded"
            ));
            return false;
        }
        true
    }
}

impl Default for ExpansionEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn bounds_error(rolled: i64, name: &str) -> String {
    format!("ERROR: roll of {rolled} exceeded bounds of table: {name}")
}

/// Validate and evaluate a standalone dice expression with a fresh
/// clock-seeded generator.
pub(crate) fn evaluate_dice(expr: &str) -> Result<i64, DiceError> {
    let plan = DicePlan::parse(expr)?;
    Ok(plan.roll(&mut StdRng::seed_from_u64(nano_seed())))
}

pub(crate) fn nano_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// Roll `count` times on `name`, resolving via `resolver`. Shared by the
/// catalog's public surface and the script host's snapshot-backed
/// intrinsics.
pub(crate) fn perform_roll(
    resolver: &dyn NameResolver,
    name: &str,
    count: usize,
    mut engine: ExpansionEngine,
) -> TableResult {
    let mut out = TableResult::new();
    if count == 0 {
        out.add_log(format!("Attempt to roll 0 or fewer times on table: {name}"));
    }
    match resolver.table_for_name(name) {
        Ok(table) => {
            let work = WorkItem {
                resolver,
                table,
                operation: Operation::Roll,
                count,
                pick_count: 0,
            };
            engine.execute(&work, &mut out);
        }
        Err(e) => out.add_log(e.to_string()),
    }
    out
}

/// Pick `pick_count` distinct rows from `name` once.
pub(crate) fn perform_pick(
    resolver: &dyn NameResolver,
    name: &str,
    pick_count: usize,
    mut engine: ExpansionEngine,
) -> TableResult {
    let mut out = TableResult::new();
    match resolver.table_for_name(name) {
        Ok(table) => {
            let work = WorkItem {
                resolver,
                table,
                operation: Operation::Pick,
                count: 1,
                pick_count,
            };
            engine.execute(&work, &mut out);
        }
        Err(e) => out.add_log(e.to_string()),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::table::Definition;
    use rustc_hash::FxHashMap;

    struct MapResolver {
        tables: FxHashMap<String, Arc<Table>>,
    }

    impl MapResolver {
        fn new(tables: &[Table]) -> Self {
            Self {
                tables: tables
                    .iter()
                    .map(|t| (t.definition.name.clone(), Arc::new(t.clone())))
                    .collect(),
            }
        }
    }

    impl NameResolver for MapResolver {
        fn table_for_name(&self, name: &str) -> Result<Arc<Table>, CatalogError> {
            self.tables
                .get(name)
                .map(Arc::clone)
                .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))
        }
    }

    fn flat(name: &str, entries: &[&str]) -> Table {
        Table {
            definition: Definition {
                name: name.to_string(),
                kind: TableKind::Flat,
                roll: None,
                note: String::new(),
                tags: Vec::new(),
            },
            raw_entries: entries.iter().map(|e| e.to_string()).collect(),
            ranged_entries: Vec::new(),
            sub_tables: Vec::new(),
            is_inline: false,
            parsed_dice: DicePlan::uniform(entries.len()),
        }
    }

    fn roll_once(resolver: &MapResolver, name: &str) -> TableResult {
        perform_roll(resolver, name, 1, ExpansionEngine::seeded(11))
    }

    #[test]
    fn references_resolve_left_to_right() {
        let resolver = MapResolver::new(&[
            flat("Top", &["{@Left} then {@Right}"]),
            flat("Left", &["first"]),
            flat("Right", &["second"]),
        ]);
        let out = roll_once(&resolver, "Top");
        assert_eq!(out.results, vec!["first then second"]);
    }

    #[test]
    fn produced_text_is_rescanned() {
        let resolver = MapResolver::new(&[
            flat("Top", &["{@Middle}"]),
            flat("Middle", &["{@Bottom}!"]),
            flat("Bottom", &["done"]),
        ]);
        let out = roll_once(&resolver, "Top");
        assert_eq!(out.results, vec!["done!"]);
    }

    #[test]
    fn badref_discards_the_frame_suffix() {
        let resolver = MapResolver::new(&[flat("Top", &["x {@Missing} y"])]);
        let out = roll_once(&resolver, "Top");
        assert_eq!(out.results, vec!["x  --BADREF: {@Missing}--"]);
        assert!(out
            .log
            .iter()
            .any(|l| l.contains("Table does not exist: Missing")));
    }

    #[test]
    fn dice_reference_inlines_mid_string() {
        let resolver = MapResolver::new(&[flat("Top", &["{$1d1} gold, {$2d1} silver"])]);
        let out = roll_once(&resolver, "Top");
        assert_eq!(out.results, vec!["1 gold, 2 silver"]);
    }

    #[test]
    fn inline_reference_resolves_against_current_frame() {
        let mut parent = flat("P", &["{#2}"]);
        parent.sub_tables.push(crate::schema::table::SubTable {
            id: 2,
            full_name: "P.2".to_string(),
            entries: vec!["sub row".to_string()],
        });
        let mut promoted = flat("P.2", &["sub row"]);
        promoted.is_inline = true;
        let resolver = MapResolver::new(&[parent, promoted]);
        let out = roll_once(&resolver, "P");
        assert_eq!(out.results, vec!["sub row"]);
    }

    #[test]
    fn mutual_recursion_stops_at_the_cap() {
        let resolver = MapResolver::new(&[
            flat("Ping", &["p{@Pong}"]),
            flat("Pong", &["q{@Ping}"]),
        ]);
        let out = roll_once(&resolver, "Ping");
        let produced = &out.results[0];
        // 25 frames alternate between the two bodies before the cap trips.
        assert_eq!(
            produced.matches('p').count() + produced.matches('q').count(),
            25,
            "{produced}"
        );
        assert!(out
            .log
            .iter()
            .any(|l| l.contains("max call depth of: 25 exceeded")));
    }

    #[test]
    fn pick_of_zero_rows_yields_empty_string() {
        let resolver = MapResolver::new(&[flat("Letters", &["a", "b"])]);
        let out = perform_pick(&resolver, "Letters", 0, ExpansionEngine::seeded(3));
        assert_eq!(out.results, vec![""]);
    }

    #[test]
    fn picked_rows_are_expanded_too() {
        let resolver = MapResolver::new(&[
            flat("Wrapped", &["[{@Inner}]"]),
            flat("Inner", &["core"]),
        ]);
        let out = perform_pick(&resolver, "Wrapped", 0, ExpansionEngine::seeded(3));
        assert_eq!(out.results, vec![""]);

        // pick_count below the entry count goes through the rewrite loop.
        let resolver = MapResolver::new(&[
            flat("Wrapped", &["[{@Inner}]", "plain"]),
            flat("Inner", &["core"]),
        ]);
        for seed in 0..8 {
            let out = perform_pick(&resolver, "Wrapped", 1, ExpansionEngine::seeded(seed));
            assert!(
                out.results[0] == "[core]" || out.results[0] == "plain",
                "{:?}",
                out.results
            );
        }
    }

    #[test]
    fn iteration_count_is_respected_and_depth_resets() {
        let resolver = MapResolver::new(&[flat("Deepish", &["{@Leaf}"]), flat("Leaf", &["x"])]);
        let out = perform_roll(&resolver, "Deepish", 10, ExpansionEngine::seeded(5));
        assert_eq!(out.results, vec!["x"; 10]);
    }
}
