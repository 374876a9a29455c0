//! Search semantics and index maintenance: the four filter combinations,
//! result ordering, tag tombstones, and sub-table invisibility.

use rolltable::core::catalog::Catalog;
use rolltable::schema::search::ItemKind;

fn seeded_catalog() -> Catalog {
    let catalog = Catalog::new();
    catalog
        .add_table(
            r#"(
                definition: (name: "Weather", kind: "flat", tags: ["Outdoors", "Fantasy"]),
                content: ["rain"],
            )"#,
        )
        .unwrap();
    catalog
        .add_table(
            r#"(
                definition: (name: "Monsters", kind: "flat", tags: ["fantasy"]),
                content: ["goblin"],
            )"#,
        )
        .unwrap();
    catalog
        .add_table(
            r#"(
                definition: (name: "Streets", kind: "flat", tags: ["city"]),
                content: ["alley"],
            )"#,
        )
        .unwrap();
    catalog
        .add_script(
            "NameGen",
            "--TAGS: fantasy, gen\nresults = {}\nfunction main() results[\"n\"] = \"x\" end\n",
        )
        .unwrap();
    catalog
}

#[test]
fn empty_filters_return_everything_scripts_first() {
    let catalog = seeded_catalog();
    let hits = catalog.search(None, &[]).unwrap();
    let names: Vec<(String, ItemKind)> = hits.iter().map(|h| h.key()).collect();
    assert_eq!(
        names,
        vec![
            ("NameGen".to_string(), ItemKind::Script),
            ("Monsters".to_string(), ItemKind::Table),
            ("Streets".to_string(), ItemKind::Table),
            ("Weather".to_string(), ItemKind::Table),
        ]
    );
}

#[test]
fn table_tags_are_case_folded() {
    let catalog = seeded_catalog();
    // "Fantasy" was declared with a capital; it is indexed lower-cased.
    let hits = catalog.search(None, &["fantasy".to_string()]).unwrap();
    let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names, vec!["NameGen", "Monsters", "Weather"]);
}

#[test]
fn tag_union_deduplicates() {
    let catalog = seeded_catalog();
    let hits = catalog
        .search(
            None,
            &["fantasy".to_string(), "outdoors".to_string()],
        )
        .unwrap();
    let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
    // Weather carries both queried tags but appears once.
    assert_eq!(names, vec!["NameGen", "Monsters", "Weather"]);
}

#[test]
fn regex_only_filters_the_full_catalog() {
    let catalog = seeded_catalog();
    let hits = catalog.search(Some("^S"), &[]).unwrap();
    let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names, vec!["Streets"]);
}

#[test]
fn tags_then_regex_narrow_in_sequence() {
    let catalog = seeded_catalog();
    let hits = catalog
        .search(Some("ster"), &["fantasy".to_string()])
        .unwrap();
    let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
    // "Streets" matches no tag; "Weather" matches no regex.
    assert_eq!(names, vec!["Monsters"]);
}

#[test]
fn invalid_regex_is_an_error() {
    let catalog = seeded_catalog();
    assert!(catalog.search(Some("(unclosed"), &[]).is_err());
}

#[test]
fn unknown_tag_returns_nothing() {
    let catalog = seeded_catalog();
    assert!(catalog
        .search(None, &["no-such-tag".to_string()])
        .unwrap()
        .is_empty());
}

#[test]
fn script_tags_preserve_case() {
    let catalog = Catalog::new();
    catalog
        .add_script(
            "Mixed",
            "--TAGS: Fancy\nresults = {}\nfunction main() end\n",
        )
        .unwrap();
    assert_eq!(catalog.search(None, &["Fancy".to_string()]).unwrap().len(), 1);
    assert!(catalog
        .search(None, &["fancy".to_string()])
        .unwrap()
        .is_empty());
}

#[test]
fn sub_tables_never_appear_in_search() {
    let catalog = Catalog::new();
    catalog
        .add_table(
            r#"(
                definition: (name: "Parent", kind: "flat", tags: ["loot"]),
                content: ["{#1}"],
                inline: [(id: "1", content: ["sub row"])],
            )"#,
        )
        .unwrap();
    let hits = catalog.search(None, &[]).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "Parent");
    assert!(catalog.search(Some(r"\."), &[]).unwrap().is_empty());
}

#[test]
fn overwrite_moves_items_between_tags() {
    let catalog = Catalog::new();
    catalog
        .add_table(
            r#"(
                definition: (name: "Gems", kind: "flat", tags: ["old"]),
                content: ["ruby"],
            )"#,
        )
        .unwrap();
    assert_eq!(catalog.search(None, &["old".to_string()]).unwrap().len(), 1);

    catalog
        .add_table(
            r#"(
                definition: (name: "Gems", kind: "flat", tags: ["new"]),
                content: ["ruby"],
            )"#,
        )
        .unwrap();

    // The emptied tag is gone, the new one finds the table, and the
    // name index reflects the new tag set.
    assert!(catalog.search(None, &["old".to_string()]).unwrap().is_empty());
    let hits = catalog.search(None, &["new".to_string()]).unwrap();
    assert_eq!(hits.len(), 1);
    let full = catalog.search(None, &[]).unwrap();
    assert_eq!(full.len(), 1);
    assert_eq!(full[0].tags, vec!["new".to_string()]);
}

#[test]
fn overwrite_to_untagged_removes_from_tag_index() {
    let catalog = Catalog::new();
    catalog
        .add_table(
            r#"(
                definition: (name: "Gems", kind: "flat", tags: ["loot"]),
                content: ["ruby"],
            )"#,
        )
        .unwrap();
    catalog
        .add_table(
            r#"(
                definition: (name: "Gems", kind: "flat"),
                content: ["ruby"],
            )"#,
        )
        .unwrap();
    assert!(catalog.search(None, &["loot".to_string()]).unwrap().is_empty());
    assert_eq!(catalog.search(None, &[]).unwrap().len(), 1);
}

#[test]
fn adding_entries_never_shrinks_the_full_listing() {
    let catalog = Catalog::new();
    let mut previous = Vec::new();
    for name in ["Alpha", "Beta", "Gamma"] {
        let blob = format!(
            r#"(
                definition: (name: "{name}", kind: "flat"),
                content: ["x"],
            )"#
        );
        catalog.add_table(&blob).unwrap();
        let current = catalog.search(None, &[]).unwrap();
        for hit in &previous {
            assert!(current.contains(hit), "{} vanished", hit.name);
        }
        previous = current;
    }
}

#[test]
fn tags_and_name_can_both_reference_scripts() {
    let catalog = seeded_catalog();
    let hits = catalog
        .search(Some("Gen$"), &["gen".to_string()])
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].kind, ItemKind::Script);
    assert_eq!(hits[0].name, "NameGen");
}
