use std::sync::Arc;
use tangle_core::{EntityId, EntityRecord, EntityStore, ManualClock};

fn record(id: &str, kind: &str) -> EntityRecord {
    EntityRecord {
        id: id.to_string(),
        kind: kind.to_string(),
        ..EntityRecord::default()
    }
}

fn note_with_content(id: &str, content: &str) -> EntityRecord {
    EntityRecord {
        content: Some(content.to_string()),
        ..record(id, "note")
    }
}

fn setup(records: Vec<EntityRecord>) -> EntityStore {
    let mut store = EntityStore::with_clock(Arc::new(ManualClock::starting_at(1_000)));
    store.load(records);
    store
}

#[test]
fn load_derives_backlinks_from_content_references() {
    let store = setup(vec![
        record("c", "collection"),
        note_with_content("n", "see [the project](user://c) for details"),
    ]);

    let collection = store.get(&EntityId::new("c")).unwrap();
    assert_eq!(collection.backlinks.len(), 1);
    assert_eq!(collection.backlinks[0].entity, EntityId::new("c"));
    assert_eq!(collection.backlinks[0].source, EntityId::new("n"));
    assert_eq!(collection.backlinks[0].name, "the project");

    // The backlink counts into the target's relational mass.
    assert_eq!(collection.relational_aliveness, 1.0);

    let note = store.get(&EntityId::new("n")).unwrap();
    assert_eq!(note.links.len(), 1);
    assert_eq!(note.links[0].entity, EntityId::new("c"));
}

#[test]
fn backlink_context_scopes_to_the_enclosing_block() {
    let store = setup(vec![
        record("c", "collection"),
        note_with_content("n", "intro\n\nthe [ref](user://c) paragraph\n\noutro"),
    ]);

    let collection = store.get(&EntityId::new("c")).unwrap();
    assert_eq!(collection.backlinks[0].context, "the [ref](user://c) paragraph");
}

#[test]
fn external_scheme_references_are_ignored() {
    let store = setup(vec![
        record("c", "collection"),
        note_with_content("n", "[web](https://example.com) and [c](user://c)"),
    ]);

    let note = store.get(&EntityId::new("n")).unwrap();
    assert_eq!(note.links.len(), 1);
    assert_eq!(note.links[0].path, "user://c");
}

#[test]
fn content_change_replaces_only_that_sources_backlinks() {
    let mut store = setup(vec![
        record("c", "collection"),
        record("d", "collection"),
        note_with_content("n", "[c](user://c)"),
        note_with_content("m", "[c too](user://c)"),
    ]);
    let c = EntityId::new("c");
    let n = EntityId::new("n");

    assert_eq!(store.get(&c).unwrap().backlinks.len(), 2);

    store.set_content(&n, "now about [d](user://d)").unwrap();

    let collection_c = store.get(&c).unwrap();
    assert_eq!(collection_c.backlinks.len(), 1);
    assert_eq!(collection_c.backlinks[0].source, EntityId::new("m"));

    let collection_d = store.get(&EntityId::new("d")).unwrap();
    assert_eq!(collection_d.backlinks.len(), 1);
    assert_eq!(collection_d.backlinks[0].source, n);
}

#[test]
fn clearing_content_removes_the_backlink() {
    let mut store = setup(vec![
        record("c", "collection"),
        note_with_content("n", "[c](user://c)"),
    ]);
    let c = EntityId::new("c");

    store.set_content(&EntityId::new("n"), "no references left").unwrap();
    assert!(store.get(&c).unwrap().backlinks.is_empty());
}

#[test]
fn dangling_link_targets_are_tolerated() {
    let store = setup(vec![note_with_content("n", "[ghost](user://ghost)")]);

    let note = store.get(&EntityId::new("n")).unwrap();
    assert_eq!(note.links.len(), 1);
    assert_eq!(note.links[0].entity, EntityId::new("ghost"));
    // No target to carry the backlink; the forward link simply stays.
    assert!(store.get(&EntityId::new("ghost")).is_none());
}

#[test]
fn multiple_references_from_one_source_all_surface() {
    let store = setup(vec![
        record("c", "collection"),
        record("d", "collection"),
        note_with_content("n", "[one](user://c) then [two](user://d) then [again](user://c)"),
    ]);

    let note = store.get(&EntityId::new("n")).unwrap();
    assert_eq!(note.links.len(), 3);
    assert_eq!(store.get(&EntityId::new("c")).unwrap().backlinks.len(), 2);
    assert_eq!(store.get(&EntityId::new("d")).unwrap().backlinks.len(), 1);
}
