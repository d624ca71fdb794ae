use std::sync::Arc;
use tangle_core::{EntityId, EntityRecord, EntityStore, ManualClock, QueryFilter};

fn setup() -> EntityStore {
    EntityStore::with_clock(Arc::new(ManualClock::starting_at(1_000)))
}

fn record(id: &str, kind: &str) -> EntityRecord {
    EntityRecord {
        id: id.to_string(),
        kind: kind.to_string(),
        ..EntityRecord::default()
    }
}

#[test]
fn unknown_kinds_are_skipped_and_load_continues() {
    let mut store = setup();
    let report = store.load(vec![
        record("n", "note"),
        record("weird", "hologram"),
        record("t", "task"),
    ]);

    assert_eq!(report.loaded, 2);
    assert_eq!(report.skipped_kinds, 1);
    assert!(store.get(&EntityId::new("weird")).is_none());
    assert!(store.get(&EntityId::new("n")).is_some());
    assert!(store.get(&EntityId::new("t")).is_some());
}

#[test]
fn dangling_child_ids_are_dropped_with_a_warning() {
    let mut store = setup();
    let report = store.load(vec![
        EntityRecord {
            entities: vec!["real".to_string(), "ghost".to_string()],
            ..record("inbox", "collection")
        },
        record("real", "note"),
    ]);

    assert!(report.dangling_refs >= 1);
    assert_eq!(
        store.get(&EntityId::new("inbox")).unwrap().entities,
        vec![EntityId::new("real")]
    );
}

#[test]
fn dangling_parent_relations_are_kept_but_unresolved() {
    let mut store = setup();
    let mut note = record("n", "note");
    note.parents.insert("ghost".to_string(), Default::default());
    let report = store.load(vec![note]);

    assert!(report.dangling_refs >= 1);
    let loaded = store.get(&EntityId::new("n")).unwrap();
    assert_eq!(loaded.parents.len(), 1);
    assert!(!loaded.parents[0].resolved);
}

#[test]
fn resolved_parent_relations_surface_through_the_adjacency_index() {
    let mut store = setup();
    let mut note = record("n", "note");
    note.parents.insert("inbox".to_string(), Default::default());
    store.load(vec![note, record("inbox", "collection")]);

    let loaded = store.get(&EntityId::new("n")).unwrap();
    assert!(loaded.parents[0].resolved);

    let children: Vec<_> = store
        .get_children(&EntityId::new("inbox"))
        .into_iter()
        .map(|child| child.id.clone())
        .collect();
    assert_eq!(children, vec![EntityId::new("n")]);
}

#[test]
fn dangling_actor_and_context_references_are_nulled() {
    let mut store = setup();
    let report = store.load(vec![EntityRecord {
        created_by: Some("ghost".to_string()),
        updated_by: Some("ghost".to_string()),
        context: Some("ghost".to_string()),
        ..record("n", "note")
    }]);

    assert!(report.dangling_refs >= 3);
    let loaded = store.get(&EntityId::new("n")).unwrap();
    assert_eq!(loaded.created_by, None);
    assert_eq!(loaded.updated_by, None);
    assert_eq!(loaded.context, None);
}

#[test]
fn query_filters_compose_by_logical_and() {
    let mut store = setup();
    store.load(vec![
        record("a", "note"),
        EntityRecord {
            archived: true,
            ..record("b", "note")
        },
        EntityRecord {
            deleted: true,
            ..record("c", "note")
        },
        record("inbox", "collection"),
    ]);

    let archived = store.query(&QueryFilter {
        archived: Some(true),
        ..QueryFilter::default()
    });
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].id, EntityId::new("b"));

    let active_notes = store.query(&QueryFilter {
        kinds: Some([tangle_core::EntityKind::Note].into_iter().collect()),
        archived: Some(false),
        deleted: Some(false),
        ..QueryFilter::default()
    });
    assert_eq!(active_notes.len(), 1);
    assert_eq!(active_notes[0].id, EntityId::new("a"));

    let named = store.query_where(&QueryFilter::default(), |entity| {
        entity.name == "Untitled note"
    });
    assert_eq!(named.len(), 3);
}

#[test]
fn serialization_round_trips_through_json() {
    let mut store = setup();
    let mut filed = record("filed", "note");
    filed.parents.insert(
        "inbox".to_string(),
        tangle_core::ParentRelationRecord {
            created_at: 10,
            updated_at: 20,
            properties: Default::default(),
        },
    );
    store.load(vec![
        EntityRecord {
            entities: vec!["filed".to_string()],
            ..record("inbox", "collection")
        },
        filed,
        EntityRecord {
            content: Some("[inbox](user://inbox)".to_string()),
            ..record("n", "note")
        },
    ]);

    let json = serde_json::to_string(&store.to_records()).unwrap();
    let records: Vec<EntityRecord> = serde_json::from_str(&json).unwrap();

    let mut restored = setup();
    let report = restored.load(records);
    assert_eq!(report.loaded, 3);
    assert_eq!(report.skipped_kinds, 0);

    let inbox = restored.get(&EntityId::new("inbox")).unwrap();
    assert_eq!(inbox.entities, vec![EntityId::new("filed")]);
    assert_eq!(inbox.backlinks.len(), 1);

    let filed = restored.get(&EntityId::new("filed")).unwrap();
    assert_eq!(filed.parents.len(), 1);
    assert_eq!(filed.parents[0].id, EntityId::new("inbox"));
    assert_eq!(filed.parents[0].created_at, 10);
}

#[test]
fn serialized_records_flatten_relations_and_omit_nulls() {
    let mut store = setup();
    let mut filed = record("filed", "note");
    filed.parents.insert("inbox".to_string(), Default::default());
    store.load(vec![filed, record("inbox", "collection")]);

    let records = store.to_records();
    let filed_json = serde_json::to_value(
        records
            .iter()
            .find(|candidate| candidate.id == "filed")
            .unwrap(),
    )
    .unwrap();

    let object = filed_json.as_object().unwrap();
    assert!(object.contains_key("parents"));
    assert!(object["parents"]["inbox"]["created_at"].is_number());
    assert!(!object.contains_key("deleted"));
    assert!(!object.contains_key("deleted_at"));
    assert!(!object.contains_key("source"));
    assert!(!object.contains_key("completed"));
}
