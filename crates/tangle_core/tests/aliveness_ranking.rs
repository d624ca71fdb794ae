use std::sync::Arc;
use tangle_core::{CreateOrigin, EntityId, EntityKind, EntityRecord, EntityStore, ManualClock, NewEntity};

const DAY_MS: i64 = 86_400_000;

fn record(id: &str, kind: &str, touched_at: i64) -> EntityRecord {
    EntityRecord {
        id: id.to_string(),
        kind: kind.to_string(),
        created_at: Some(touched_at),
        updated_at: Some(touched_at),
        ..EntityRecord::default()
    }
}

fn setup(now: i64, records: Vec<EntityRecord>) -> EntityStore {
    let mut store = EntityStore::with_clock(Arc::new(ManualClock::starting_at(now)));
    store.load(records);
    store
}

#[test]
fn aliveness_is_bounded_for_every_entity() {
    let now = 100 * DAY_MS;
    let store = setup(
        now,
        vec![
            record("fresh", "note", now),
            record("aging", "note", now - 15 * DAY_MS),
            record("stale", "note", now - 80 * DAY_MS),
            record("inbox", "collection", now - 5 * DAY_MS),
        ],
    );

    for entity in store.query(&Default::default()) {
        assert!(entity.aliveness >= 0.0, "{} below range", entity.id);
        assert!(entity.aliveness <= 1.0, "{} above range", entity.id);
        assert!(entity.temporal_aliveness > 0.0);
        assert!(entity.temporal_aliveness <= 1.0);
    }
}

#[test]
fn most_recent_and_most_connected_entity_ranks_first() {
    let now = 100 * DAY_MS;
    let mut hub = record("hub", "collection", now);
    hub.entities = vec!["member".to_string()];
    let mut member = record("member", "note", now - 40 * DAY_MS);
    member
        .parents
        .insert("hub".to_string(), Default::default());

    let store = setup(
        now,
        vec![
            hub,
            member,
            record("loner", "note", now - 40 * DAY_MS),
            EntityRecord {
                content: Some("[hub](user://hub)".to_string()),
                ..record("fan", "note", now - 2 * DAY_MS)
            },
        ],
    );

    let hub_score = store.get(&EntityId::new("hub")).unwrap().aliveness;
    for entity in store.query(&Default::default()) {
        assert!(
            hub_score >= entity.aliveness,
            "hub should dominate, lost to {}",
            entity.id
        );
    }

    // Backlink + contained member: mass of 2.
    assert_eq!(
        store.get(&EntityId::new("hub")).unwrap().relational_aliveness,
        2.0
    );
}

#[test]
fn equal_mass_breaks_on_recency() {
    let now = 100 * DAY_MS;
    let store = setup(
        now,
        vec![
            record("recent", "note", now - DAY_MS),
            record("old", "note", now - 50 * DAY_MS),
        ],
    );

    let recent = store.get(&EntityId::new("recent")).unwrap().aliveness;
    let old = store.get(&EntityId::new("old")).unwrap().aliveness;
    assert!(recent > old);
}

#[test]
fn parent_relations_count_into_relational_mass() {
    let now = 10 * DAY_MS;
    let mut child = record("child", "note", now);
    child
        .parents
        .insert("inbox".to_string(), Default::default());
    let mut inbox = record("inbox", "collection", now);
    inbox.entities = vec!["child".to_string()];

    let store = setup(now, vec![inbox, child]);

    // inbox: one descendant; child: one parent relation.
    assert_eq!(
        store.get(&EntityId::new("inbox")).unwrap().relational_aliveness,
        1.0
    );
    assert_eq!(
        store.get(&EntityId::new("child")).unwrap().relational_aliveness,
        1.0
    );
}

#[test]
fn create_recomputes_scores_for_the_whole_graph() {
    let now = 10 * DAY_MS;
    let mut store = EntityStore::with_clock(Arc::new(ManualClock::starting_at(now)));

    let first = store
        .create(NewEntity::of(EntityKind::Note), CreateOrigin::User)
        .unwrap();

    // Alone in the graph: zero mass (share 0) and maximal recency
    // (share 1) blend to 0.5.
    let score = store.get(&first).unwrap().aliveness;
    assert!((score - 0.5).abs() < 1e-9);

    let second = store
        .create(NewEntity::of(EntityKind::Note), CreateOrigin::User)
        .unwrap();
    assert!(store.get(&second).unwrap().aliveness > 0.0);
}
