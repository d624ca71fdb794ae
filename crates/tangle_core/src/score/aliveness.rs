//! Aliveness: the "what matters now" ranking signal.
//!
//! # Responsibility
//! - Compute per-entity temporal decay and relational mass.
//! - Normalize both against the current graph's maxima into one score.
//!
//! # Invariants
//! - `aliveness` is in [0, 1] for every entity.
//! - Scores are graph-relative: they must be recomputed whenever the
//!   graph's structure or timestamps change materially (on load and on
//!   every create).

use crate::model::entity::{Entity, EntityId};
use std::collections::{BTreeMap, BTreeSet};

/// Half-life of the recency decay, in days.
pub const ALIVENESS_HALF_LIFE_DAYS: f64 = 10.0;

const DAY_MS: f64 = 86_400_000.0;

/// Exponential recency decay from the last touch: `0.5 ^ (days / 10)`.
///
/// A touch in the future clamps to a full score of 1.
pub fn temporal_aliveness(last_touched_ms: i64, now_ms: i64) -> f64 {
    let elapsed_days = now_ms.saturating_sub(last_touched_ms).max(0) as f64 / DAY_MS;
    0.5_f64.powf(elapsed_days / ALIVENESS_HALF_LIFE_DAYS)
}

/// Recomputes temporal, relational and combined aliveness for the whole
/// graph. Cheap full recompute; graphs stay small.
pub fn recompute_aliveness(entities: &mut BTreeMap<EntityId, Entity>, now_ms: i64) {
    let descendants = descendant_counts(entities);

    let mut max_relational = 0.0_f64;
    let mut max_temporal = 0.0_f64;
    let ids: Vec<EntityId> = entities.keys().cloned().collect();

    for id in &ids {
        let descendant_count = descendants.get(id).copied().unwrap_or(0);
        if let Some(entity) = entities.get_mut(id) {
            let relational = (entity.backlinks.len()
                + entity.links.len()
                + descendant_count
                + entity.parents.len()) as f64;
            let temporal = temporal_aliveness(entity.last_touched_at(), now_ms);
            entity.relational_aliveness = relational;
            entity.temporal_aliveness = temporal;
            max_relational = max_relational.max(relational);
            max_temporal = max_temporal.max(temporal);
        }
    }

    for id in &ids {
        if let Some(entity) = entities.get_mut(id) {
            let relational_share = if max_relational > 0.0 {
                entity.relational_aliveness / max_relational
            } else {
                0.0
            };
            let temporal_share = if max_temporal > 0.0 {
                entity.temporal_aliveness / max_temporal
            } else {
                0.0
            };
            entity.aliveness = 0.5 * relational_share + 0.5 * temporal_share;
        }
    }
}

/// Counts descendants reachable through active-member lists.
///
/// Memoized per entity within one pass. The per-path visited set guards
/// against double counting if containment were ever inconsistent; the
/// graph is acyclic by construction.
fn descendant_counts(entities: &BTreeMap<EntityId, Entity>) -> BTreeMap<EntityId, usize> {
    let mut memo = BTreeMap::new();
    let mut path = BTreeSet::new();
    for id in entities.keys() {
        count_descendants(entities, id, &mut memo, &mut path);
    }
    memo
}

fn count_descendants(
    entities: &BTreeMap<EntityId, Entity>,
    id: &EntityId,
    memo: &mut BTreeMap<EntityId, usize>,
    path: &mut BTreeSet<EntityId>,
) -> usize {
    if let Some(&count) = memo.get(id) {
        return count;
    }
    if !path.insert(id.clone()) {
        return 0;
    }

    let mut total = 0;
    let members: Vec<EntityId> = entities
        .get(id)
        .map(|entity| entity.entities.clone())
        .unwrap_or_default();
    for member in &members {
        if entities.contains_key(member) {
            total += 1 + count_descendants(entities, member, memo, path);
        }
    }

    path.remove(id);
    memo.insert(id.clone(), total);
    total
}
