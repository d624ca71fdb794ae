//! Entity domain model.
//!
//! # Responsibility
//! - Define the canonical entity record shared by every kind.
//! - Provide the mechanical mutation operations the store layers
//!   validation, index maintenance and event emission above.
//!
//! # Invariants
//! - `id` is stable and never reused for another entity.
//! - `entities` (the ordered active-member list) never contains an
//!   archived or deleted member.
//! - Parent relation ids are unique within one entity.
//! - Capability-gated operations fail instead of silently no-oping.
//!
//! # See also
//! - docs/architecture/entity-graph.md

use crate::links::extract::EntityLink;
use crate::model::kind::{Capability, EntityKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Opaque stable entity identifier.
///
/// Generated ids are UUID v4 text; ids arriving in load records are kept
/// verbatim, whatever their shape.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wraps an existing stable id.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generates a fresh id for a new entity.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One edge from an entity to a parent.
///
/// The relation stores the parent id rather than a live pointer; graph
/// resolution validates the id and marks `resolved`. A dangling relation
/// (parent no longer loaded) is tolerated and logged, never fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentRelation {
    /// The parent entity's id.
    pub id: EntityId,
    pub created_at: i64,
    pub updated_at: i64,
    /// Free-form per-relation properties (e.g. pin position).
    pub properties: BTreeMap<String, Value>,
    /// Whether the parent id was found in the loaded graph.
    pub resolved: bool,
}

/// Errors from entity-level operations.
///
/// `NotMember` and `OrderSetMismatch` are the two shapes of invalid
/// membership: removing an id that is not a current member, and reordering
/// with an id set that does not match the current member set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityError {
    /// Insertion would make an entity its own ancestor.
    RecursiveContainment { source: EntityId, target: EntityId },
    /// Removal target is not a current active member.
    NotMember { entity: EntityId, member: EntityId },
    /// Reorder input is not a permutation of the current member set.
    OrderSetMismatch { entity: EntityId },
    /// Operation requires a capability the entity's kind does not carry.
    CapabilityMissing {
        entity: EntityId,
        capability: Capability,
    },
    /// Conversion from or to a kind the registry flags non-convertible.
    NotConvertible { entity: EntityId, kind: EntityKind },
}

impl Display for EntityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RecursiveContainment { source, target } => write!(
                f,
                "inserting {target} into {source} would create a containment cycle"
            ),
            Self::NotMember { entity, member } => {
                write!(f, "{member} is not an active member of {entity}")
            }
            Self::OrderSetMismatch { entity } => {
                write!(f, "new order for {entity} does not match its member set")
            }
            Self::CapabilityMissing { entity, capability } => write!(
                f,
                "entity {entity} does not carry the {} capability",
                capability.as_str()
            ),
            Self::NotConvertible { entity, kind } => {
                write!(f, "kind {kind} of entity {entity} is not convertible")
            }
        }
    }
}

impl Error for EntityError {}

/// A uniquely identified domain object of one fixed kind.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    /// Free-form markdown body. Present only for content-editable kinds.
    pub content: Option<String>,
    /// Kind-specific and user-set properties.
    pub properties: BTreeMap<String, Value>,
    /// Relations to parents. Ids unique, order is registration order.
    pub parents: Vec<ParentRelation>,
    /// Ordered active members contained by this entity.
    pub entities: Vec<EntityId>,
    /// Outgoing references derived from content.
    pub links: Vec<EntityLink>,
    /// Incoming references derived from other entities' content.
    pub backlinks: Vec<EntityLink>,

    pub created_at: i64,
    pub updated_at: i64,
    pub created_by: Option<EntityId>,
    pub updated_by: Option<EntityId>,

    pub deleted: bool,
    pub deleted_at: Option<i64>,
    pub deleted_by: Option<EntityId>,
    pub archived: bool,
    pub archived_at: Option<i64>,
    pub draft: bool,

    /// Present only for completable kinds.
    pub completed: Option<bool>,
    pub completed_at: Option<i64>,
    /// External source reference. Present only for has-source kinds.
    pub source: Option<String>,
    /// Optional id reference scoping this entity (e.g. a chat's subject).
    pub context: Option<EntityId>,

    /// Recency decay component of the ranking signal.
    pub temporal_aliveness: f64,
    /// Connectivity mass component of the ranking signal.
    pub relational_aliveness: f64,
    /// Normalized, graph-relative ranking signal in [0, 1].
    pub aliveness: f64,
}

impl Entity {
    /// Later of creation and last update.
    pub fn last_touched_at(&self) -> i64 {
        self.created_at.max(self.updated_at)
    }

    /// Whether this entity participates in active-member lists.
    pub fn is_active(&self) -> bool {
        !self.deleted && !self.archived
    }

    /// Stamps the update timestamp and actor.
    pub fn touch(&mut self, now: i64, actor: Option<&EntityId>) {
        self.updated_at = now;
        if let Some(actor) = actor {
            self.updated_by = Some(actor.clone());
        }
    }

    /// Looks up the relation to one parent.
    pub fn parent_relation(&self, parent: &EntityId) -> Option<&ParentRelation> {
        self.parents.iter().find(|relation| relation.id == *parent)
    }

    /// Registers a relation to `parent`. Idempotent: returns `false` when
    /// the relation already exists and leaves it untouched.
    pub fn add_parent_relation(
        &mut self,
        parent: &EntityId,
        properties: BTreeMap<String, Value>,
        now: i64,
    ) -> bool {
        if self.parent_relation(parent).is_some() {
            return false;
        }
        self.parents.push(ParentRelation {
            id: parent.clone(),
            created_at: now,
            updated_at: now,
            properties,
            resolved: true,
        });
        true
    }

    /// Removes the relation to `parent`. Returns whether it existed.
    pub fn remove_parent_relation(&mut self, parent: &EntityId) -> bool {
        let before = self.parents.len();
        self.parents.retain(|relation| relation.id != *parent);
        self.parents.len() != before
    }

    /// Direct active-membership test.
    pub fn is_member(&self, id: &EntityId) -> bool {
        self.entities.iter().any(|member| member == id)
    }

    /// Splices `ids` into the active-member list at `index` (clamped).
    ///
    /// Already-contained ids are skipped. Insertion runs over the input in
    /// reverse so the final ordering matches caller intent. Returns the
    /// ids actually inserted, in input order.
    pub fn insert_members(&mut self, index: usize, ids: &[EntityId]) -> Vec<EntityId> {
        let mut seen = BTreeSet::new();
        let incoming: Vec<EntityId> = ids
            .iter()
            .filter(|id| !self.is_member(id) && seen.insert((*id).clone()))
            .cloned()
            .collect();
        let index = index.min(self.entities.len());
        for id in incoming.iter().rev() {
            self.entities.insert(index, id.clone());
        }
        incoming
    }

    /// Removes one id from the active-member list only; the parent
    /// relation on the member is untouched.
    pub fn remove_member(&mut self, id: &EntityId) -> Result<(), EntityError> {
        match self.entities.iter().position(|member| member == id) {
            Some(position) => {
                self.entities.remove(position);
                Ok(())
            }
            None => Err(EntityError::NotMember {
                entity: self.id.clone(),
                member: id.clone(),
            }),
        }
    }

    /// Replaces the active-member ordering.
    ///
    /// The supplied ids must be exactly the current member set (set
    /// equality, not sequence equality); otherwise the list is unchanged.
    pub fn set_member_order(&mut self, ids: Vec<EntityId>) -> Result<(), EntityError> {
        let current: BTreeSet<&EntityId> = self.entities.iter().collect();
        let supplied: BTreeSet<&EntityId> = ids.iter().collect();
        if ids.len() != self.entities.len() || current != supplied {
            return Err(EntityError::OrderSetMismatch {
                entity: self.id.clone(),
            });
        }
        self.entities = ids;
        Ok(())
    }

    /// Silently drops one id from the active-member list, if present.
    /// Used for archive/delete detachment where absence is not an error.
    pub fn detach_member(&mut self, id: &EntityId) -> bool {
        let before = self.entities.len();
        self.entities.retain(|member| member != id);
        self.entities.len() != before
    }

    /// Appends one id to the active-member list unless already present.
    /// Used for unarchive/restore reattachment.
    pub fn attach_member(&mut self, id: &EntityId) -> bool {
        if self.is_member(id) {
            return false;
        }
        self.entities.push(id.clone());
        true
    }

    /// Flags this entity archived.
    pub fn archive(&mut self, now: i64) {
        self.archived = true;
        self.archived_at = Some(now);
    }

    /// Clears the archived flag.
    pub fn unarchive(&mut self) {
        self.archived = false;
        self.archived_at = None;
    }

    /// Flags this entity deleted (tombstone; the id index keeps it).
    pub fn mark_deleted(&mut self, now: i64, actor: Option<&EntityId>) {
        self.deleted = true;
        self.deleted_at = Some(now);
        self.deleted_by = actor.cloned();
    }

    /// Clears the deleted tombstone.
    pub fn restore_deleted(&mut self) {
        self.deleted = false;
        self.deleted_at = None;
        self.deleted_by = None;
    }

    /// Replaces content. Link re-derivation is the store's job.
    pub fn set_content(&mut self, content: String) -> Result<(), EntityError> {
        self.require_capability(Capability::ContentEditable)?;
        self.content = Some(content);
        Ok(())
    }

    /// Marks a completable entity complete.
    pub fn mark_complete(&mut self, now: i64) -> Result<(), EntityError> {
        self.require_capability(Capability::Completable)?;
        self.completed = Some(true);
        self.completed_at = Some(now);
        Ok(())
    }

    /// Converts this entity to another kind.
    ///
    /// Property keys exclusive to the old kind's defaults are removed;
    /// keys exclusive to the new kind's defaults are reinstated at their
    /// defaults. Capability-carried fields (`completed`, `source`,
    /// `content`) are added or dropped to match the target kind.
    pub fn convert_kind(&mut self, to: EntityKind) -> Result<(), EntityError> {
        if !self.kind.has_capability(Capability::Convertible) {
            return Err(EntityError::NotConvertible {
                entity: self.id.clone(),
                kind: self.kind,
            });
        }
        if !to.has_capability(Capability::Convertible) {
            return Err(EntityError::NotConvertible {
                entity: self.id.clone(),
                kind: to,
            });
        }

        let old_defaults = self.kind.spec().default_properties();
        let new_defaults = to.spec().default_properties();
        for key in old_defaults.keys() {
            if !new_defaults.contains_key(key) {
                self.properties.remove(key);
            }
        }
        for (key, value) in &new_defaults {
            if !old_defaults.contains_key(key) {
                self.properties.insert(key.clone(), value.clone());
            }
        }

        let was = self.kind;
        self.kind = to;

        if !was.has_capability(Capability::Completable)
            && to.has_capability(Capability::Completable)
        {
            self.completed = Some(false);
            self.completed_at = None;
        } else if was.has_capability(Capability::Completable)
            && !to.has_capability(Capability::Completable)
        {
            self.completed = None;
            self.completed_at = None;
        }

        if !to.has_capability(Capability::HasSource) {
            self.source = None;
        }

        if !was.has_capability(Capability::ContentEditable)
            && to.has_capability(Capability::ContentEditable)
        {
            if self.content.is_none() {
                self.content = Some(String::new());
            }
        } else if was.has_capability(Capability::ContentEditable)
            && !to.has_capability(Capability::ContentEditable)
        {
            self.content = None;
            self.links.clear();
        }

        Ok(())
    }

    fn require_capability(&self, capability: Capability) -> Result<(), EntityError> {
        if self.kind.has_capability(capability) {
            return Ok(());
        }
        Err(EntityError::CapabilityMissing {
            entity: self.id.clone(),
            capability,
        })
    }
}
