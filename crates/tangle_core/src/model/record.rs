//! Canonical flat entity records.
//!
//! # Responsibility
//! - Define the load-input and serialization-output shape of one entity.
//! - Build live entities from records through the registry-driven factory.
//!
//! # Invariants
//! - Null-valued fields are omitted from serialized records entirely.
//! - Relation and actor references are flattened to plain id strings.
//! - `kind` stays a free string in the record so unrecognized kinds can be
//!   skipped with a warning at load instead of failing the whole batch.

use crate::model::entity::{Entity, EntityId, ParentRelation};
use crate::model::kind::{Capability, EntityKind, KindError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Flattened parent relation keyed by parent id in the record shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParentRelationRecord {
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

/// One flat entity record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<i64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub draft: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Ordered active-member ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,
    /// Parent relations keyed by parent id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parents: BTreeMap<String, ParentRelationRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

impl EntityRecord {
    /// Builds a live entity through the registry-driven factory.
    ///
    /// Layering order: base lifecycle fields, then kind defaults, then the
    /// record's own values, then relation normalization (the keyed map
    /// already guarantees unique parent ids). Capability-carried fields
    /// are kept only when the kind carries the capability.
    pub fn into_entity(self, now: i64) -> Result<Entity, KindError> {
        let kind = EntityKind::parse(&self.kind)?;
        let spec = kind.spec();

        let mut properties = spec.default_properties();
        properties.extend(self.properties);

        let created_at = self.created_at.unwrap_or(now);
        let updated_at = self.updated_at.unwrap_or(created_at);

        let parents = self
            .parents
            .into_iter()
            .map(|(parent_id, relation)| ParentRelation {
                id: EntityId::new(parent_id),
                created_at: relation.created_at,
                updated_at: relation.updated_at,
                properties: relation.properties,
                resolved: false,
            })
            .collect();

        Ok(Entity {
            id: EntityId::new(self.id),
            kind,
            name: self
                .name
                .unwrap_or_else(|| spec.default_name.to_string()),
            content: if kind.has_capability(Capability::ContentEditable) {
                Some(self.content.unwrap_or_default())
            } else {
                None
            },
            properties,
            parents,
            entities: self.entities.into_iter().map(EntityId::new).collect(),
            links: Vec::new(),
            backlinks: Vec::new(),
            created_at,
            updated_at,
            created_by: self.created_by.map(EntityId::new),
            updated_by: self.updated_by.map(EntityId::new),
            deleted: self.deleted,
            deleted_at: self.deleted_at,
            deleted_by: self.deleted_by.map(EntityId::new),
            archived: self.archived,
            archived_at: self.archived_at,
            draft: self.draft,
            completed: if kind.has_capability(Capability::Completable) {
                Some(self.completed.unwrap_or(false))
            } else {
                None
            },
            completed_at: if kind.has_capability(Capability::Completable) {
                self.completed_at
            } else {
                None
            },
            source: if kind.has_capability(Capability::HasSource) {
                self.source
            } else {
                None
            },
            context: self.context.map(EntityId::new),
            temporal_aliveness: 0.0,
            relational_aliveness: 0.0,
            aliveness: 0.0,
        })
    }
}

impl Entity {
    /// Serializes this entity into its canonical flat record.
    ///
    /// Derived fields (links, backlinks, aliveness) are not part of the
    /// record; they are rebuilt at load.
    pub fn to_record(&self) -> EntityRecord {
        EntityRecord {
            id: self.id.as_str().to_string(),
            kind: self.kind.as_str().to_string(),
            name: Some(self.name.clone()),
            content: self.content.clone(),
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
            created_by: self.created_by.as_ref().map(|id| id.as_str().to_string()),
            updated_by: self.updated_by.as_ref().map(|id| id.as_str().to_string()),
            deleted: self.deleted,
            deleted_at: self.deleted_at,
            deleted_by: self.deleted_by.as_ref().map(|id| id.as_str().to_string()),
            archived: self.archived,
            archived_at: self.archived_at,
            draft: self.draft,
            completed: self.completed,
            completed_at: self.completed_at,
            source: self.source.clone(),
            context: self.context.as_ref().map(|id| id.as_str().to_string()),
            entities: self
                .entities
                .iter()
                .map(|id| id.as_str().to_string())
                .collect(),
            parents: self
                .parents
                .iter()
                .map(|relation| {
                    (
                        relation.id.as_str().to_string(),
                        ParentRelationRecord {
                            created_at: relation.created_at,
                            updated_at: relation.updated_at,
                            properties: relation.properties.clone(),
                        },
                    )
                })
                .collect(),
            properties: self.properties.clone(),
        }
    }
}
