//! Entity kind registry and capability composition.
//!
//! # Responsibility
//! - Define the closed set of entity kinds and the capability set of each.
//! - Provide per-kind defaults consumed by the entity factory.
//!
//! # Invariants
//! - `KINDS` is the full closed set; `EntityKind::spec` is total over it.
//! - Capability membership is static per kind, never per instance.
//! - Exactly one `User` entity may exist in a loaded graph (enforced by
//!   the store, declared here via `user_creatable = false`).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Closed type tag selecting an entity's default fields and capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// The signed-in user's root entity. Singleton per graph.
    User,
    /// Ordered container grouping other entities.
    Collection,
    /// Free-form markdown note.
    Note,
    /// Actionable item with completion state.
    Task,
    /// AI conversation with streamed content.
    Chat,
    /// External media (image, file) referenced by source.
    Media,
}

/// Stable string id for the `user` kind.
pub const KIND_USER: &str = "user";
/// Stable string id for the `collection` kind.
pub const KIND_COLLECTION: &str = "collection";
/// Stable string id for the `note` kind.
pub const KIND_NOTE: &str = "note";
/// Stable string id for the `task` kind.
pub const KIND_TASK: &str = "task";
/// Stable string id for the `chat` kind.
pub const KIND_CHAT: &str = "chat";
/// Stable string id for the `media` kind.
pub const KIND_MEDIA: &str = "media";

/// The full closed, ordered kind set.
pub const KINDS: &[EntityKind] = &[
    EntityKind::User,
    EntityKind::Collection,
    EntityKind::Note,
    EntityKind::Task,
    EntityKind::Chat,
    EntityKind::Media,
];

impl EntityKind {
    /// Stable string id used in records and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => KIND_USER,
            Self::Collection => KIND_COLLECTION,
            Self::Note => KIND_NOTE,
            Self::Task => KIND_TASK,
            Self::Chat => KIND_CHAT,
            Self::Media => KIND_MEDIA,
        }
    }

    /// Parses one kind from its stable string id.
    pub fn parse(value: &str) -> Result<EntityKind, KindError> {
        match value.trim() {
            KIND_USER => Ok(Self::User),
            KIND_COLLECTION => Ok(Self::Collection),
            KIND_NOTE => Ok(Self::Note),
            KIND_TASK => Ok(Self::Task),
            KIND_CHAT => Ok(Self::Chat),
            KIND_MEDIA => Ok(Self::Media),
            other => Err(KindError::UnsupportedKind(other.to_string())),
        }
    }

    /// Registry entry for this kind.
    pub fn spec(self) -> &'static KindSpec {
        match self {
            Self::User => &USER_SPEC,
            Self::Collection => &COLLECTION_SPEC,
            Self::Note => &NOTE_SPEC,
            Self::Task => &TASK_SPEC,
            Self::Chat => &CHAT_SPEC,
            Self::Media => &MEDIA_SPEC,
        }
    }

    /// Capability membership test.
    pub fn has_capability(self, capability: Capability) -> bool {
        self.spec().has_capability(capability)
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behavior an entity kind composes in addition to the base contract.
///
/// Code that needs kind-specific behavior checks capability membership
/// instead of matching on the kind tag, so new kinds only have to declare
/// the capabilities they carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Carries free-form `content`; content replacement re-derives links.
    ContentEditable,
    /// Carries `completed`/`completed_at` and supports `mark_complete`.
    Completable,
    /// Eligible for kind conversion.
    Convertible,
    /// Carries an external `source` reference.
    HasSource,
    /// Supports incremental content streaming.
    Streamable,
}

impl Capability {
    /// Stable string id used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContentEditable => "content_editable",
            Self::Completable => "completable",
            Self::Convertible => "convertible",
            Self::HasSource => "has_source",
            Self::Streamable => "streamable",
        }
    }
}

/// Registry entry: defaults and capability composition for one kind.
#[derive(Debug)]
pub struct KindSpec {
    pub kind: EntityKind,
    /// Human-readable name given to unnamed instances.
    pub default_name: &'static str,
    pub capabilities: &'static [Capability],
    /// Whether end users may create instances directly.
    pub user_creatable: bool,
    /// Whether fresh instances begin in the draft state.
    pub starts_as_draft: bool,
}

static USER_SPEC: KindSpec = KindSpec {
    kind: EntityKind::User,
    default_name: "User",
    capabilities: &[],
    user_creatable: false,
    starts_as_draft: false,
};

static COLLECTION_SPEC: KindSpec = KindSpec {
    kind: EntityKind::Collection,
    default_name: "New collection",
    capabilities: &[Capability::Convertible],
    user_creatable: true,
    starts_as_draft: false,
};

static NOTE_SPEC: KindSpec = KindSpec {
    kind: EntityKind::Note,
    default_name: "Untitled note",
    capabilities: &[Capability::ContentEditable, Capability::Convertible],
    user_creatable: true,
    starts_as_draft: false,
};

static TASK_SPEC: KindSpec = KindSpec {
    kind: EntityKind::Task,
    default_name: "Untitled task",
    capabilities: &[
        Capability::ContentEditable,
        Capability::Completable,
        Capability::Convertible,
    ],
    user_creatable: true,
    starts_as_draft: false,
};

static CHAT_SPEC: KindSpec = KindSpec {
    kind: EntityKind::Chat,
    default_name: "New chat",
    capabilities: &[Capability::ContentEditable, Capability::Streamable],
    user_creatable: true,
    starts_as_draft: true,
};

static MEDIA_SPEC: KindSpec = KindSpec {
    kind: EntityKind::Media,
    default_name: "Untitled media",
    capabilities: &[Capability::HasSource],
    user_creatable: false,
    starts_as_draft: false,
};

impl KindSpec {
    /// Capability membership test.
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Default property map instances of this kind start with.
    ///
    /// Conversion between kinds removes keys exclusive to the old kind and
    /// reinstates keys exclusive to the new kind at these defaults.
    pub fn default_properties(&self) -> BTreeMap<String, Value> {
        let mut properties = BTreeMap::new();
        match self.kind {
            EntityKind::User | EntityKind::Collection => {}
            EntityKind::Note => {
                properties.insert("pinned".to_string(), json!(false));
            }
            EntityKind::Task => {
                properties.insert("priority".to_string(), json!("normal"));
            }
            EntityKind::Chat => {
                properties.insert("status".to_string(), json!("idle"));
            }
            EntityKind::Media => {
                properties.insert(
                    "mime_type".to_string(),
                    json!("application/octet-stream"),
                );
            }
        }
        properties
    }
}

/// Kind registry errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindError {
    /// The given kind string is not in the closed set.
    UnsupportedKind(String),
}

impl Display for KindError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedKind(value) => write!(f, "unsupported entity kind: `{value}`"),
        }
    }
}

impl Error for KindError {}
