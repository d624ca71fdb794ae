//! Core domain logic for Tangle.
//! This crate is the single source of truth for graph invariants.

pub mod clock;
pub mod links;
pub mod logging;
pub mod model;
pub mod score;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use links::extract::{
    extract_links, EntityLink, MarkdownReferenceParser, ReferenceOccurrence, ReferenceParser,
    INTERNAL_REF_SCHEME,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::entity::{Entity, EntityError, EntityId, ParentRelation};
pub use model::kind::{Capability, EntityKind, KindError, KindSpec, KINDS};
pub use model::record::{EntityRecord, ParentRelationRecord};
pub use score::aliveness::{recompute_aliveness, temporal_aliveness, ALIVENESS_HALF_LIFE_DAYS};
pub use store::engine::{
    EntityStore, LoadReport, NewEntity, QueryFilter, StoreError, StoreResult,
};
pub use store::events::{
    CreateOrigin, EntityEvent, EntityOp, EventFilter, ListenerId,
    DEFAULT_UPDATE_COALESCE_WINDOW_MS,
};
pub use store::stream::{
    StreamOutcome, StreamSource, STREAM_STATUS_COMPLETE, STREAM_STATUS_FAILED,
    STREAM_STATUS_PROPERTY, STREAM_STATUS_STREAMING,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
