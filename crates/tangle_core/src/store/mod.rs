//! The entity graph store.
//!
//! # Responsibility
//! - Own the canonical entity instances and every derived index.
//! - Route all mutations through one place so index maintenance and event
//!   emission stay consistent.
//!
//! # Invariants
//! - Entities are mutated only through the store; they never know they
//!   are observed.
//! - Deleted entities stay in the id index as tombstones.
//!
//! # See also
//! - docs/architecture/entity-graph.md

pub mod engine;
pub mod events;
pub mod stream;
