//! Ranking signals computed over the whole graph.
//!
//! # Responsibility
//! - Compute the aliveness blend of recency decay and connectivity mass.

pub mod aliveness;
