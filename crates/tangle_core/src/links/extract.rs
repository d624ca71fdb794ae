//! Link extraction from entity content.
//!
//! # Responsibility
//! - Define the content parser collaborator contract.
//! - Filter parsed references down to internal `user://` targets and shape
//!   them into `EntityLink` values.
//!
//! # Invariants
//! - Occurrence order follows document order.
//! - References without the internal scheme prefix are ignored.

use crate::model::entity::EntityId;
use once_cell::sync::Lazy;
use regex::Regex;

/// Scheme marker selecting internal entity references.
pub const INTERNAL_REF_SCHEME: &str = "user://";

static INLINE_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").expect("valid inline ref regex"));

/// One reference occurrence produced by a content parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceOccurrence {
    /// Raw reference target, scheme included.
    pub target: String,
    /// Human-readable label.
    pub label: String,
    /// Nearest enclosing block-level content, used to scope backlink
    /// display.
    pub context: String,
}

/// Content parser collaborator contract.
///
/// Implementations return every reference occurrence in document order;
/// the engine decides which occurrences are internal.
pub trait ReferenceParser {
    fn parse(&self, content: &str) -> Vec<ReferenceOccurrence>;
}

/// Default parser over markdown-style inline references `[label](target)`.
///
/// The enclosing block is the blank-line delimited paragraph containing
/// the reference.
#[derive(Debug, Default)]
pub struct MarkdownReferenceParser;

impl ReferenceParser for MarkdownReferenceParser {
    fn parse(&self, content: &str) -> Vec<ReferenceOccurrence> {
        INLINE_REF_RE
            .captures_iter(content)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let label = caps.get(1)?.as_str().trim().to_string();
                let target = caps.get(2)?.as_str().trim().to_string();
                if target.is_empty() {
                    return None;
                }
                Some(ReferenceOccurrence {
                    target,
                    label,
                    context: enclosing_block(content, whole.start()).to_string(),
                })
            })
            .collect()
    }
}

/// A directed content-derived reference between two entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityLink {
    /// Human-readable label from the reference.
    pub name: String,
    /// Raw reference path, scheme included.
    pub path: String,
    /// Entity whose content carries the reference.
    pub source: EntityId,
    /// Referenced entity id.
    pub entity: EntityId,
    /// Nearest enclosing block-level content around the reference.
    pub context: String,
}

/// Derives outgoing links for one entity's content.
///
/// Only occurrences whose target carries the internal scheme prefix are
/// consumed; every other reference form passes through untouched.
pub fn extract_links(
    source: &EntityId,
    content: &str,
    parser: &dyn ReferenceParser,
) -> Vec<EntityLink> {
    parser
        .parse(content)
        .into_iter()
        .filter_map(|occurrence| {
            let target_id = occurrence.target.strip_prefix(INTERNAL_REF_SCHEME)?;
            if target_id.is_empty() {
                return None;
            }
            Some(EntityLink {
                name: occurrence.label,
                path: occurrence.target.clone(),
                source: source.clone(),
                entity: EntityId::new(target_id),
                context: occurrence.context,
            })
        })
        .collect()
}

fn enclosing_block(content: &str, offset: usize) -> &str {
    let start = content[..offset]
        .rfind("\n\n")
        .map(|position| position + 2)
        .unwrap_or(0);
    let end = content[offset..]
        .find("\n\n")
        .map(|position| offset + position)
        .unwrap_or(content.len());
    content[start..end].trim()
}
