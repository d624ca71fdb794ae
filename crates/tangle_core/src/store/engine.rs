//! Containment/link graph engine.
//!
//! # Responsibility
//! - Index all entities by id and kind, maintain the parent→children
//!   adjacency and the backlink index.
//! - Validate containment invariants (acyclicity, membership) above the
//!   entity layer, the way a use-case service validates above a repository.
//! - Emit typed events after every mutation.
//!
//! # Invariants
//! - At most one `User` entity exists per store.
//! - Load resolution order is fixed: children, relations, references,
//!   membership stripping, links, backlinks, aliveness. Links depend on
//!   resolved entities; backlinks depend on links; aliveness depends on
//!   all of them.
//! - Dangling references are tolerated: resolved to null/omitted with a
//!   warning, never fatal.

use crate::clock::{Clock, SystemClock};
use crate::links::extract::{extract_links, EntityLink, MarkdownReferenceParser, ReferenceParser};
use crate::model::entity::{Entity, EntityError, EntityId};
use crate::model::kind::{EntityKind, KindError};
use crate::model::record::EntityRecord;
use crate::score::aliveness::recompute_aliveness;
use crate::store::events::{
    CreateOrigin, EntityEvent, EntityOp, EventFilter, EventHub, ListenerId,
    DEFAULT_UPDATE_COALESCE_WINDOW_MS,
};
use log::warn;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Result type used by store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Unknown kind passed to the factory.
    Kind(KindError),
    /// Entity-level violation (cycle, membership, capability).
    Entity(EntityError),
    /// Target entity is not in the id index.
    EntityNotFound(EntityId),
    /// A second `User` entity was about to be created; the existing
    /// root's id is carried for diagnostics.
    DuplicateRoot(EntityId),
    /// User-origin creation of a kind the registry reserves.
    KindNotUserCreatable(EntityKind),
    /// Name is blank after trimming.
    InvalidName,
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kind(err) => write!(f, "{err}"),
            Self::Entity(err) => write!(f, "{err}"),
            Self::EntityNotFound(id) => write!(f, "entity not found: {id}"),
            Self::DuplicateRoot(id) => {
                write!(f, "a root user entity already exists: {id}")
            }
            Self::KindNotUserCreatable(kind) => {
                write!(f, "kind {kind} cannot be created by users")
            }
            Self::InvalidName => write!(f, "entity name must not be blank"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Kind(err) => Some(err),
            Self::Entity(err) => Some(err),
            _ => None,
        }
    }
}

impl From<KindError> for StoreError {
    fn from(value: KindError) -> Self {
        Self::Kind(value)
    }
}

impl From<EntityError> for StoreError {
    fn from(value: EntityError) -> Self {
        Self::Entity(value)
    }
}

/// Summary of one load pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Entities admitted to the index.
    pub loaded: usize,
    /// Records skipped because their kind is unknown.
    pub skipped_kinds: usize,
    /// Dangling child/relation/reference ids encountered and tolerated.
    pub dangling_refs: usize,
}

/// Caller-supplied initial values for `create`.
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub kind: EntityKind,
    pub name: Option<String>,
    pub content: Option<String>,
    pub properties: BTreeMap<String, Value>,
    /// Parents to register relations with. Dangling ids are skipped with
    /// a warning, matching load-time tolerance.
    pub parents: Vec<EntityId>,
    pub source: Option<String>,
    pub context: Option<EntityId>,
}

impl NewEntity {
    /// Starts a creation request for one kind.
    pub fn of(kind: EntityKind) -> Self {
        Self {
            kind,
            name: None,
            content: None,
            properties: BTreeMap::new(),
            parents: Vec::new(),
            source: None,
            context: None,
        }
    }

    pub fn named(kind: EntityKind, name: impl Into<String>) -> Self {
        let mut new = Self::of(kind);
        new.name = Some(name.into());
        new
    }
}

/// Simple composable query filter; every set field must hold (logical AND).
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub kinds: Option<BTreeSet<EntityKind>>,
    pub archived: Option<bool>,
    pub deleted: Option<bool>,
    pub has_parents: Option<bool>,
}

impl QueryFilter {
    fn matches(&self, entity: &Entity) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&entity.kind) {
                return false;
            }
        }
        if let Some(archived) = self.archived {
            if entity.archived != archived {
                return false;
            }
        }
        if let Some(deleted) = self.deleted {
            if entity.deleted != deleted {
                return false;
            }
        }
        if let Some(has_parents) = self.has_parents {
            if entity.parents.is_empty() == has_parents {
                return false;
            }
        }
        true
    }
}

/// The entity graph store. One instance per application, explicitly
/// constructed and owned by the application root.
pub struct EntityStore {
    pub(crate) entities: BTreeMap<EntityId, Entity>,
    pub(crate) kind_index: BTreeMap<EntityKind, Vec<EntityId>>,
    pub(crate) child_map: BTreeMap<EntityId, Vec<EntityId>>,
    pub(crate) hub: EventHub,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) parser: Box<dyn ReferenceParser>,
    pub(crate) signed_in: Option<EntityId>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    /// Creates a store on the system clock and the default markdown
    /// reference parser.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a store on an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entities: BTreeMap::new(),
            kind_index: BTreeMap::new(),
            child_map: BTreeMap::new(),
            hub: EventHub::new(DEFAULT_UPDATE_COALESCE_WINDOW_MS),
            clock,
            parser: Box::new(MarkdownReferenceParser),
            signed_in: None,
        }
    }

    /// Swaps the content parser collaborator.
    pub fn set_reference_parser(&mut self, parser: Box<dyn ReferenceParser>) {
        self.parser = parser;
    }

    /// Sets the identity stamped into actor fields on mutations.
    pub fn set_signed_in_user(&mut self, user: Option<EntityId>) {
        self.signed_in = user;
    }

    /// The signed-in user's entity, when known and loaded.
    pub fn signed_in_user(&self) -> Option<&Entity> {
        self.signed_in.as_ref().and_then(|id| self.entities.get(id))
    }

    // -------------------------------------------------------------------
    // Load & serialization
    // -------------------------------------------------------------------

    /// Bulk-loads a flat batch of records and resolves the graph.
    ///
    /// Records with unknown kinds are skipped with a warning; load
    /// continues. Resolution runs in a fixed order (see module docs).
    pub fn load(&mut self, records: Vec<EntityRecord>) -> LoadReport {
        let now = self.clock.now_ms();
        let mut report = LoadReport::default();

        for record in records {
            let record_id = record.id.clone();
            match record.into_entity(now) {
                Ok(entity) => {
                    self.index_entity(entity);
                    report.loaded += 1;
                }
                Err(err) => {
                    warn!(
                        "event=load_skip module=store status=warn id={record_id} reason={err}"
                    );
                    report.skipped_kinds += 1;
                }
            }
        }

        report.dangling_refs = self.resolve_graph(now);

        if self.signed_in.is_none() {
            self.signed_in = self.get_root().map(|root| root.id.clone());
        }

        log_load_summary(&report);
        report
    }

    /// Serializes the whole graph into canonical records, id order.
    pub fn to_records(&self) -> Vec<EntityRecord> {
        self.entities.values().map(Entity::to_record).collect()
    }

    fn index_entity(&mut self, entity: Entity) {
        let id = entity.id.clone();
        let kind = entity.kind;
        self.entities.insert(id.clone(), entity);
        let ids = self.kind_index.entry(kind).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    /// Fixed-order graph resolution. Returns the dangling count.
    fn resolve_graph(&mut self, now: i64) -> usize {
        let ids: Vec<EntityId> = self.entities.keys().cloned().collect();
        let mut dangling = 0;

        // (a) resolve declared child-id lists, dropping dangling ids.
        for id in &ids {
            let members = self
                .entities
                .get(id)
                .map(|entity| entity.entities.clone())
                .unwrap_or_default();
            let mut retained = Vec::with_capacity(members.len());
            for member in members {
                if self.entities.contains_key(&member) {
                    retained.push(member);
                } else {
                    dangling += 1;
                    warn!(
                        "event=resolve_child module=store status=warn entity={id} missing={member}"
                    );
                }
            }
            if let Some(entity) = self.entities.get_mut(id) {
                entity.entities = retained;
            }
        }

        // (b) rebuild the adjacency index from parent relations.
        self.child_map.clear();
        for id in &ids {
            let parent_ids: Vec<EntityId> = self
                .entities
                .get(id)
                .map(|entity| {
                    entity
                        .parents
                        .iter()
                        .map(|relation| relation.id.clone())
                        .collect()
                })
                .unwrap_or_default();
            for parent_id in parent_ids {
                let resolved = self.entities.contains_key(&parent_id);
                if resolved {
                    self.child_map
                        .entry(parent_id.clone())
                        .or_default()
                        .push(id.clone());
                } else {
                    dangling += 1;
                    warn!(
                        "event=resolve_parent module=store status=warn entity={id} missing={parent_id}"
                    );
                }
                if let Some(entity) = self.entities.get_mut(id) {
                    if let Some(relation) = entity
                        .parents
                        .iter_mut()
                        .find(|relation| relation.id == parent_id)
                    {
                        relation.resolved = resolved;
                    }
                }
            }
        }

        // (c) resolve context and actor references, nulling dangling ones.
        for id in &ids {
            let mut checks: Vec<(&'static str, Option<EntityId>)> = Vec::new();
            if let Some(entity) = self.entities.get(id) {
                checks.push(("context", entity.context.clone()));
                checks.push(("created_by", entity.created_by.clone()));
                checks.push(("updated_by", entity.updated_by.clone()));
                checks.push(("deleted_by", entity.deleted_by.clone()));
            }
            for (field, reference) in checks {
                let Some(reference) = reference else { continue };
                if self.entities.contains_key(&reference) {
                    continue;
                }
                dangling += 1;
                warn!(
                    "event=resolve_reference module=store status=warn entity={id} field={field} missing={reference}"
                );
                if let Some(entity) = self.entities.get_mut(id) {
                    match field {
                        "context" => entity.context = None,
                        "created_by" => entity.created_by = None,
                        "updated_by" => entity.updated_by = None,
                        "deleted_by" => entity.deleted_by = None,
                        _ => {}
                    }
                }
            }
        }

        // (d) strip archived/deleted members from active-member lists.
        let inactive: BTreeSet<EntityId> = self
            .entities
            .values()
            .filter(|entity| !entity.is_active())
            .map(|entity| entity.id.clone())
            .collect();
        if !inactive.is_empty() {
            for id in &ids {
                if let Some(entity) = self.entities.get_mut(id) {
                    entity.entities.retain(|member| !inactive.contains(member));
                }
            }
        }

        // (e) parse content-bearing entities into links.
        for id in &ids {
            let content = self.entities.get(id).and_then(|entity| entity.content.clone());
            if let Some(content) = content {
                let links = extract_links(id, &content, self.parser.as_ref());
                if let Some(entity) = self.entities.get_mut(id) {
                    entity.links = links;
                }
            }
        }

        // (f) invert links into the backlink index.
        for entity in self.entities.values_mut() {
            entity.backlinks.clear();
        }
        let all_links: Vec<EntityLink> = self
            .entities
            .values()
            .flat_map(|entity| entity.links.iter().cloned())
            .collect();
        for link in all_links {
            if let Some(target) = self.entities.get_mut(&link.entity) {
                target.backlinks.push(link);
            }
        }

        // (g) aliveness over the now-consistent graph.
        recompute_aliveness(&mut self.entities, now);

        dangling
    }

    // -------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------

    /// O(1) id lookup; `None` when absent, never an error.
    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// All non-deleted entities of one kind, load/creation order.
    pub fn get_entities(&self, kind: EntityKind) -> Vec<&Entity> {
        self.get_entities_where(kind, |_| true)
    }

    /// Non-deleted entities of one kind passing a predicate.
    pub fn get_entities_where(
        &self,
        kind: EntityKind,
        predicate: impl Fn(&Entity) -> bool,
    ) -> Vec<&Entity> {
        self.kind_index
            .get(&kind)
            .into_iter()
            .flatten()
            .filter_map(|id| self.entities.get(id))
            .filter(|entity| !entity.deleted && predicate(entity))
            .collect()
    }

    /// Entities passing the filter, id order.
    pub fn query(&self, filter: &QueryFilter) -> Vec<&Entity> {
        self.query_where(filter, |_| true)
    }

    /// Entities passing the filter and a predicate, id order.
    pub fn query_where(
        &self,
        filter: &QueryFilter,
        predicate: impl Fn(&Entity) -> bool,
    ) -> Vec<&Entity> {
        self.entities
            .values()
            .filter(|entity| filter.matches(entity) && predicate(entity))
            .collect()
    }

    /// The singleton root (`User`) entity.
    pub fn get_root(&self) -> Option<&Entity> {
        self.kind_index
            .get(&EntityKind::User)
            .and_then(|ids| ids.first())
            .and_then(|id| self.entities.get(id))
    }

    /// Every non-deleted entity with zero parent relations.
    pub fn get_uncategorized(&self) -> Vec<&Entity> {
        self.query(&QueryFilter {
            has_parents: Some(false),
            deleted: Some(false),
            ..QueryFilter::default()
        })
    }

    /// Union of the entity's own active members and resolved children
    /// known through the adjacency index (covers children whose parent
    /// relation exists but which are not, or no longer, active members).
    pub fn get_children(&self, id: &EntityId) -> Vec<&Entity> {
        let mut seen = BTreeSet::new();
        let mut children = Vec::new();
        if let Some(entity) = self.entities.get(id) {
            for member in &entity.entities {
                if let Some(child) = self.entities.get(member) {
                    if seen.insert(member.clone()) {
                        children.push(child);
                    }
                }
            }
        }
        if let Some(extra) = self.child_map.get(id) {
            for child_id in extra {
                if seen.contains(child_id) {
                    continue;
                }
                if let Some(child) = self.entities.get(child_id) {
                    seen.insert(child_id.clone());
                    children.push(child);
                }
            }
        }
        children
    }

    /// Containment test. `deep` searches all contained collections
    /// depth-first; no cycle guard is needed because containment is
    /// acyclic by construction.
    pub fn has(&self, ancestor: &EntityId, id: &EntityId, deep: bool) -> bool {
        let Some(entity) = self.entities.get(ancestor) else {
            return false;
        };
        if entity.is_member(id) {
            return true;
        }
        if !deep {
            return false;
        }
        entity
            .entities
            .iter()
            .any(|member| self.has(member, id, true))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    // -------------------------------------------------------------------
    // Observation
    // -------------------------------------------------------------------

    /// Subscribes a listener; dispatch is synchronous, registration order.
    pub fn on(&mut self, filter: EventFilter, listener: Box<dyn Fn(&EntityEvent)>) -> ListenerId {
        self.hub.on(filter, listener)
    }

    /// Unsubscribes a listener.
    pub fn off(&mut self, id: ListenerId) {
        self.hub.off(id)
    }

    /// Cooperative tick: fires coalesced updates whose window elapsed.
    pub fn pump(&mut self) {
        let now = self.clock.now_ms();
        self.hub.flush_due(now);
    }

    // -------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------

    /// Creates one entity through the registry-driven factory.
    ///
    /// User-origin creation is limited to kinds the registry marks
    /// user-creatable; a second `User` entity is rejected outright since
    /// the root singleton invariant is load-bearing.
    pub fn create(&mut self, new: NewEntity, origin: CreateOrigin) -> StoreResult<EntityId> {
        let now = self.begin_mutation();

        let kind = new.kind;
        let spec = kind.spec();
        if origin == CreateOrigin::User && !spec.user_creatable {
            return Err(StoreError::KindNotUserCreatable(kind));
        }
        if kind == EntityKind::User {
            if let Some(existing) = self
                .kind_index
                .get(&EntityKind::User)
                .and_then(|ids| ids.first())
            {
                return Err(StoreError::DuplicateRoot(existing.clone()));
            }
        }

        let id = EntityId::generate();
        let record = EntityRecord {
            id: id.as_str().to_string(),
            kind: kind.as_str().to_string(),
            name: new.name,
            content: new.content,
            draft: spec.starts_as_draft,
            source: new.source,
            context: new.context.map(|context| context.as_str().to_string()),
            properties: new.properties,
            ..EntityRecord::default()
        };
        let mut entity = record.into_entity(now)?;
        entity.created_by = self.signed_in.clone();
        entity.updated_by = self.signed_in.clone();
        if let Some(content) = entity.content.clone() {
            entity.links = extract_links(&id, &content, self.parser.as_ref());
        }
        let links = entity.links.clone();
        self.index_entity(entity);

        for parent in &new.parents {
            if self.entities.contains_key(parent) {
                let added = match self.entities.get_mut(&id) {
                    Some(child) => child.add_parent_relation(parent, BTreeMap::new(), now),
                    None => false,
                };
                if added {
                    self.child_map
                        .entry(parent.clone())
                        .or_default()
                        .push(id.clone());
                }
            } else {
                warn!(
                    "event=create_parent module=store status=warn entity={id} missing={parent}"
                );
            }
        }

        for link in links {
            if let Some(target) = self.entities.get_mut(&link.entity) {
                target.backlinks.push(link);
            }
        }

        // Cheap full recompute; graphs stay small.
        recompute_aliveness(&mut self.entities, now);

        self.hub.emit(&EntityEvent {
            op: EntityOp::Create,
            entity: id.clone(),
            kind,
            member: None,
            origin: Some(origin),
        });
        Ok(id)
    }

    /// Registers a parent relation. Idempotent when the relation exists.
    pub fn add_parent(
        &mut self,
        child: &EntityId,
        parent: &EntityId,
        properties: BTreeMap<String, Value>,
    ) -> StoreResult<()> {
        let now = self.begin_mutation();
        if !self.entities.contains_key(parent) {
            return Err(StoreError::EntityNotFound(parent.clone()));
        }
        let actor = self.signed_in.clone();
        let (kind, added) = {
            let entity = self.require_mut(child)?;
            let added = entity.add_parent_relation(parent, properties, now);
            if added {
                entity.touch(now, actor.as_ref());
            }
            (entity.kind, added)
        };
        if added {
            self.child_map
                .entry(parent.clone())
                .or_default()
                .push(child.clone());
            self.hub.emit(&EntityEvent {
                op: EntityOp::ParentAdd,
                entity: child.clone(),
                kind,
                member: Some(parent.clone()),
                origin: None,
            });
        }
        Ok(())
    }

    /// Severs a parent relation. If the parent still lists the child as
    /// an active member it is removed there too, keeping both sides
    /// consistent.
    pub fn remove_parent(&mut self, child: &EntityId, parent: &EntityId) -> StoreResult<()> {
        let now = self.begin_mutation();
        let actor = self.signed_in.clone();
        let (kind, removed) = {
            let entity = self.require_mut(child)?;
            let removed = entity.remove_parent_relation(parent);
            if removed {
                entity.touch(now, actor.as_ref());
            }
            (entity.kind, removed)
        };
        if removed {
            if let Some(children) = self.child_map.get_mut(parent) {
                children.retain(|existing| existing != child);
            }
            if let Some(parent_entity) = self.entities.get_mut(parent) {
                parent_entity.detach_member(child);
            }
            self.hub.emit(&EntityEvent {
                op: EntityOp::ParentRemove,
                entity: child.clone(),
                kind,
                member: Some(parent.clone()),
                origin: None,
            });
        }
        Ok(())
    }

    /// Inserts children into a collection's active-member list at `index`.
    ///
    /// Every child is validated against the containment graph before any
    /// state changes: inserting an entity that is the collection itself or
    /// one of its ancestors fails with `RecursiveContainment` and leaves
    /// both the member lists and the adjacency index untouched. One
    /// `Insert` event fires per inserted child (not batched).
    pub fn insert(
        &mut self,
        parent: &EntityId,
        index: usize,
        children: &[EntityId],
    ) -> StoreResult<Vec<EntityId>> {
        let now = self.begin_mutation();
        let parent_kind = self.require(parent)?.kind;

        for child in children {
            if !self.entities.contains_key(child) {
                return Err(StoreError::EntityNotFound(child.clone()));
            }
            self.ensure_no_cycle(parent, child)?;
        }

        let mut eligible = Vec::new();
        for child in children {
            let active = self
                .entities
                .get(child)
                .map(|entity| entity.is_active())
                .unwrap_or(false);
            if active {
                eligible.push(child.clone());
            } else {
                warn!(
                    "event=insert_skip module=store status=warn entity={parent} inactive={child}"
                );
            }
        }

        let actor = self.signed_in.clone();
        let inserted = {
            let entity = self.require_mut(parent)?;
            let inserted = entity.insert_members(index, &eligible);
            if !inserted.is_empty() {
                entity.touch(now, actor.as_ref());
            }
            inserted
        };

        for child in &inserted {
            let added = match self.entities.get_mut(child) {
                Some(entity) => entity.add_parent_relation(parent, BTreeMap::new(), now),
                None => false,
            };
            if added {
                self.child_map
                    .entry(parent.clone())
                    .or_default()
                    .push(child.clone());
            }
            self.hub.emit(&EntityEvent {
                op: EntityOp::Insert,
                entity: parent.clone(),
                kind: parent_kind,
                member: Some(child.clone()),
                origin: None,
            });
        }
        Ok(inserted)
    }

    /// Removes one id from a collection's active-member list only; the
    /// member's parent relation stays (membership and parenthood are
    /// distinct).
    pub fn remove(&mut self, parent: &EntityId, member: &EntityId) -> StoreResult<()> {
        let now = self.begin_mutation();
        let actor = self.signed_in.clone();
        let kind = {
            let entity = self.require_mut(parent)?;
            entity.remove_member(member)?;
            entity.touch(now, actor.as_ref());
            entity.kind
        };
        self.hub.emit(&EntityEvent {
            op: EntityOp::Remove,
            entity: parent.clone(),
            kind,
            member: Some(member.clone()),
            origin: None,
        });
        Ok(())
    }

    /// Replaces a collection's member ordering. The supplied ids must be
    /// exactly the current member set.
    pub fn set_order(&mut self, parent: &EntityId, order: Vec<EntityId>) -> StoreResult<()> {
        let now = self.begin_mutation();
        let actor = self.signed_in.clone();
        let kind = {
            let entity = self.require_mut(parent)?;
            entity.set_member_order(order)?;
            entity.touch(now, actor.as_ref());
            entity.kind
        };
        self.hub.emit(&EntityEvent {
            op: EntityOp::NewOrder,
            entity: parent.clone(),
            kind,
            member: None,
            origin: None,
        });
        Ok(())
    }

    /// Renames one entity. Blank names are rejected.
    pub fn rename(&mut self, id: &EntityId, name: impl Into<String>) -> StoreResult<()> {
        let now = self.begin_mutation();
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(StoreError::InvalidName);
        }
        let actor = self.signed_in.clone();
        let kind = {
            let entity = self.require_mut(id)?;
            entity.name = trimmed.to_string();
            entity.touch(now, actor.as_ref());
            entity.kind
        };
        self.hub.emit(&EntityEvent {
            op: EntityOp::Rename,
            entity: id.clone(),
            kind,
            member: None,
            origin: None,
        });
        Ok(())
    }

    /// Archives one entity and detaches it from every parent's
    /// active-member list, keeping the membership invariant without a
    /// graph rebuild.
    pub fn archive(&mut self, id: &EntityId) -> StoreResult<()> {
        let now = self.begin_mutation();
        let (kind, parent_ids, changed) = {
            let entity = self.require_mut(id)?;
            if entity.archived {
                (entity.kind, Vec::new(), false)
            } else {
                entity.archive(now);
                (entity.kind, parent_ids_of(entity), true)
            }
        };
        if changed {
            self.detach_from_parents(id, &parent_ids);
            self.hub.emit(&EntityEvent {
                op: EntityOp::Archive,
                entity: id.clone(),
                kind,
                member: None,
                origin: None,
            });
        }
        Ok(())
    }

    /// Clears the archived flag and reattaches the entity to its parents'
    /// active-member lists.
    pub fn unarchive(&mut self, id: &EntityId) -> StoreResult<()> {
        let now = self.begin_mutation();
        let actor = self.signed_in.clone();
        let (kind, parent_ids, active, changed) = {
            let entity = self.require_mut(id)?;
            if entity.archived {
                entity.unarchive();
                entity.touch(now, actor.as_ref());
                (entity.kind, parent_ids_of(entity), entity.is_active(), true)
            } else {
                (entity.kind, Vec::new(), false, false)
            }
        };
        if changed {
            if active {
                self.reattach_to_parents(id, &parent_ids);
            }
            self.hub.emit(&EntityEvent {
                op: EntityOp::Unarchive,
                entity: id.clone(),
                kind,
                member: None,
                origin: None,
            });
        }
        Ok(())
    }

    /// Tombstones one entity: the deletion is a flag transition, the id
    /// index keeps the instance. Any pending coalesced update for the
    /// entity is flushed first so consumers never observe an update after
    /// the delete.
    pub fn delete(&mut self, id: &EntityId) -> StoreResult<()> {
        let now = self.begin_mutation();
        self.hub.flush_entity(id, now);
        let actor = self.signed_in.clone();
        let (kind, parent_ids) = {
            let entity = self.require_mut(id)?;
            entity.mark_deleted(now, actor.as_ref());
            (entity.kind, parent_ids_of(entity))
        };
        self.detach_from_parents(id, &parent_ids);
        self.hub.emit(&EntityEvent {
            op: EntityOp::Delete,
            entity: id.clone(),
            kind,
            member: None,
            origin: None,
        });
        Ok(())
    }

    /// Clears the deleted tombstone and reattaches to parents.
    pub fn restore(&mut self, id: &EntityId) -> StoreResult<()> {
        let now = self.begin_mutation();
        let actor = self.signed_in.clone();
        let (kind, parent_ids, active, changed) = {
            let entity = self.require_mut(id)?;
            if entity.deleted {
                entity.restore_deleted();
                entity.touch(now, actor.as_ref());
                (entity.kind, parent_ids_of(entity), entity.is_active(), true)
            } else {
                (entity.kind, Vec::new(), false, false)
            }
        };
        if changed {
            if active {
                self.reattach_to_parents(id, &parent_ids);
            }
            self.hub.emit(&EntityEvent {
                op: EntityOp::Restore,
                entity: id.clone(),
                kind,
                member: None,
                origin: None,
            });
        }
        Ok(())
    }

    /// Converts one entity to another kind.
    ///
    /// The registry's non-convertible flag is enforced here, totally, so
    /// call sites need no duplicate check. Content lost with the
    /// content-editable capability clears the source's links; the backlink
    /// index is refreshed either way.
    pub fn convert(&mut self, id: &EntityId, to: EntityKind) -> StoreResult<()> {
        let now = self.begin_mutation();
        let actor = self.signed_in.clone();
        let from_kind = {
            let entity = self.require_mut(id)?;
            let from_kind = entity.kind;
            entity.convert_kind(to)?;
            entity.touch(now, actor.as_ref());
            from_kind
        };

        if let Some(ids) = self.kind_index.get_mut(&from_kind) {
            ids.retain(|existing| existing != id);
        }
        let ids = self.kind_index.entry(to).or_default();
        if !ids.contains(id) {
            ids.push(id.clone());
        }
        self.sync_backlinks_for(id);

        self.hub.emit(&EntityEvent {
            op: EntityOp::Convert,
            entity: id.clone(),
            kind: to,
            member: None,
            origin: None,
        });
        Ok(())
    }

    /// Replaces content, re-derives the source's links and refreshes the
    /// backlink index for every affected target. Emits a coalesced update.
    pub fn set_content(&mut self, id: &EntityId, content: impl Into<String>) -> StoreResult<()> {
        let now = self.begin_mutation();
        let content = content.into();
        let links = extract_links(id, &content, self.parser.as_ref());
        let actor = self.signed_in.clone();
        let kind = {
            let entity = self.require_mut(id)?;
            entity.set_content(content)?;
            entity.links = links;
            entity.touch(now, actor.as_ref());
            entity.kind
        };
        self.sync_backlinks_for(id);
        self.hub.note_update(
            EntityEvent {
                op: EntityOp::Update,
                entity: id.clone(),
                kind,
                member: None,
                origin: None,
            },
            now,
        );
        Ok(())
    }

    /// Marks a completable entity complete. Emits a coalesced update.
    pub fn mark_complete(&mut self, id: &EntityId) -> StoreResult<()> {
        let now = self.begin_mutation();
        let actor = self.signed_in.clone();
        let kind = {
            let entity = self.require_mut(id)?;
            entity.mark_complete(now)?;
            entity.touch(now, actor.as_ref());
            entity.kind
        };
        self.hub.note_update(
            EntityEvent {
                op: EntityOp::Update,
                entity: id.clone(),
                kind,
                member: None,
                origin: None,
            },
            now,
        );
        Ok(())
    }

    /// Flags one entity as a draft.
    pub fn mark_draft(&mut self, id: &EntityId) -> StoreResult<()> {
        self.set_draft_flag(id, true, EntityOp::MarkDraft)
    }

    /// Settles a draft into a completed entity.
    pub fn complete_draft(&mut self, id: &EntityId) -> StoreResult<()> {
        self.set_draft_flag(id, false, EntityOp::CompleteDraft)
    }

    /// Updates one free-form property. Emits a coalesced update.
    pub fn set_property(
        &mut self,
        id: &EntityId,
        key: impl Into<String>,
        value: Value,
    ) -> StoreResult<()> {
        let now = self.begin_mutation();
        let actor = self.signed_in.clone();
        let kind = {
            let entity = self.require_mut(id)?;
            entity.properties.insert(key.into(), value);
            entity.touch(now, actor.as_ref());
            entity.kind
        };
        self.hub.note_update(
            EntityEvent {
                op: EntityOp::Update,
                entity: id.clone(),
                kind,
                member: None,
                origin: None,
            },
            now,
        );
        Ok(())
    }

    // -------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------

    /// Stamps the mutation time and fires coalesced updates whose window
    /// elapsed (the cooperative pump).
    pub(crate) fn begin_mutation(&mut self) -> i64 {
        let now = self.clock.now_ms();
        self.hub.flush_due(now);
        now
    }

    pub(crate) fn require(&self, id: &EntityId) -> StoreResult<&Entity> {
        self.entities
            .get(id)
            .ok_or_else(|| StoreError::EntityNotFound(id.clone()))
    }

    pub(crate) fn require_mut(&mut self, id: &EntityId) -> StoreResult<&mut Entity> {
        self.entities
            .get_mut(id)
            .ok_or_else(|| StoreError::EntityNotFound(id.clone()))
    }

    /// Walks the inserting collection's ancestor chain; inserting `child`
    /// must not place the collection inside itself.
    fn ensure_no_cycle(&self, parent: &EntityId, child: &EntityId) -> StoreResult<()> {
        let cycle = || {
            StoreError::Entity(EntityError::RecursiveContainment {
                source: parent.clone(),
                target: child.clone(),
            })
        };
        if parent == child {
            return Err(cycle());
        }
        let mut visited = BTreeSet::new();
        let mut frontier = vec![parent.clone()];
        while let Some(current) = frontier.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if current == *child {
                return Err(cycle());
            }
            if let Some(entity) = self.entities.get(&current) {
                for relation in &entity.parents {
                    frontier.push(relation.id.clone());
                }
            }
        }
        Ok(())
    }

    /// Replaces this source's backlinks across all targets; backlinks from
    /// other sources on the same targets are preserved.
    pub(crate) fn sync_backlinks_for(&mut self, source: &EntityId) {
        let links: Vec<EntityLink> = self
            .entities
            .get(source)
            .map(|entity| entity.links.clone())
            .unwrap_or_default();
        for entity in self.entities.values_mut() {
            entity.backlinks.retain(|link| link.source != *source);
        }
        for link in links {
            if let Some(target) = self.entities.get_mut(&link.entity) {
                target.backlinks.push(link);
            }
        }
    }

    fn detach_from_parents(&mut self, id: &EntityId, parent_ids: &[EntityId]) {
        for parent_id in parent_ids {
            if let Some(parent) = self.entities.get_mut(parent_id) {
                parent.detach_member(id);
            }
        }
    }

    fn reattach_to_parents(&mut self, id: &EntityId, parent_ids: &[EntityId]) {
        for parent_id in parent_ids {
            if let Some(parent) = self.entities.get_mut(parent_id) {
                parent.attach_member(id);
            }
        }
    }

    fn set_draft_flag(&mut self, id: &EntityId, draft: bool, op: EntityOp) -> StoreResult<()> {
        let now = self.begin_mutation();
        let actor = self.signed_in.clone();
        let (kind, changed) = {
            let entity = self.require_mut(id)?;
            let changed = entity.draft != draft;
            if changed {
                entity.draft = draft;
                entity.touch(now, actor.as_ref());
            }
            (entity.kind, changed)
        };
        if changed {
            self.hub.emit(&EntityEvent {
                op,
                entity: id.clone(),
                kind,
                member: None,
                origin: None,
            });
        }
        Ok(())
    }
}

fn parent_ids_of(entity: &Entity) -> Vec<EntityId> {
    entity
        .parents
        .iter()
        .map(|relation| relation.id.clone())
        .collect()
}

fn log_load_summary(report: &LoadReport) {
    log::info!(
        "event=graph_load module=store status=ok loaded={} skipped_kinds={} dangling_refs={}",
        report.loaded,
        report.skipped_kinds,
        report.dangling_refs
    );
}
