//! Typed mutation events and the listener registry.
//!
//! # Responsibility
//! - Define the observable operation set and event payload.
//! - Dispatch events synchronously, in registration order.
//! - Coalesce per-entity update notifications inside a fixed window.
//!
//! # Invariants
//! - Non-update events always dispatch immediately.
//! - At most one update notification per entity is pending at any time.
//! - A pending update is flushed before the entity's delete event so no
//!   consumer observes an update after a delete.
//! - Listener failures are not caught; a panicking listener propagates.

use crate::model::entity::EntityId;
use crate::model::kind::EntityKind;
use std::collections::{BTreeMap, BTreeSet};

/// Default update coalescing window in epoch milliseconds.
pub const DEFAULT_UPDATE_COALESCE_WINDOW_MS: i64 = 5_000;

/// Observable mutation operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityOp {
    Create,
    Update,
    Delete,
    Archive,
    Unarchive,
    Restore,
    Rename,
    Convert,
    Insert,
    Remove,
    NewOrder,
    MarkDraft,
    CompleteDraft,
    ParentAdd,
    ParentRemove,
}

impl EntityOp {
    /// Stable string id used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Archive => "archive",
            Self::Unarchive => "unarchive",
            Self::Restore => "restore",
            Self::Rename => "rename",
            Self::Convert => "convert",
            Self::Insert => "insert",
            Self::Remove => "remove",
            Self::NewOrder => "new-order",
            Self::MarkDraft => "mark-draft",
            Self::CompleteDraft => "complete-draft",
            Self::ParentAdd => "parent-add",
            Self::ParentRemove => "parent-remove",
        }
    }
}

/// Where a created entity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CreateOrigin {
    /// Direct user action.
    User,
    /// External collaborator (sync, import, AI).
    External,
    /// Drag-and-drop of outside material.
    Drop,
}

impl CreateOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::External => "external",
            Self::Drop => "drop",
        }
    }
}

/// One observed mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityEvent {
    pub op: EntityOp,
    /// Entity the operation applied to.
    pub entity: EntityId,
    pub kind: EntityKind,
    /// Secondary participant: the inserted/removed member for `Insert`,
    /// `Remove`, and the parent for `ParentAdd`/`ParentRemove`.
    pub member: Option<EntityId>,
    /// Present on `Create` events only.
    pub origin: Option<CreateOrigin>,
}

/// Listener subscription filter. `None` matches everything; both fields
/// compose by logical AND.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub ops: Option<BTreeSet<EntityOp>>,
    pub kinds: Option<BTreeSet<EntityKind>>,
}

impl EventFilter {
    /// Matches every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches only the given operations.
    pub fn for_ops(ops: impl IntoIterator<Item = EntityOp>) -> Self {
        Self {
            ops: Some(ops.into_iter().collect()),
            kinds: None,
        }
    }

    /// Restricts this filter to the given kinds.
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn matches(&self, event: &EntityEvent) -> bool {
        if let Some(ops) = &self.ops {
            if !ops.contains(&event.op) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        true
    }
}

/// Listener handle returned by `on`, consumed by `off`.
pub type ListenerId = u64;

type ListenerFn = Box<dyn Fn(&EntityEvent)>;

struct ListenerEntry {
    id: ListenerId,
    filter: EventFilter,
    callback: ListenerFn,
}

#[derive(Debug, Clone)]
struct PendingUpdate {
    event: EntityEvent,
    due_at_ms: i64,
}

/// Synchronous event dispatch plus per-entity update coalescing.
pub struct EventHub {
    listeners: Vec<ListenerEntry>,
    next_listener_id: ListenerId,
    window_ms: i64,
    last_update_ms: BTreeMap<EntityId, i64>,
    pending: BTreeMap<EntityId, PendingUpdate>,
}

impl EventHub {
    pub fn new(window_ms: i64) -> Self {
        Self {
            listeners: Vec::new(),
            next_listener_id: 1,
            window_ms,
            last_update_ms: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Registers a listener. Dispatch order is registration order.
    pub fn on(&mut self, filter: EventFilter, callback: ListenerFn) -> ListenerId {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push(ListenerEntry {
            id,
            filter,
            callback,
        });
        id
    }

    /// Unregisters a listener. Unknown ids are ignored.
    pub fn off(&mut self, id: ListenerId) {
        self.listeners.retain(|entry| entry.id != id);
    }

    /// Dispatches a non-update event immediately.
    pub fn emit(&self, event: &EntityEvent) {
        for entry in &self.listeners {
            if entry.filter.matches(event) {
                (entry.callback)(event);
            }
        }
    }

    /// Routes one update notification through the coalescing window.
    ///
    /// The first update for an entity fires immediately and opens the
    /// window; later updates inside the window replace the single pending
    /// notification, which fires once the window elapses.
    pub fn note_update(&mut self, event: EntityEvent, now_ms: i64) {
        let last = self.last_update_ms.get(&event.entity).copied();
        match last {
            Some(last) if now_ms.saturating_sub(last) < self.window_ms => {
                let due_at_ms = last + self.window_ms;
                self.pending
                    .insert(event.entity.clone(), PendingUpdate { event, due_at_ms });
            }
            _ => {
                self.last_update_ms.insert(event.entity.clone(), now_ms);
                self.emit(&event);
            }
        }
    }

    /// Fires every pending update whose window has elapsed.
    pub fn flush_due(&mut self, now_ms: i64) {
        let due: Vec<EntityId> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.due_at_ms <= now_ms)
            .map(|(id, _)| id.clone())
            .collect();
        for id in due {
            if let Some(pending) = self.pending.remove(&id) {
                self.last_update_ms.insert(id, now_ms);
                self.emit(&pending.event);
            }
        }
    }

    /// Synchronously fires the pending update for one entity, if any.
    /// Forced before that entity's delete event.
    pub fn flush_entity(&mut self, id: &EntityId, now_ms: i64) {
        if let Some(pending) = self.pending.remove(id) {
            self.last_update_ms.insert(id.clone(), now_ms);
            self.emit(&pending.event);
        }
    }

    /// Number of suppressed updates currently waiting on their window.
    pub fn pending_updates(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CreateOrigin, EntityEvent, EntityOp, EventFilter, EventHub,
        DEFAULT_UPDATE_COALESCE_WINDOW_MS,
    };
    use crate::model::entity::EntityId;
    use crate::model::kind::EntityKind;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn update_event(id: &str) -> EntityEvent {
        EntityEvent {
            op: EntityOp::Update,
            entity: EntityId::new(id),
            kind: EntityKind::Note,
            member: None,
            origin: None,
        }
    }

    fn recording_hub() -> (EventHub, Rc<RefCell<Vec<EntityEvent>>>) {
        let mut hub = EventHub::new(DEFAULT_UPDATE_COALESCE_WINDOW_MS);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        hub.on(
            EventFilter::all(),
            Box::new(move |event| sink.borrow_mut().push(event.clone())),
        );
        (hub, seen)
    }

    #[test]
    fn filter_composes_ops_and_kinds_by_and() {
        let filter =
            EventFilter::for_ops([EntityOp::Update]).with_kinds([EntityKind::Note]);
        assert!(filter.matches(&update_event("a")));

        let mut wrong_kind = update_event("a");
        wrong_kind.kind = EntityKind::Task;
        assert!(!filter.matches(&wrong_kind));

        let mut wrong_op = update_event("a");
        wrong_op.op = EntityOp::Delete;
        assert!(!filter.matches(&wrong_op));
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let mut hub = EventHub::new(DEFAULT_UPDATE_COALESCE_WINDOW_MS);
        let order = Rc::new(RefCell::new(Vec::new()));

        let first = Rc::clone(&order);
        hub.on(
            EventFilter::all(),
            Box::new(move |_| first.borrow_mut().push("first")),
        );
        let second = Rc::clone(&order);
        hub.on(
            EventFilter::all(),
            Box::new(move |_| second.borrow_mut().push("second")),
        );

        hub.emit(&update_event("a"));
        assert_eq!(*order.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn off_unregisters_listener() {
        let mut hub = EventHub::new(DEFAULT_UPDATE_COALESCE_WINDOW_MS);
        let seen = Rc::new(RefCell::new(0usize));
        let sink = Rc::clone(&seen);
        let id = hub.on(
            EventFilter::all(),
            Box::new(move |_| *sink.borrow_mut() += 1),
        );

        hub.emit(&update_event("a"));
        hub.off(id);
        hub.emit(&update_event("a"));
        assert_eq!(*seen.borrow(), 1);
    }

    #[test]
    fn first_update_fires_immediately_later_ones_coalesce() {
        let (mut hub, seen) = recording_hub();

        hub.note_update(update_event("a"), 1_000);
        assert_eq!(seen.borrow().len(), 1);

        hub.note_update(update_event("a"), 2_000);
        hub.note_update(update_event("a"), 3_000);
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(hub.pending_updates(), 1);

        // Window elapses at 6_000; the single held update fires once.
        hub.flush_due(5_999);
        assert_eq!(seen.borrow().len(), 1);
        hub.flush_due(6_000);
        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(hub.pending_updates(), 0);
    }

    #[test]
    fn updates_on_distinct_entities_do_not_coalesce_together() {
        let (mut hub, seen) = recording_hub();
        hub.note_update(update_event("a"), 1_000);
        hub.note_update(update_event("b"), 1_000);
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn flush_entity_runs_pending_update_synchronously() {
        let (mut hub, seen) = recording_hub();
        hub.note_update(update_event("a"), 1_000);
        hub.note_update(update_event("a"), 1_500);
        assert_eq!(hub.pending_updates(), 1);

        hub.flush_entity(&EntityId::new("a"), 1_600);
        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(hub.pending_updates(), 0);
    }

    #[test]
    fn create_event_carries_origin() {
        let (hub, seen) = recording_hub();
        hub.emit(&EntityEvent {
            op: EntityOp::Create,
            entity: EntityId::new("a"),
            kind: EntityKind::Note,
            member: None,
            origin: Some(CreateOrigin::Drop),
        });
        assert_eq!(seen.borrow()[0].origin, Some(CreateOrigin::Drop));
    }
}
