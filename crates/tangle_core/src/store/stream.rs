//! Cooperative content streaming into streamable entities.
//!
//! # Responsibility
//! - Drive a producer's chunks into an entity's content, one coalesced
//!   update notification per chunk.
//! - Capture terminal states (complete, failed, cancelled) into the
//!   entity's `status` property and content.
//!
//! # Invariants
//! - The read loop is cooperative and synchronous; no internal timeout.
//! - Cancellation is caller-driven; the underlying producer is asked to
//!   stop exactly once.
//! - Links and backlinks are refreshed once content settles.

use crate::links::extract::extract_links;
use crate::model::entity::{EntityError, EntityId};
use crate::model::kind::Capability;
use crate::store::engine::{EntityStore, StoreResult};
use crate::store::events::{EntityEvent, EntityOp};
use serde_json::json;

/// Property key carrying the streaming status.
pub const STREAM_STATUS_PROPERTY: &str = "status";
/// Status value while chunks are being appended.
pub const STREAM_STATUS_STREAMING: &str = "streaming";
/// Status value after the producer completed normally.
pub const STREAM_STATUS_COMPLETE: &str = "complete";
/// Status value after an error or a cancellation.
pub const STREAM_STATUS_FAILED: &str = "failed";

/// Incremental content producer collaborator.
pub trait StreamSource {
    /// Next content chunk. `None` when the producer is done; an `Err`
    /// carries the producer's failure message.
    fn next_chunk(&mut self) -> Option<Result<String, String>>;

    /// Asks the underlying producer to stop. Called on cancellation.
    fn stop(&mut self);
}

/// Terminal state of one streaming run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Producer finished on its own.
    Completed,
    /// Producer reported an error; the message was captured into content.
    Failed,
    /// Caller cancelled; a cancellation notice was appended.
    Cancelled,
}

impl EntityStore {
    /// Streams a producer's output into one streamable entity.
    ///
    /// Each appended chunk routes one update through the coalescing
    /// window. The loop terminates on producer completion, producer error
    /// (error text captured into content, status flagged failed) or when
    /// `cancelled` returns true (cancellation notice appended, status
    /// flagged failed, producer stopped).
    pub fn stream_into(
        &mut self,
        id: &EntityId,
        source: &mut dyn StreamSource,
        cancelled: &dyn Fn() -> bool,
    ) -> StoreResult<StreamOutcome> {
        self.begin_mutation();
        {
            let entity = self.require(id)?;
            if !entity.kind.has_capability(Capability::Streamable) {
                return Err(EntityError::CapabilityMissing {
                    entity: id.clone(),
                    capability: Capability::Streamable,
                }
                .into());
            }
        }
        self.set_stream_status(id, STREAM_STATUS_STREAMING);

        let outcome = loop {
            if cancelled() {
                self.append_chunk(id, "\n[generation cancelled]")?;
                source.stop();
                break StreamOutcome::Cancelled;
            }
            match source.next_chunk() {
                None => break StreamOutcome::Completed,
                Some(Ok(chunk)) => {
                    self.append_chunk(id, &chunk)?;
                }
                Some(Err(message)) => {
                    self.append_chunk(id, &format!("\n[generation failed: {message}]"))?;
                    break StreamOutcome::Failed;
                }
            }
        };

        let status = match outcome {
            StreamOutcome::Completed => STREAM_STATUS_COMPLETE,
            StreamOutcome::Failed | StreamOutcome::Cancelled => STREAM_STATUS_FAILED,
        };
        self.set_stream_status(id, status);

        // Content settled: refresh derived links and the backlink index.
        let content = self
            .entities
            .get(id)
            .and_then(|entity| entity.content.clone())
            .unwrap_or_default();
        let links = extract_links(id, &content, self.parser.as_ref());
        if let Some(entity) = self.entities.get_mut(id) {
            entity.links = links;
        }
        self.sync_backlinks_for(id);

        Ok(outcome)
    }

    fn append_chunk(&mut self, id: &EntityId, chunk: &str) -> StoreResult<()> {
        let now = self.clock.now_ms();
        let actor = self.signed_in.clone();
        let kind = {
            let entity = self.require_mut(id)?;
            match &mut entity.content {
                Some(content) => content.push_str(chunk),
                None => entity.content = Some(chunk.to_string()),
            }
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

    fn set_stream_status(&mut self, id: &EntityId, status: &str) {
        if let Some(entity) = self.entities.get_mut(id) {
            entity
                .properties
                .insert(STREAM_STATUS_PROPERTY.to_string(), json!(status));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{StreamOutcome, StreamSource, STREAM_STATUS_COMPLETE, STREAM_STATUS_FAILED};
    use crate::clock::ManualClock;
    use crate::model::kind::EntityKind;
    use crate::store::engine::{EntityStore, NewEntity, StoreError};
    use crate::store::events::CreateOrigin;
    use serde_json::json;
    use std::sync::Arc;

    struct ScriptedSource {
        chunks: Vec<Result<String, String>>,
        stopped: bool,
    }

    impl ScriptedSource {
        fn of(chunks: Vec<Result<String, String>>) -> Self {
            Self {
                chunks,
                stopped: false,
            }
        }
    }

    impl StreamSource for ScriptedSource {
        fn next_chunk(&mut self) -> Option<Result<String, String>> {
            if self.chunks.is_empty() {
                None
            } else {
                Some(self.chunks.remove(0))
            }
        }

        fn stop(&mut self) {
            self.stopped = true;
        }
    }

    fn chat_store() -> (EntityStore, crate::model::entity::EntityId) {
        let mut store = EntityStore::with_clock(Arc::new(ManualClock::starting_at(1_000)));
        let id = store
            .create(NewEntity::of(EntityKind::Chat), CreateOrigin::User)
            .expect("chat creates");
        (store, id)
    }

    #[test]
    fn completed_stream_appends_chunks_and_settles_status() {
        let (mut store, id) = chat_store();
        let mut source = ScriptedSource::of(vec![
            Ok("Hello".to_string()),
            Ok(", world".to_string()),
        ]);

        let outcome = store
            .stream_into(&id, &mut source, &|| false)
            .expect("stream runs");
        assert_eq!(outcome, StreamOutcome::Completed);

        let chat = store.get(&id).expect("chat exists");
        assert_eq!(chat.content.as_deref(), Some("Hello, world"));
        assert_eq!(chat.properties["status"], json!(STREAM_STATUS_COMPLETE));
        assert!(!source.stopped);
    }

    #[test]
    fn producer_error_is_captured_into_content() {
        let (mut store, id) = chat_store();
        let mut source = ScriptedSource::of(vec![
            Ok("partial".to_string()),
            Err("rate limited".to_string()),
        ]);

        let outcome = store
            .stream_into(&id, &mut source, &|| false)
            .expect("stream runs");
        assert_eq!(outcome, StreamOutcome::Failed);

        let chat = store.get(&id).expect("chat exists");
        let content = chat.content.as_deref().expect("content present");
        assert!(content.starts_with("partial"));
        assert!(content.contains("generation failed: rate limited"));
        assert_eq!(chat.properties["status"], json!(STREAM_STATUS_FAILED));
    }

    #[test]
    fn cancellation_stops_producer_and_flags_failed() {
        let (mut store, id) = chat_store();
        let mut source = ScriptedSource::of(vec![Ok("never read".to_string())]);

        let outcome = store
            .stream_into(&id, &mut source, &|| true)
            .expect("stream runs");
        assert_eq!(outcome, StreamOutcome::Cancelled);
        assert!(source.stopped);

        let chat = store.get(&id).expect("chat exists");
        assert!(chat
            .content
            .as_deref()
            .expect("content present")
            .contains("generation cancelled"));
        assert_eq!(chat.properties["status"], json!(STREAM_STATUS_FAILED));
    }

    #[test]
    fn streaming_requires_the_streamable_capability() {
        let mut store = EntityStore::with_clock(Arc::new(ManualClock::starting_at(1_000)));
        let note = store
            .create(NewEntity::of(EntityKind::Note), CreateOrigin::User)
            .expect("note creates");
        let mut source = ScriptedSource::of(vec![]);

        let err = store
            .stream_into(&note, &mut source, &|| false)
            .expect_err("notes do not stream");
        assert!(matches!(err, StoreError::Entity(_)));
    }
}
