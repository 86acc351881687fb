//! Change records pushed to the student and coach document views.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use pacer_core::model::{BlockId, IrregularId, ItemId, StudentId, SubjectId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;

/// The entity a change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityRef {
    Tracker {
        student_id: StudentId,
        subject_id: SubjectId,
    },
    Block {
        block_id: BlockId,
    },
    Item {
        item_id: ItemId,
    },
    Insertion {
        insertion_id: IrregularId,
    },
}

/// One entity and the fields that changed on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityChange {
    pub entity: EntityRef,
    pub changed_fields: Map<String, Value>,
}

impl EntityChange {
    #[must_use]
    pub fn new(entity: EntityRef) -> Self {
        Self {
            entity,
            changed_fields: Map::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.changed_fields.insert(field.to_owned(), value.into());
        self
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.changed_fields.get(name)
    }
}

/// Pushes change records into the document views.
///
/// Implementations may retry transient failures themselves but must return
/// permanent ones.
#[async_trait]
pub trait PresentationSync: Send + Sync {
    /// # Errors
    ///
    /// Returns `SyncError` if the changes could not be delivered.
    async fn push(&self, changes: Vec<EntityChange>) -> Result<(), SyncError>;
}

/// Drops every change.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSync;

#[async_trait]
impl PresentationSync for NoopSync {
    async fn push(&self, _changes: Vec<EntityChange>) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Keeps every pushed change in memory, for tests and local tooling.
#[derive(Debug, Default)]
pub struct RecordingSync {
    changes: Mutex<Vec<EntityChange>>,
}

impl RecordingSync {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything pushed so far.
    #[must_use]
    pub fn changes(&self) -> Vec<EntityChange> {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain the recorded changes.
    pub fn take(&self) -> Vec<EntityChange> {
        std::mem::take(&mut *self.changes.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl PresentationSync for RecordingSync {
    async fn push(&self, changes: Vec<EntityChange>) -> Result<(), SyncError> {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(changes);
        Ok(())
    }
}

/// Skip the round trip when there is nothing to say.
pub(crate) async fn push_nonempty(
    sync: &dyn PresentationSync,
    changes: Vec<EntityChange>,
) -> Result<(), SyncError> {
    if changes.is_empty() {
        return Ok(());
    }
    let count = changes.len();
    sync.push(changes).await.inspect_err(|err| {
        log::warn!("presentation sync failed for {count} changes: {err}");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_change_serializes_with_kind_tag() {
        let change = EntityChange::new(EntityRef::Block {
            block_id: BlockId::new(4),
        })
        .with("start_date", "2024-05-01");

        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["entity"]["kind"], "block");
        assert_eq!(json["changed_fields"]["start_date"], "2024-05-01");
    }

    #[tokio::test]
    async fn recording_sync_collects_and_drains() {
        let sync = RecordingSync::new();
        let item = EntityRef::Item {
            item_id: ItemId::new(1),
        };
        push_nonempty(&sync, vec![EntityChange::new(item).with("try_count", 1)])
            .await
            .unwrap();
        push_nonempty(&sync, Vec::new()).await.unwrap();

        assert_eq!(sync.changes().len(), 1);
        assert_eq!(sync.take()[0].field("try_count"), Some(&Value::from(1)));
        assert!(sync.changes().is_empty());
    }
}
