//! Async locks that keep engine writes from interleaving.
//!
//! A tracker write holds its subject's lock shared and the (student, subject)
//! lock exclusively. Writes that touch a whole subject, such as merges and
//! re-dating, hold the subject lock exclusively.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use pacer_core::model::{StudentId, SubjectId};
use tokio::sync::{
    Mutex as AsyncMutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};

type Slots<K, L> = Mutex<HashMap<K, Arc<L>>>;

/// Held while a single tracker is read and written back.
#[derive(Debug)]
pub struct TrackerGuard {
    _tracker: OwnedMutexGuard<()>,
    _subject: OwnedRwLockReadGuard<()>,
}

/// Held while a subject's blocks, items or insertions are rewritten.
pub type SubjectGuard = OwnedRwLockWriteGuard<()>;

#[derive(Debug, Default)]
pub struct EngineLocks {
    subjects: Slots<SubjectId, RwLock<()>>,
    trackers: Slots<(StudentId, SubjectId), AsyncMutex<()>>,
}

impl EngineLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to the tracker of `(student_id, subject_id)`.
    ///
    /// Waits as well while the subject itself is held by [`Self::acquire_subject`].
    pub async fn acquire(&self, student_id: StudentId, subject_id: SubjectId) -> TrackerGuard {
        let subject = slot(&self.subjects, subject_id).read_owned().await;
        let tracker = slot(&self.trackers, (student_id, subject_id)).lock_owned().await;
        TrackerGuard {
            _tracker: tracker,
            _subject: subject,
        }
    }

    /// Wait until no tracker of the subject is held, then hold them all off.
    pub async fn acquire_subject(&self, subject_id: SubjectId) -> SubjectGuard {
        slot(&self.subjects, subject_id).write_owned().await
    }
}

fn slot<K: Eq + Hash, L: Default>(slots: &Slots<K, L>, key: K) -> Arc<L> {
    let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
    // a slot nobody holds or waits on is referenced by the map alone
    slots.retain(|_, s| Arc::strong_count(s) > 1);
    Arc::clone(slots.entry(key).or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held<K: Eq + Hash, L>(slots: &Slots<K, L>) -> usize {
        slots.lock().unwrap().len()
    }

    #[tokio::test]
    async fn same_key_is_exclusive_other_keys_are_not() {
        let locks = EngineLocks::new();
        let guard = locks.acquire(StudentId::new(1), SubjectId::new(1)).await;

        // a different pair is not blocked
        let _other = locks.acquire(StudentId::new(1), SubjectId::new(2)).await;

        let slot = {
            let slots = locks.trackers.lock().unwrap();
            Arc::clone(&slots[&(StudentId::new(1), SubjectId::new(1))])
        };
        assert!(slot.try_lock().is_err());
        drop(guard);
        assert!(slot.try_lock().is_ok());
    }

    #[tokio::test]
    async fn subject_lock_excludes_every_tracker_of_that_subject() {
        let locks = EngineLocks::new();
        let tracker = locks.acquire(StudentId::new(1), SubjectId::new(1)).await;
        let subject = slot(&locks.subjects, SubjectId::new(1));
        assert!(subject.try_write().is_err());
        drop(tracker);

        let whole = locks.acquire_subject(SubjectId::new(1)).await;
        assert!(subject.try_read().is_err());
        // another subject carries on
        let _elsewhere = locks.acquire(StudentId::new(2), SubjectId::new(2)).await;
        drop(whole);
        assert!(subject.try_read().is_ok());
    }

    #[tokio::test]
    async fn released_slots_are_dropped() {
        let locks = EngineLocks::new();
        for student in 1..=5 {
            drop(locks.acquire(StudentId::new(student), SubjectId::new(1)).await);
        }
        drop(locks.acquire_subject(SubjectId::new(3)).await);

        let _guard = locks.acquire(StudentId::new(9), SubjectId::new(2)).await;
        assert_eq!(held(&locks.trackers), 1);
        assert_eq!(held(&locks.subjects), 1);
    }
}
