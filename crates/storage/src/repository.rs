use async_trait::async_trait;
use chrono::NaiveDate;
use pacer_core::error::MissingReferenceData;
use pacer_core::merge::MergePlan;
use pacer_core::model::{
    ArchiveTarget, Block, BlockId, BlockSequence, ForecastReport, IrregularId, IrregularInsertion,
    Item, ItemId, NewItem, RestPeriod, StudentId, Subject, SubjectId, Tracker,
};
use pacer_core::schedule::BlockSchedule;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// New dates for one block, written only if the block still carries the
/// dates it had when it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDateUpdate {
    pub block_id: BlockId,
    pub read_start: Option<NaiveDate>,
    pub read_end: Option<NaiveDate>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl BlockDateUpdate {
    /// Pair every schedule entry with the dates its block has in `sequence`.
    ///
    /// # Errors
    ///
    /// Returns `MissingReferenceData::Block` if a scheduled block is not part
    /// of `sequence`.
    pub fn against(
        sequence: &BlockSequence,
        schedule: &[BlockSchedule],
    ) -> Result<Vec<Self>, MissingReferenceData> {
        schedule
            .iter()
            .map(|s| {
                let block = sequence.require(s.block_id)?;
                Ok(Self {
                    block_id: s.block_id,
                    read_start: block.start_date(),
                    read_end: block.end_date(),
                    start_date: s.start_date,
                    end_date: s.end_date,
                })
            })
            .collect()
    }
}

#[async_trait]
pub trait SubjectRepository: Send + Sync {
    /// Persist or update a subject.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the subject cannot be stored.
    async fn upsert_subject(&self, subject: &Subject) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_subject(&self, id: SubjectId) -> Result<Subject, StorageError>;
}

#[async_trait]
pub trait BlockRepository: Send + Sync {
    /// Persist or update a block.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the block cannot be stored.
    async fn upsert_block(&self, block: &Block) -> Result<(), StorageError>;

    /// Every block of a subject, archived ones included, in `order`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on read failures.
    async fn blocks_for_subject(&self, subject_id: SubjectId) -> Result<Vec<Block>, StorageError>;

    /// Re-date several blocks in one transaction.
    ///
    /// # Errors
    ///
    /// Nothing is changed on error.
    ///
    /// - `StorageError::NotFound` if any block is missing
    /// - `StorageError::Conflict` if any block's dates moved since they were read
    async fn update_block_dates(&self, updates: &[BlockDateUpdate]) -> Result<(), StorageError>;
}

#[async_trait]
pub trait ItemRepository: Send + Sync {
    /// Insert items and assign ids, all or none.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if any insert fails.
    async fn insert_items(&self, items: Vec<NewItem>) -> Result<Vec<Item>, StorageError>;

    /// Items of a subject ordered by `overall_order`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on read failures.
    async fn items_for_subject(&self, subject_id: SubjectId) -> Result<Vec<Item>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing.
    async fn get_item(&self, id: ItemId) -> Result<Item, StorageError>;

    /// Write back answer and review fields of several items at once.
    ///
    /// Each write is conditional on the stored `version` still equal to the
    /// item's, and bumps it.
    ///
    /// # Errors
    ///
    /// Nothing is written on error.
    ///
    /// - `StorageError::NotFound` if any item is missing
    /// - `StorageError::Conflict` if any stored version moved on
    async fn update_items(&self, items: &[Item]) -> Result<(), StorageError>;
}

#[async_trait]
pub trait TrackerRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if a tracker already exists for the pair.
    async fn insert_tracker(&self, tracker: &Tracker) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the student is not enrolled in the subject.
    async fn get_tracker(&self, student_id: StudentId, subject_id: SubjectId) -> Result<Tracker, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on read failures.
    async fn trackers_for_student(&self, student_id: StudentId) -> Result<Vec<Tracker>, StorageError>;

    /// Every enrollment in a subject, ordered by student.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on read failures.
    async fn trackers_for_subject(&self, subject_id: SubjectId) -> Result<Vec<Tracker>, StorageError>;

    /// Write `tracker` if the stored version still equals `tracker.version`.
    ///
    /// Returns the stored tracker with its bumped version.
    ///
    /// # Errors
    ///
    /// - `StorageError::NotFound` if there is no stored tracker
    /// - `StorageError::Conflict` if the stored version moved on
    async fn update_tracker(&self, tracker: &Tracker) -> Result<Tracker, StorageError>;
}

#[async_trait]
pub trait RestRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the period cannot be stored.
    async fn add_rest(&self, rest: &RestPeriod) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on read failures.
    async fn rests_for(&self, student_id: StudentId, subject_id: SubjectId) -> Result<Vec<RestPeriod>, StorageError>;
}

#[async_trait]
pub trait IrregularRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the insertion cannot be stored.
    async fn upsert_insertion(&self, insertion: &IrregularInsertion) -> Result<(), StorageError>;

    /// Insertions of a subject that are neither merged nor archived.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on read failures.
    async fn pending_insertions(&self, subject_id: SubjectId) -> Result<Vec<IrregularInsertion>, StorageError>;

    /// Write a merge in one transaction and return the inserted items.
    ///
    /// # Errors
    ///
    /// Nothing is written on error.
    ///
    /// - `StorageError::NotFound` if a block, item or insertion named by the plan is missing
    /// - `StorageError::Conflict` if an insertion named by the plan was already
    ///   merged or archived
    async fn apply_merge(&self, plan: &MergePlan) -> Result<Vec<Item>, StorageError>;
}

#[async_trait]
pub trait AverageTimeRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the value cannot be stored.
    async fn set_average_time(&self, block_id: BlockId, minutes: u32) -> Result<(), StorageError>;

    /// Known minutes per item for the given blocks; unknown blocks are left out.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on read failures.
    async fn average_times(&self, block_ids: &[BlockId]) -> Result<HashMap<BlockId, u32>, StorageError>;
}

#[async_trait]
pub trait ForecastRepository: Send + Sync {
    /// Replace the stored forecast of the report's student.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the report cannot be stored; the previous
    /// report is kept then.
    async fn save_forecast(&self, report: &ForecastReport) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on read failures.
    async fn latest_forecast(&self, student_id: StudentId) -> Result<Option<ForecastReport>, StorageError>;
}

//
// ─── IN MEMORY ─────────────────────────────────────────────────────────────────
//

#[derive(Default)]
struct InsertionRow {
    insertion: Option<IrregularInsertion>,
    merged: bool,
    archived: bool,
}

#[derive(Default)]
struct MemoryState {
    subjects: HashMap<SubjectId, Subject>,
    blocks: HashMap<BlockId, Block>,
    items: HashMap<ItemId, Item>,
    next_item_id: u64,
    trackers: HashMap<(StudentId, SubjectId), Tracker>,
    rests: Vec<RestPeriod>,
    insertions: HashMap<IrregularId, InsertionRow>,
    average_times: HashMap<BlockId, u32>,
    forecasts: HashMap<StudentId, ForecastReport>,
}

impl MemoryState {
    fn assign(&mut self, new: NewItem) -> Item {
        self.next_item_id += 1;
        let item = new.assign_id(ItemId::new(self.next_item_id));
        self.items.insert(item.id, item.clone());
        item
    }
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// One lock guards all tables so multi-table writes are atomic.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl SubjectRepository for InMemoryRepository {
    async fn upsert_subject(&self, subject: &Subject) -> Result<(), StorageError> {
        self.lock()?.subjects.insert(subject.id(), subject.clone());
        Ok(())
    }

    async fn get_subject(&self, id: SubjectId) -> Result<Subject, StorageError> {
        self.lock()?
            .subjects
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl BlockRepository for InMemoryRepository {
    async fn upsert_block(&self, block: &Block) -> Result<(), StorageError> {
        self.lock()?.blocks.insert(block.id(), block.clone());
        Ok(())
    }

    async fn blocks_for_subject(&self, subject_id: SubjectId) -> Result<Vec<Block>, StorageError> {
        let guard = self.lock()?;
        let mut blocks: Vec<Block> = guard
            .blocks
            .values()
            .filter(|b| b.subject_id() == subject_id)
            .cloned()
            .collect();
        blocks.sort_by_key(|b| (b.order(), b.id()));
        Ok(blocks)
    }

    async fn update_block_dates(&self, updates: &[BlockDateUpdate]) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let mut staged = Vec::with_capacity(updates.len());
        for u in updates {
            let mut block = guard.blocks.get(&u.block_id).cloned().ok_or(StorageError::NotFound)?;
            if (block.start_date(), block.end_date()) != (u.read_start, u.read_end) {
                return Err(StorageError::Conflict);
            }
            block
                .reschedule(u.start_date, u.end_date)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            staged.push(block);
        }
        for block in staged {
            guard.blocks.insert(block.id(), block);
        }
        Ok(())
    }
}

#[async_trait]
impl ItemRepository for InMemoryRepository {
    async fn insert_items(&self, items: Vec<NewItem>) -> Result<Vec<Item>, StorageError> {
        let mut guard = self.lock()?;
        Ok(items.into_iter().map(|n| guard.assign(n)).collect())
    }

    async fn items_for_subject(&self, subject_id: SubjectId) -> Result<Vec<Item>, StorageError> {
        let guard = self.lock()?;
        let mut items: Vec<Item> = guard
            .items
            .values()
            .filter(|i| i.subject_id == subject_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| (i.overall_order, i.id));
        Ok(items)
    }

    async fn get_item(&self, id: ItemId) -> Result<Item, StorageError> {
        self.lock()?
            .items
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn update_items(&self, items: &[Item]) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        for item in items {
            let stored = guard.items.get(&item.id).ok_or(StorageError::NotFound)?;
            if stored.version != item.version {
                return Err(StorageError::Conflict);
            }
        }
        for item in items {
            let mut next = item.clone();
            next.version += 1;
            guard.items.insert(next.id, next);
        }
        Ok(())
    }
}

#[async_trait]
impl TrackerRepository for InMemoryRepository {
    async fn insert_tracker(&self, tracker: &Tracker) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let key = (tracker.student_id, tracker.subject_id);
        if guard.trackers.contains_key(&key) {
            return Err(StorageError::Conflict);
        }
        guard.trackers.insert(key, tracker.clone());
        Ok(())
    }

    async fn get_tracker(&self, student_id: StudentId, subject_id: SubjectId) -> Result<Tracker, StorageError> {
        self.lock()?
            .trackers
            .get(&(student_id, subject_id))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn trackers_for_student(&self, student_id: StudentId) -> Result<Vec<Tracker>, StorageError> {
        let guard = self.lock()?;
        let mut trackers: Vec<Tracker> = guard
            .trackers
            .values()
            .filter(|t| t.student_id == student_id)
            .cloned()
            .collect();
        trackers.sort_by_key(|t| t.subject_id);
        Ok(trackers)
    }

    async fn trackers_for_subject(&self, subject_id: SubjectId) -> Result<Vec<Tracker>, StorageError> {
        let guard = self.lock()?;
        let mut trackers: Vec<Tracker> = guard
            .trackers
            .values()
            .filter(|t| t.subject_id == subject_id)
            .cloned()
            .collect();
        trackers.sort_by_key(|t| t.student_id);
        Ok(trackers)
    }

    async fn update_tracker(&self, tracker: &Tracker) -> Result<Tracker, StorageError> {
        let mut guard = self.lock()?;
        let stored = guard
            .trackers
            .get_mut(&(tracker.student_id, tracker.subject_id))
            .ok_or(StorageError::NotFound)?;
        if stored.version != tracker.version {
            return Err(StorageError::Conflict);
        }
        let mut next = tracker.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl RestRepository for InMemoryRepository {
    async fn add_rest(&self, rest: &RestPeriod) -> Result<(), StorageError> {
        self.lock()?.rests.push(*rest);
        Ok(())
    }

    async fn rests_for(&self, student_id: StudentId, subject_id: SubjectId) -> Result<Vec<RestPeriod>, StorageError> {
        Ok(self
            .lock()?
            .rests
            .iter()
            .filter(|r| r.student_id == student_id && r.subject_id == subject_id)
            .copied()
            .collect())
    }
}

#[async_trait]
impl IrregularRepository for InMemoryRepository {
    async fn upsert_insertion(&self, insertion: &IrregularInsertion) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let row = guard.insertions.entry(insertion.id).or_default();
        row.insertion = Some(insertion.clone());
        Ok(())
    }

    async fn pending_insertions(&self, subject_id: SubjectId) -> Result<Vec<IrregularInsertion>, StorageError> {
        let guard = self.lock()?;
        let mut pending: Vec<IrregularInsertion> = guard
            .insertions
            .values()
            .filter(|r| !r.merged && !r.archived)
            .filter_map(|r| r.insertion.clone())
            .filter(|i| i.subject_id == subject_id)
            .collect();
        pending.sort_by_key(|i| i.id);
        Ok(pending)
    }

    async fn apply_merge(&self, plan: &MergePlan) -> Result<Vec<Item>, StorageError> {
        let mut guard = self.lock()?;

        let blocks_known = plan.blocks.iter().all(|b| guard.blocks.contains_key(&b.id()));
        let items_known = plan.renumbered.iter().all(|r| guard.items.contains_key(&r.item_id));
        let targets_known = plan.archived.iter().all(|t| match t {
            ArchiveTarget::Block(id) => guard.blocks.contains_key(id),
            ArchiveTarget::Insertion(id) => guard.insertions.contains_key(id),
        });
        let merged_known = plan.merged.iter().all(|id| guard.insertions.contains_key(id));
        if !(blocks_known && items_known && targets_known && merged_known) {
            return Err(StorageError::NotFound);
        }
        let already_applied = plan
            .merged
            .iter()
            .filter_map(|id| guard.insertions.get(id))
            .any(|row| row.merged || row.archived);
        if already_applied {
            return Err(StorageError::Conflict);
        }

        for block in &plan.blocks {
            guard.blocks.insert(block.id(), block.clone());
        }
        for r in &plan.renumbered {
            if let Some(item) = guard.items.get_mut(&r.item_id) {
                item.in_block_order = r.in_block_order;
                item.overall_order = r.overall_order;
            }
        }
        let inserted: Vec<Item> = plan
            .new_items
            .iter()
            .cloned()
            .map(|n| guard.assign(n))
            .collect();
        for id in &plan.merged {
            if let Some(row) = guard.insertions.get_mut(id) {
                row.merged = true;
            }
        }
        for target in &plan.archived {
            match target {
                ArchiveTarget::Block(id) => {
                    if let Some(block) = guard.blocks.get_mut(id) {
                        block.archive();
                    }
                }
                ArchiveTarget::Insertion(id) => {
                    if let Some(row) = guard.insertions.get_mut(id) {
                        row.archived = true;
                    }
                }
            }
        }
        Ok(inserted)
    }
}

#[async_trait]
impl AverageTimeRepository for InMemoryRepository {
    async fn set_average_time(&self, block_id: BlockId, minutes: u32) -> Result<(), StorageError> {
        self.lock()?.average_times.insert(block_id, minutes);
        Ok(())
    }

    async fn average_times(&self, block_ids: &[BlockId]) -> Result<HashMap<BlockId, u32>, StorageError> {
        let guard = self.lock()?;
        Ok(block_ids
            .iter()
            .filter_map(|id| guard.average_times.get(id).map(|m| (*id, *m)))
            .collect())
    }
}

#[async_trait]
impl ForecastRepository for InMemoryRepository {
    async fn save_forecast(&self, report: &ForecastReport) -> Result<(), StorageError> {
        self.lock()?.forecasts.insert(report.student_id, report.clone());
        Ok(())
    }

    async fn latest_forecast(&self, student_id: StudentId) -> Result<Option<ForecastReport>, StorageError> {
        Ok(self.lock()?.forecasts.get(&student_id).cloned())
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub subjects: Arc<dyn SubjectRepository>,
    pub blocks: Arc<dyn BlockRepository>,
    pub items: Arc<dyn ItemRepository>,
    pub trackers: Arc<dyn TrackerRepository>,
    pub rests: Arc<dyn RestRepository>,
    pub irregulars: Arc<dyn IrregularRepository>,
    pub average_times: Arc<dyn AverageTimeRepository>,
    pub forecasts: Arc<dyn ForecastRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_backend(InMemoryRepository::new())
    }

    /// Wire every repository to one backend.
    pub fn from_backend<R>(repo: R) -> Self
    where
        R: SubjectRepository
            + BlockRepository
            + ItemRepository
            + TrackerRepository
            + RestRepository
            + IrregularRepository
            + AverageTimeRepository
            + ForecastRepository
            + Clone
            + 'static,
    {
        Self {
            subjects: Arc::new(repo.clone()),
            blocks: Arc::new(repo.clone()),
            items: Arc::new(repo.clone()),
            trackers: Arc::new(repo.clone()),
            rests: Arc::new(repo.clone()),
            irregulars: Arc::new(repo.clone()),
            average_times: Arc::new(repo.clone()),
            forecasts: Arc::new(repo),
        }
    }
}
