use std::sync::Arc;

use chrono::{Days, NaiveDate};
use pacer_core::error::{InvalidStateTransition, MissingReferenceData};
use pacer_core::forecast::ForecastError;
use pacer_core::live::AdvanceError;
use pacer_core::merge::MergeError;
use pacer_core::model::{
    BlockDraft, BlockId, BlockSequence, EngineSettings, IrregularId, IrregularInsertion, ItemId,
    RestPeriod, StudentId, Subject, SubjectId,
};
use pacer_core::progression::Transition;
use pacer_core::time::{fixed_now, fixed_today};
use services::{
    Clock, EngineServices, EntityRef, ForecastServiceError, MergeServiceError, RecordingSync,
    TrackerServiceError,
};
use storage::repository::Storage;

fn student() -> StudentId {
    StudentId::new(1)
}

fn subject() -> SubjectId {
    SubjectId::new(1)
}

fn after(days: u64) -> NaiveDate {
    fixed_today().checked_add_days(Days::new(days)).unwrap()
}

/// Stores a subject with blocks from `(speed, space, lap, size)` and provisions its items.
async fn seed_subject(
    storage: &Storage,
    subject_id: SubjectId,
    specs: &[(u32, u32, u32, u32)],
) -> BlockSequence {
    let subject = Subject::new(subject_id, format!("Subject {subject_id}"), 2, 2).unwrap();
    storage.subjects.upsert_subject(&subject).await.unwrap();

    let last = specs.len();
    let mut blocks = Vec::new();
    for (idx, &(speed, space, lap, size)) in specs.iter().enumerate() {
        let order = u32::try_from(idx + 1).unwrap();
        let block = BlockDraft {
            subject_id,
            order,
            name: format!("Block {order}"),
            speed,
            space,
            lap,
            size,
            is_tail: idx + 1 == last,
            level: 1,
            start_date: None,
            end_date: None,
        }
        .validate(BlockId::new(subject_id.value() * 100 + u64::from(order)))
        .unwrap();
        storage.blocks.upsert_block(&block).await.unwrap();
        blocks.push(block);
    }
    let sequence = BlockSequence::new(subject_id, blocks).unwrap();
    storage.items.insert_items(sequence.provision_items()).await.unwrap();
    sequence
}

fn engine(storage: &Storage) -> (EngineServices, Arc<RecordingSync>) {
    let sync = Arc::new(RecordingSync::new());
    let services = EngineServices::from_storage(
        storage,
        Clock::fixed(fixed_now()),
        EngineSettings::default(),
        Arc::clone(&sync) as Arc<dyn services::PresentationSync>,
    );
    (services, sync)
}

#[tokio::test]
async fn walking_a_subject_to_completion() {
    let storage = Storage::in_memory();
    seed_subject(&storage, subject(), &[(2, 1, 1, 4)]).await;
    let (services, sync) = engine(&storage);
    let trackers = services.trackers();

    let tracker = trackers.enroll(student(), subject()).await.unwrap();
    assert_eq!(tracker.remaining_items, 4);
    assert!(matches!(
        trackers.enroll(student(), subject()).await,
        Err(TrackerServiceError::AlreadyEnrolled { .. })
    ));

    let first = trackers.complete_current(student(), subject()).await.unwrap();
    assert_eq!(first.next_item_id, Some(ItemId::new(1)));
    assert_eq!(first.released, 2);
    assert_eq!(first.remaining_items, 2);
    assert!(!first.subject_complete);
    assert_eq!(first.tracker.version, 1);

    let second = trackers.complete_current(student(), subject()).await.unwrap();
    assert_eq!(second.next_item_id, Some(ItemId::new(3)));
    assert_eq!(second.transition, Transition::Completed);
    assert!(second.subject_complete);

    let third = trackers.complete_current(student(), subject()).await.unwrap();
    assert_eq!(third.transition, Transition::Finished);
    assert_eq!(third.next_item_id, None);
    assert!(third.subject_complete);
    assert!(!third.is_idle());

    let changes = sync.changes();
    assert_eq!(changes.len(), 3);
    assert_eq!(
        changes[0].entity,
        EntityRef::Tracker {
            student_id: student(),
            subject_id: subject()
        }
    );
    assert_eq!(changes[0].field("next_item_id"), Some(&serde_json::Value::from(1_u64)));
    assert_eq!(changes[2].field("subject_complete"), Some(&serde_json::Value::Bool(true)));
}

#[tokio::test]
async fn cooldown_and_rest_days_issue_nothing() {
    let storage = Storage::in_memory();
    seed_subject(&storage, subject(), &[(1, 3, 1, 3)]).await;
    let (services, _sync) = engine(&storage);
    let trackers = services.trackers();
    trackers.enroll(student(), subject()).await.unwrap();

    let released = trackers.complete_current(student(), subject()).await.unwrap();
    assert_eq!(released.tracker.remaining_space, 2);

    let cooling = trackers.complete_current(student(), subject()).await.unwrap();
    assert_eq!(cooling.transition, Transition::Cooldown);
    assert!(cooling.is_idle());
    assert_eq!(cooling.next_item_id, None);
    assert!(!cooling.subject_complete);

    storage
        .rests
        .add_rest(&RestPeriod {
            student_id: student(),
            subject_id: subject(),
            start: fixed_today(),
            end: after(1),
        })
        .await
        .unwrap();
    let resting = trackers.complete_current(student(), subject()).await.unwrap();
    assert_eq!(resting.transition, Transition::Resting);
    assert!(resting.is_idle());
    assert_eq!(resting.tracker.remaining_space, cooling.tracker.remaining_space);
}

#[tokio::test]
async fn failed_advance_leaves_tracker_unchanged() {
    let storage = Storage::in_memory();
    seed_subject(&storage, subject(), &[(1, 1, 1, 3)]).await;
    let (services, _sync) = engine(&storage);
    let trackers = services.trackers();
    trackers.enroll(student(), subject()).await.unwrap();
    trackers.set_enabled(student(), subject(), false).await.unwrap();

    let err = trackers.complete_current(student(), subject()).await.unwrap_err();
    assert!(matches!(
        err,
        TrackerServiceError::Advance(AdvanceError::Invalid(
            InvalidStateTransition::TrackerDisabled { .. }
        ))
    ));
    let tracker = trackers.tracker(student(), subject()).await.unwrap();
    assert_eq!(tracker.item_cursor, 1);

    let missing = trackers.complete_current(StudentId::new(2), subject()).await.unwrap_err();
    assert!(matches!(missing, TrackerServiceError::Load(_)));
}

#[tokio::test]
async fn concurrent_advances_are_serialized() {
    let storage = Storage::in_memory();
    seed_subject(&storage, subject(), &[(1, 1, 1, 10)]).await;
    let (services, _sync) = engine(&storage);
    let trackers = services.trackers();
    trackers.enroll(student(), subject()).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let trackers = Arc::clone(&trackers);
        handles.push(tokio::spawn(async move {
            trackers.complete_current(student(), subject()).await
        }));
    }
    let mut issued = Vec::new();
    for handle in handles {
        let advance = handle.await.unwrap().unwrap();
        issued.push(advance.next_item_id.unwrap());
    }
    issued.sort();
    issued.dedup();
    assert_eq!(issued.len(), 5);

    let tracker = trackers.tracker(student(), subject()).await.unwrap();
    assert_eq!(tracker.item_cursor, 6);
    assert_eq!(tracker.version, 5);
}

#[tokio::test]
async fn forecast_keeps_last_good_report() {
    let storage = Storage::in_memory();
    seed_subject(&storage, subject(), &[(2, 1, 1, 4)]).await;
    storage.average_times.set_average_time(BlockId::new(101), 5).await.unwrap();
    let (services, _sync) = engine(&storage);
    services.trackers().enroll(student(), subject()).await.unwrap();
    let forecasts = services.forecasts();

    let report = forecasts.refresh(student()).await.unwrap();
    assert_eq!(report.total_days, 2);
    assert_eq!(report.patterns.len(), 1);
    assert_eq!(report.patterns[0].per_subject_minutes[&subject()], 10);
    assert_eq!(report.start_date, fixed_today());

    // a second subject without average times makes the next run fail
    let other = SubjectId::new(2);
    seed_subject(&storage, other, &[(1, 1, 1, 2)]).await;
    services.trackers().enroll(student(), other).await.unwrap();
    let err = forecasts.refresh(student()).await.unwrap_err();
    assert!(matches!(
        err,
        ForecastServiceError::Forecast(ForecastError::Missing(MissingReferenceData::AverageTime(_)))
    ));

    assert_eq!(forecasts.latest(student()).await.unwrap(), Some(report));
}

#[tokio::test]
async fn forecasts_for_many_students_fail_independently() {
    let storage = Storage::in_memory();
    seed_subject(&storage, subject(), &[(1, 1, 1, 3)]).await;
    seed_subject(&storage, SubjectId::new(2), &[(1, 1, 1, 3)]).await;
    storage.average_times.set_average_time(BlockId::new(101), 4).await.unwrap();
    let (services, _sync) = engine(&storage);
    services.trackers().enroll(student(), subject()).await.unwrap();
    services.trackers().enroll(StudentId::new(2), SubjectId::new(2)).await.unwrap();

    let results = services
        .forecasts()
        .refresh_many(&[StudentId::new(2), student()])
        .await
        .unwrap();
    assert_eq!(results[0].0, StudentId::new(2));
    assert!(results[0].1.is_err());
    assert_eq!(results[1].0, student());
    assert_eq!(results[1].1.as_ref().unwrap().total_days, 3);
}

#[tokio::test]
async fn schedule_shift_redates_later_blocks_around_rests() {
    let storage = Storage::in_memory();
    seed_subject(&storage, subject(), &[(1, 1, 1, 2), (1, 1, 1, 2)]).await;
    let (services, sync) = engine(&storage);
    services.trackers().enroll(student(), subject()).await.unwrap();
    let schedules = services.schedules();

    let planned = schedules.plan(student(), subject(), fixed_today()).await.unwrap();
    assert_eq!(planned[1].start_date, after(2));
    assert_eq!(planned[1].end_date, after(3));

    storage
        .rests
        .add_rest(&RestPeriod {
            student_id: student(),
            subject_id: subject(),
            start: after(4),
            end: after(4),
        })
        .await
        .unwrap();

    let delayed = schedules.shift(student(), subject(), 2).await.unwrap();
    assert_eq!(delayed[0].start_date, fixed_today());
    assert_eq!(delayed[0].end_date, after(3));
    assert_eq!(delayed[1].start_date, after(5));
    assert_eq!(delayed[1].end_date, after(6));

    let blocks = storage.blocks.blocks_for_subject(subject()).await.unwrap();
    assert_eq!(blocks[1].start_date(), Some(after(5)));

    let expedited = schedules.shift(student(), subject(), -10).await.unwrap();
    assert_eq!(expedited[0].end_date, fixed_today());
    assert_eq!(expedited[1].start_date, after(1));

    // two blocks per call, three calls
    assert_eq!(sync.changes().len(), 6);
}

#[tokio::test]
async fn merge_splices_insertions_behind_the_delivered_frontier() {
    let storage = Storage::in_memory();
    seed_subject(&storage, subject(), &[(1, 1, 1, 3), (1, 1, 1, 2)]).await;
    let (services, _sync) = engine(&storage);
    let trackers = services.trackers();
    trackers.enroll(student(), subject()).await.unwrap();
    trackers.complete_current(student(), subject()).await.unwrap();

    let insertion = IrregularInsertion {
        id: IrregularId::new(1),
        subject_id: subject(),
        target_insert_number: 2,
        insert_into_block_id: BlockId::new(101),
        former_block_id: None,
        is_modified: false,
    };
    storage.irregulars.upsert_insertion(&insertion).await.unwrap();

    let outcome = services.merges().merge_pending(subject()).await.unwrap();
    assert_eq!(outcome.inserted.len(), 1);
    assert_eq!(outcome.inserted[0].in_block_order, 3);
    assert_eq!(outcome.inserted[0].overall_order, 3);
    assert_eq!(outcome.plan.added_workload, 1);

    let orders: Vec<(u64, u32, u32)> = storage
        .items
        .items_for_subject(subject())
        .await
        .unwrap()
        .iter()
        .map(|i| (i.block_id.value(), i.in_block_order, i.overall_order))
        .collect();
    assert_eq!(
        orders,
        vec![(101, 1, 1), (101, 2, 2), (101, 3, 3), (101, 4, 4), (102, 1, 5), (102, 2, 6)]
    );
    let tracker = trackers.tracker(student(), subject()).await.unwrap();
    assert_eq!(tracker.remaining_items, 5);

    // item 2 is handed out next; inserting after item 1 would renumber it
    trackers.complete_current(student(), subject()).await.unwrap();
    let late = IrregularInsertion {
        id: IrregularId::new(2),
        target_insert_number: 1,
        ..insertion
    };
    storage.irregulars.upsert_insertion(&late).await.unwrap();
    let err = services.merges().merge_pending(subject()).await.unwrap_err();
    assert!(matches!(
        err,
        MergeServiceError::Merge(MergeError::Invalid(InvalidStateTransition::DeliveredItem { .. }))
    ));
    assert_eq!(storage.irregulars.pending_insertions(subject()).await.unwrap(), vec![late]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_merges_in_one_subject_insert_once() {
    let storage = Storage::in_memory();
    seed_subject(&storage, subject(), &[(1, 1, 1, 3), (1, 1, 1, 3)]).await;
    let (services, _sync) = engine(&storage);
    let trackers = services.trackers();
    trackers.enroll(student(), subject()).await.unwrap();
    trackers.enroll(StudentId::new(2), subject()).await.unwrap();

    let insertion = IrregularInsertion {
        id: IrregularId::new(1),
        subject_id: subject(),
        target_insert_number: 2,
        insert_into_block_id: BlockId::new(101),
        former_block_id: None,
        is_modified: false,
    };
    storage.irregulars.upsert_insertion(&insertion).await.unwrap();

    // each student's session asks for the merge at the same time
    let mut handles = Vec::new();
    for _ in 0..2 {
        let merges = services.merges();
        handles.push(tokio::spawn(async move { merges.merge_pending(subject()).await }));
    }
    let mut inserted = 0;
    for handle in handles {
        inserted += handle.await.unwrap().unwrap().inserted.len();
    }
    assert_eq!(inserted, 1);

    let items = storage.items.items_for_subject(subject()).await.unwrap();
    assert_eq!(items.len(), 7);
    let orders: Vec<u32> = items.iter().map(|i| i.overall_order).collect();
    assert_eq!(orders, (1..=7).collect::<Vec<u32>>());
    let blocks = storage.blocks.blocks_for_subject(subject()).await.unwrap();
    assert_eq!(blocks[0].size(), 4);

    for student_id in [student(), StudentId::new(2)] {
        let tracker = trackers.tracker(student_id, subject()).await.unwrap();
        assert_eq!(tracker.remaining_items, 7);
    }
}
