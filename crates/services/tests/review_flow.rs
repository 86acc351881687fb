use std::sync::Arc;

use pacer_core::error::{ConcurrentMutationConflict, MissingReferenceData};
use pacer_core::model::{
    Answer, BlockDraft, BlockId, BlockSequence, EngineSettings, ItemId, ReviewLevel, ReviewState,
    StudentId, Subject, SubjectId,
};
use pacer_core::time::{fixed_now, fixed_today};
use services::{AnswerServiceError, Clock, EngineServices, EntityRef, PresentationSync, RecordingSync};
use storage::repository::Storage;

async fn seed(storage: &Storage) {
    let subject_id = SubjectId::new(1);
    let subject = Subject::new(subject_id, "Reading", 2, 2).unwrap();
    storage.subjects.upsert_subject(&subject).await.unwrap();
    let block = BlockDraft {
        subject_id,
        order: 1,
        name: "Block 1".into(),
        speed: 1,
        space: 1,
        lap: 1,
        size: 3,
        is_tail: true,
        level: 1,
        start_date: None,
        end_date: None,
    }
    .validate(BlockId::new(101))
    .unwrap();
    storage.blocks.upsert_block(&block).await.unwrap();
    let sequence = BlockSequence::new(subject_id, vec![block]).unwrap();
    storage.items.insert_items(sequence.provision_items()).await.unwrap();
}

fn engine(storage: &Storage) -> (EngineServices, Arc<RecordingSync>) {
    let sync = Arc::new(RecordingSync::new());
    let services = EngineServices::from_storage(
        storage,
        Clock::fixed(fixed_now()),
        EngineSettings::default(),
        Arc::clone(&sync) as Arc<dyn PresentationSync>,
    );
    (services, sync)
}

const RIGHT: Answer = Answer {
    correct: true,
    difficult: false,
};

#[tokio::test]
async fn todo_answers_promote_into_the_countdown_levels() {
    let storage = Storage::in_memory();
    seed(&storage).await;
    let (services, sync) = engine(&storage);
    let answers = services.answers();
    let item = ItemId::new(1);

    // outside the assigned workload the first levels hold
    let held = answers.submit(item, RIGHT, false).await.unwrap();
    assert!(!held.changed());

    answers.submit(item, RIGHT, true).await.unwrap();
    let promoted = answers.submit(item, RIGHT, true).await.unwrap();
    assert_eq!(promoted.to, ReviewState::at(ReviewLevel::Level2));
    assert_eq!(promoted.to.countdown_days, 30);

    let wrong = Answer {
        correct: false,
        difficult: true,
    };
    let kept = answers.submit(item, wrong, false).await.unwrap();
    assert_eq!(kept.to.level, ReviewLevel::Level2);

    let stored = storage.items.get_item(item).await.unwrap();
    assert_eq!(stored.try_count, 4);
    assert_eq!(stored.wrong_count, 1);
    assert_eq!(stored.difficult_count, 1);
    assert_eq!(stored.last_answered, Some(fixed_today()));

    let changes = sync.changes();
    assert_eq!(changes.len(), 4);
    assert_eq!(changes[3].entity, EntityRef::Item { item_id: item });
    assert_eq!(changes[3].field("review_level"), Some(&serde_json::Value::from(2_i64)));

    let err = answers.submit(ItemId::new(99), RIGHT, true).await.unwrap_err();
    assert!(matches!(
        err,
        AnswerServiceError::Missing(MissingReferenceData::UnknownItem(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_answers_on_one_item_never_overwrite_each_other() {
    let storage = Storage::in_memory();
    seed(&storage).await;
    let (services, _sync) = engine(&storage);
    let item = ItemId::new(1);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let answers = services.answers();
        handles.push(tokio::spawn(async move { answers.submit(item, RIGHT, false).await }));
    }
    let mut stored = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => stored += 1,
            Err(err) => assert!(matches!(
                err,
                AnswerServiceError::Conflict(ConcurrentMutationConflict { entity: "item", .. })
            )),
        }
    }
    assert!(stored >= 1);

    let item = storage.items.get_item(item).await.unwrap();
    assert_eq!(item.try_count, stored);
    assert_eq!(item.version, u64::from(stored));
}

#[tokio::test]
async fn daily_review_paces_due_items() {
    let storage = Storage::in_memory();
    seed(&storage).await;
    let (services, _sync) = engine(&storage);
    let student = StudentId::new(1);
    let subject = SubjectId::new(1);
    services.trackers().enroll(student, subject).await.unwrap();

    // three items one day from due
    let mut items = storage.items.items_for_subject(subject).await.unwrap();
    for item in &mut items {
        item.review = ReviewState {
            level: ReviewLevel::Level3,
            countdown_days: 1,
        };
    }
    storage.items.update_items(&items).await.unwrap();

    let answers = services.answers();
    let first = answers.daily_review(student, subject).await.unwrap();
    assert_eq!(first.items, vec![ItemId::new(1), ItemId::new(2)]);
    assert_eq!(first.remaining_space, 1);
    let tracker = services.trackers().tracker(student, subject).await.unwrap();
    assert_eq!(tracker.remaining_review_space, 1);

    let quiet = answers.daily_review(student, subject).await.unwrap();
    assert!(quiet.items.is_empty());
    assert_eq!(quiet.remaining_space, 0);

    // answering the picked items restarts their countdown; item 3 is next
    answers.submit(ItemId::new(1), RIGHT, false).await.unwrap();
    answers.submit(ItemId::new(2), RIGHT, false).await.unwrap();
    let next = answers.daily_review(student, subject).await.unwrap();
    assert_eq!(next.items, vec![ItemId::new(3)]);

    let item = storage.items.get_item(ItemId::new(3)).await.unwrap();
    assert_eq!(item.review_due_since, Some(fixed_today()));
}

#[tokio::test]
async fn daily_review_needs_an_enrollment() {
    let storage = Storage::in_memory();
    seed(&storage).await;
    let (services, _sync) = engine(&storage);

    let err = services
        .answers()
        .daily_review(StudentId::new(7), SubjectId::new(1))
        .await
        .unwrap_err();
    assert!(matches!(err, AnswerServiceError::Load(_)));

    let err = services
        .answers()
        .daily_review(StudentId::new(7), SubjectId::new(9))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AnswerServiceError::Missing(MissingReferenceData::Subject(_))
    ));
}
