use pacer_core::model::{
    AnswerStatus, Block, BlockDraft, BlockId, IrregularId, IrregularInsertion, Item, ItemId,
    RestPeriod, ReviewLevel, ReviewState, StudentId, Subject, SubjectId, Tracker,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

fn get_u32(row: &SqliteRow, field: &'static str) -> Result<u32, StorageError> {
    i64_to_u32(field, row.try_get::<i64, _>(field).map_err(ser)?)
}

fn get_bool(row: &SqliteRow, field: &'static str) -> Result<bool, StorageError> {
    Ok(row.try_get::<i64, _>(field).map_err(ser)? != 0)
}

pub(crate) fn subject_id_from_i64(v: i64) -> Result<SubjectId, StorageError> {
    Ok(SubjectId::new(i64_to_u64("subject_id", v)?))
}

pub(crate) fn block_id_from_i64(v: i64) -> Result<BlockId, StorageError> {
    Ok(BlockId::new(i64_to_u64("block_id", v)?))
}

pub(crate) fn item_id_from_i64(v: i64) -> Result<ItemId, StorageError> {
    Ok(ItemId::new(i64_to_u64("item_id", v)?))
}

pub(crate) fn student_id_from_i64(v: i64) -> Result<StudentId, StorageError> {
    Ok(StudentId::new(i64_to_u64("student_id", v)?))
}

pub(crate) fn map_subject_row(row: &SqliteRow) -> Result<Subject, StorageError> {
    Subject::new(
        subject_id_from_i64(row.try_get("id").map_err(ser)?)?,
        row.try_get::<String, _>("label").map_err(ser)?,
        get_u32(row, "review_speed")?,
        get_u32(row, "review_space")?,
    )
    .map_err(ser)
}

pub(crate) fn map_block_row(row: &SqliteRow) -> Result<Block, StorageError> {
    let draft = BlockDraft {
        subject_id: subject_id_from_i64(row.try_get("subject_id").map_err(ser)?)?,
        order: get_u32(row, "block_order")?,
        name: row.try_get("name").map_err(ser)?,
        speed: get_u32(row, "speed")?,
        space: get_u32(row, "space")?,
        lap: get_u32(row, "lap")?,
        size: get_u32(row, "size")?,
        is_tail: get_bool(row, "is_tail")?,
        level: get_u32(row, "level")?,
        start_date: row.try_get("start_date").map_err(ser)?,
        end_date: row.try_get("end_date").map_err(ser)?,
    };
    Block::from_persisted(
        block_id_from_i64(row.try_get("id").map_err(ser)?)?,
        draft,
        get_bool(row, "archived")?,
    )
    .map_err(ser)
}

pub(crate) fn map_item_row(row: &SqliteRow) -> Result<Item, StorageError> {
    let level = ReviewLevel::from_i64(row.try_get("review_level").map_err(ser)?).map_err(ser)?;
    Ok(Item {
        id: item_id_from_i64(row.try_get("id").map_err(ser)?)?,
        subject_id: subject_id_from_i64(row.try_get("subject_id").map_err(ser)?)?,
        block_id: block_id_from_i64(row.try_get("block_id").map_err(ser)?)?,
        in_block_order: get_u32(row, "in_block_order")?,
        overall_order: get_u32(row, "overall_order")?,
        review: ReviewState {
            level,
            countdown_days: get_u32(row, "review_countdown")?,
        },
        try_count: get_u32(row, "try_count")?,
        wrong_count: get_u32(row, "wrong_count")?,
        difficult_count: get_u32(row, "difficult_count")?,
        answer_status: AnswerStatus::from_i64(row.try_get("answer_status").map_err(ser)?)
            .map_err(ser)?,
        last_answered: row.try_get("last_answered").map_err(ser)?,
        review_due_since: row.try_get("review_due_since").map_err(ser)?,
        version: i64_to_u64("version", row.try_get("version").map_err(ser)?)?,
    })
}

pub(crate) fn map_tracker_row(row: &SqliteRow) -> Result<Tracker, StorageError> {
    Ok(Tracker {
        student_id: student_id_from_i64(row.try_get("student_id").map_err(ser)?)?,
        subject_id: subject_id_from_i64(row.try_get("subject_id").map_err(ser)?)?,
        current_block_id: block_id_from_i64(row.try_get("current_block_id").map_err(ser)?)?,
        item_cursor: get_u32(row, "item_cursor")?,
        remaining_space: get_u32(row, "remaining_space")?,
        current_lap: get_u32(row, "current_lap")?,
        is_resting: get_bool(row, "is_resting")?,
        is_enabled: get_bool(row, "is_enabled")?,
        finished: get_bool(row, "finished")?,
        remaining_items: get_u32(row, "remaining_items")?,
        delay_days: get_u32(row, "delay_days")?,
        remaining_review_space: get_u32(row, "remaining_review_space")?,
        version: i64_to_u64("version", row.try_get("version").map_err(ser)?)?,
    })
}

pub(crate) fn map_rest_row(row: &SqliteRow) -> Result<RestPeriod, StorageError> {
    Ok(RestPeriod {
        student_id: student_id_from_i64(row.try_get("student_id").map_err(ser)?)?,
        subject_id: subject_id_from_i64(row.try_get("subject_id").map_err(ser)?)?,
        start: row.try_get("start_date").map_err(ser)?,
        end: row.try_get("end_date").map_err(ser)?,
    })
}

pub(crate) fn map_insertion_row(row: &SqliteRow) -> Result<IrregularInsertion, StorageError> {
    Ok(IrregularInsertion {
        id: IrregularId::new(i64_to_u64("id", row.try_get("id").map_err(ser)?)?),
        subject_id: subject_id_from_i64(row.try_get("subject_id").map_err(ser)?)?,
        target_insert_number: get_u32(row, "target_insert_number")?,
        insert_into_block_id: block_id_from_i64(row.try_get("insert_into_block_id").map_err(ser)?)?,
        former_block_id: row
            .try_get::<Option<i64>, _>("former_block_id")
            .map_err(ser)?
            .map(block_id_from_i64)
            .transpose()?,
        is_modified: get_bool(row, "is_modified")?,
    })
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    i64_to_u32(field, v)
}
