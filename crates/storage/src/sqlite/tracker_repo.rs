use pacer_core::model::{StudentId, SubjectId, Tracker};

use super::SqliteRepository;
use super::mapping::{conn, id_i64, map_tracker_row};
use crate::repository::{StorageError, TrackerRepository};

const TRACKER_COLUMNS: &str = r"
    student_id, subject_id, current_block_id, item_cursor, remaining_space,
    current_lap, is_resting, is_enabled, finished, remaining_items, delay_days,
    remaining_review_space, version
";

#[async_trait::async_trait]
impl TrackerRepository for SqliteRepository {
    async fn insert_tracker(&self, tracker: &Tracker) -> Result<(), StorageError> {
        let sql = format!(
            "INSERT INTO trackers ({TRACKER_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(student_id, subject_id) DO NOTHING"
        );
        let res = sqlx::query(&sql)
            .bind(id_i64("student_id", tracker.student_id.value())?)
            .bind(id_i64("subject_id", tracker.subject_id.value())?)
            .bind(id_i64("block_id", tracker.current_block_id.value())?)
            .bind(i64::from(tracker.item_cursor))
            .bind(i64::from(tracker.remaining_space))
            .bind(i64::from(tracker.current_lap))
            .bind(i64::from(tracker.is_resting))
            .bind(i64::from(tracker.is_enabled))
            .bind(i64::from(tracker.finished))
            .bind(i64::from(tracker.remaining_items))
            .bind(i64::from(tracker.delay_days))
            .bind(i64::from(tracker.remaining_review_space))
            .bind(id_i64("version", tracker.version)?)
            .execute(&self.pool)
            .await
            .map_err(conn)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }
        Ok(())
    }

    async fn get_tracker(
        &self,
        student_id: StudentId,
        subject_id: SubjectId,
    ) -> Result<Tracker, StorageError> {
        let sql = format!(
            "SELECT {TRACKER_COLUMNS} FROM trackers WHERE student_id = ?1 AND subject_id = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(id_i64("student_id", student_id.value())?)
            .bind(id_i64("subject_id", subject_id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        match row {
            Some(row) => map_tracker_row(&row),
            None => Err(StorageError::NotFound),
        }
    }

    async fn trackers_for_student(&self, student_id: StudentId) -> Result<Vec<Tracker>, StorageError> {
        let sql = format!(
            "SELECT {TRACKER_COLUMNS} FROM trackers WHERE student_id = ?1 ORDER BY subject_id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(id_i64("student_id", student_id.value())?)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_tracker_row(&row)?);
        }
        Ok(out)
    }

    async fn trackers_for_subject(&self, subject_id: SubjectId) -> Result<Vec<Tracker>, StorageError> {
        let sql = format!(
            "SELECT {TRACKER_COLUMNS} FROM trackers WHERE subject_id = ?1 ORDER BY student_id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(id_i64("subject_id", subject_id.value())?)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_tracker_row(&row)?);
        }
        Ok(out)
    }

    async fn update_tracker(&self, tracker: &Tracker) -> Result<Tracker, StorageError> {
        let student = id_i64("student_id", tracker.student_id.value())?;
        let subject = id_i64("subject_id", tracker.subject_id.value())?;

        let res = sqlx::query(
            r"
            UPDATE trackers SET
                current_block_id = ?1,
                item_cursor = ?2,
                remaining_space = ?3,
                current_lap = ?4,
                is_resting = ?5,
                is_enabled = ?6,
                finished = ?7,
                remaining_items = ?8,
                delay_days = ?9,
                remaining_review_space = ?10,
                version = version + 1
            WHERE student_id = ?11 AND subject_id = ?12 AND version = ?13
            ",
        )
        .bind(id_i64("block_id", tracker.current_block_id.value())?)
        .bind(i64::from(tracker.item_cursor))
        .bind(i64::from(tracker.remaining_space))
        .bind(i64::from(tracker.current_lap))
        .bind(i64::from(tracker.is_resting))
        .bind(i64::from(tracker.is_enabled))
        .bind(i64::from(tracker.finished))
        .bind(i64::from(tracker.remaining_items))
        .bind(i64::from(tracker.delay_days))
        .bind(i64::from(tracker.remaining_review_space))
        .bind(student)
        .bind(subject)
        .bind(id_i64("version", tracker.version)?)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 1 {
            let mut stored = tracker.clone();
            stored.version += 1;
            return Ok(stored);
        }

        let exists = sqlx::query("SELECT 1 FROM trackers WHERE student_id = ?1 AND subject_id = ?2")
            .bind(student)
            .bind(subject)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;
        match exists {
            Some(_) => Err(StorageError::Conflict),
            None => Err(StorageError::NotFound),
        }
    }
}
