use pacer_core::model::{RestPeriod, StudentId, SubjectId};

use super::SqliteRepository;
use super::mapping::{conn, id_i64, map_rest_row};
use crate::repository::{RestRepository, StorageError};

#[async_trait::async_trait]
impl RestRepository for SqliteRepository {
    async fn add_rest(&self, rest: &RestPeriod) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO rest_periods (student_id, subject_id, start_date, end_date)
            VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(id_i64("student_id", rest.student_id.value())?)
        .bind(id_i64("subject_id", rest.subject_id.value())?)
        .bind(rest.start)
        .bind(rest.end)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn rests_for(
        &self,
        student_id: StudentId,
        subject_id: SubjectId,
    ) -> Result<Vec<RestPeriod>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT student_id, subject_id, start_date, end_date
            FROM rest_periods
            WHERE student_id = ?1 AND subject_id = ?2
            ORDER BY start_date ASC, end_date ASC
            ",
        )
        .bind(id_i64("student_id", student_id.value())?)
        .bind(id_i64("subject_id", subject_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_rest_row(&row)?);
        }
        Ok(out)
    }
}
