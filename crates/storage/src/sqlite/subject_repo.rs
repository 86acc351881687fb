use pacer_core::model::{Subject, SubjectId};

use super::SqliteRepository;
use super::mapping::{conn, id_i64, map_subject_row};
use crate::repository::{StorageError, SubjectRepository};

#[async_trait::async_trait]
impl SubjectRepository for SqliteRepository {
    async fn upsert_subject(&self, subject: &Subject) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO subjects (id, label, review_speed, review_space)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                label = excluded.label,
                review_speed = excluded.review_speed,
                review_space = excluded.review_space
            ",
        )
        .bind(id_i64("subject_id", subject.id().value())?)
        .bind(subject.label().to_owned())
        .bind(i64::from(subject.review_speed()))
        .bind(i64::from(subject.review_space()))
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn get_subject(&self, id: SubjectId) -> Result<Subject, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, label, review_speed, review_space
            FROM subjects WHERE id = ?1
            ",
        )
        .bind(id_i64("subject_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        match row {
            Some(row) => map_subject_row(&row),
            None => Err(StorageError::NotFound),
        }
    }
}
