use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use pacer_core::model::{BlockId, DailyCost, ForecastReport, StudentId, StudyTimePattern};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::SqliteRepository;
use super::mapping::{block_id_from_i64, conn, id_i64, ser, subject_id_from_i64, u32_from_i64};
use crate::repository::{AverageTimeRepository, ForecastRepository, StorageError};

#[async_trait::async_trait]
impl AverageTimeRepository for SqliteRepository {
    async fn set_average_time(&self, block_id: BlockId, minutes: u32) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO average_item_times (block_id, minutes)
            VALUES (?1, ?2)
            ON CONFLICT(block_id) DO UPDATE SET minutes = excluded.minutes
            ",
        )
        .bind(id_i64("block_id", block_id.value())?)
        .bind(i64::from(minutes))
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn average_times(
        &self,
        block_ids: &[BlockId],
    ) -> Result<HashMap<BlockId, u32>, StorageError> {
        if block_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT block_id, minutes FROM average_item_times WHERE block_id IN (");
        {
            let mut ids = qb.separated(", ");
            for id in block_ids {
                ids.push_bind(id_i64("block_id", id.value())?);
            }
        }
        qb.push(")");

        let rows = qb.build().fetch_all(&self.pool).await.map_err(conn)?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let block_id = block_id_from_i64(row.try_get("block_id").map_err(ser)?)?;
            let minutes = u32_from_i64("minutes", row.try_get("minutes").map_err(ser)?)?;
            out.insert(block_id, minutes);
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl ForecastRepository for SqliteRepository {
    async fn save_forecast(&self, report: &ForecastReport) -> Result<(), StorageError> {
        let student = id_i64("student_id", report.student_id.value())?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO forecasts (student_id, start_date, total_days, generated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(student_id) DO UPDATE SET
                start_date = excluded.start_date,
                total_days = excluded.total_days,
                generated_at = excluded.generated_at
            ",
        )
        .bind(student)
        .bind(report.start_date)
        .bind(i64::from(report.total_days))
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query("DELETE FROM forecast_patterns WHERE student_id = ?1")
            .bind(student)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        for pattern in &report.patterns {
            for (subject_id, minutes) in &pattern.per_subject_minutes {
                sqlx::query(
                    r"
                    INSERT INTO forecast_patterns (
                        student_id, pattern_order, subject_id, minutes, occurrence_count
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ",
                )
                .bind(student)
                .bind(i64::from(pattern.order))
                .bind(id_i64("subject_id", subject_id.value())?)
                .bind(i64::from(*minutes))
                .bind(i64::from(pattern.occurrence_count))
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
            }
        }

        tx.commit().await.map_err(conn)?;
        log::debug!(
            "stored forecast for student {}: {} patterns over {} days",
            report.student_id,
            report.patterns.len(),
            report.total_days
        );
        Ok(())
    }

    async fn latest_forecast(
        &self,
        student_id: StudentId,
    ) -> Result<Option<ForecastReport>, StorageError> {
        let student = id_i64("student_id", student_id.value())?;

        let Some(head) =
            sqlx::query("SELECT start_date, total_days FROM forecasts WHERE student_id = ?1")
                .bind(student)
                .fetch_optional(&self.pool)
                .await
                .map_err(conn)?
        else {
            return Ok(None);
        };
        let start_date: NaiveDate = head.try_get("start_date").map_err(ser)?;
        let total_days = u32_from_i64("total_days", head.try_get("total_days").map_err(ser)?)?;

        let rows = sqlx::query(
            r"
            SELECT pattern_order, subject_id, minutes, occurrence_count
            FROM forecast_patterns
            WHERE student_id = ?1
            ORDER BY pattern_order ASC, subject_id ASC
            ",
        )
        .bind(student)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut patterns: Vec<StudyTimePattern> = Vec::new();
        for row in rows {
            let order = u32_from_i64("pattern_order", row.try_get("pattern_order").map_err(ser)?)?;
            let subject_id = subject_id_from_i64(row.try_get("subject_id").map_err(ser)?)?;
            let minutes = u32_from_i64("minutes", row.try_get("minutes").map_err(ser)?)?;
            let occurrence_count =
                u32_from_i64("occurrence_count", row.try_get("occurrence_count").map_err(ser)?)?;

            match patterns.last_mut() {
                Some(last) if last.order == order => {
                    last.per_subject_minutes.insert(subject_id, minutes);
                }
                _ => {
                    let mut per_subject_minutes = DailyCost::new();
                    per_subject_minutes.insert(subject_id, minutes);
                    patterns.push(StudyTimePattern {
                        order,
                        per_subject_minutes,
                        occurrence_count,
                    });
                }
            }
        }

        Ok(Some(ForecastReport {
            student_id,
            start_date,
            patterns,
            total_days,
        }))
    }
}
