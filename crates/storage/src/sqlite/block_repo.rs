use pacer_core::model::{Block, BlockId, SubjectId};
use sqlx::SqliteConnection;

use super::SqliteRepository;
use super::mapping::{conn, id_i64, map_block_row};
use crate::repository::{BlockDateUpdate, BlockRepository, StorageError};

pub(crate) async fn write_block(db: &mut SqliteConnection, block: &Block) -> Result<(), StorageError> {
    sqlx::query(
        r"
        INSERT INTO blocks (
            id, subject_id, block_order, name, speed, space, lap, size,
            is_tail, level, start_date, end_date, archived
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT(id) DO UPDATE SET
            block_order = excluded.block_order,
            name = excluded.name,
            speed = excluded.speed,
            space = excluded.space,
            lap = excluded.lap,
            size = excluded.size,
            is_tail = excluded.is_tail,
            level = excluded.level,
            start_date = excluded.start_date,
            end_date = excluded.end_date,
            archived = excluded.archived
        ",
    )
    .bind(id_i64("block_id", block.id().value())?)
    .bind(id_i64("subject_id", block.subject_id().value())?)
    .bind(i64::from(block.order()))
    .bind(block.name().to_owned())
    .bind(i64::from(block.speed()))
    .bind(i64::from(block.space()))
    .bind(i64::from(block.lap()))
    .bind(i64::from(block.size()))
    .bind(i64::from(block.is_tail()))
    .bind(i64::from(block.level()))
    .bind(block.start_date())
    .bind(block.end_date())
    .bind(i64::from(block.is_archived()))
    .execute(&mut *db)
    .await
    .map_err(conn)?;

    Ok(())
}

async fn missing_or_moved(db: &mut SqliteConnection, id: BlockId) -> Result<StorageError, StorageError> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM blocks WHERE id = ?1")
        .bind(id_i64("block_id", id.value())?)
        .fetch_optional(&mut *db)
        .await
        .map_err(conn)?;
    Ok(if exists.is_some() {
        StorageError::Conflict
    } else {
        StorageError::NotFound
    })
}

#[async_trait::async_trait]
impl BlockRepository for SqliteRepository {
    async fn upsert_block(&self, block: &Block) -> Result<(), StorageError> {
        let mut db = self.pool.acquire().await.map_err(conn)?;
        write_block(&mut db, block).await
    }

    async fn blocks_for_subject(&self, subject_id: SubjectId) -> Result<Vec<Block>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT
                id, subject_id, block_order, name, speed, space, lap, size,
                is_tail, level, start_date, end_date, archived
            FROM blocks
            WHERE subject_id = ?1
            ORDER BY block_order ASC, id ASC
            ",
        )
        .bind(id_i64("subject_id", subject_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut blocks = Vec::with_capacity(rows.len());
        for row in rows {
            blocks.push(map_block_row(&row)?);
        }
        Ok(blocks)
    }

    async fn update_block_dates(&self, updates: &[BlockDateUpdate]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        for u in updates {
            if u.end_date < u.start_date {
                return Err(StorageError::Serialization(format!(
                    "block {} ends before it starts",
                    u.block_id
                )));
            }
            let res = sqlx::query(
                r"
                UPDATE blocks SET start_date = ?1, end_date = ?2
                WHERE id = ?3 AND start_date IS ?4 AND end_date IS ?5
                ",
            )
            .bind(u.start_date)
            .bind(u.end_date)
            .bind(id_i64("block_id", u.block_id.value())?)
            .bind(u.read_start)
            .bind(u.read_end)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
            // dropping `tx` rolls back the rows already touched
            if res.rows_affected() != 1 {
                return Err(missing_or_moved(&mut tx, u.block_id).await?);
            }
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }
}
