use pacer_core::model::{Item, ItemId, NewItem, SubjectId};
use sqlx::SqliteConnection;

use super::SqliteRepository;
use super::mapping::{conn, id_i64, item_id_from_i64, map_item_row};
use crate::repository::{ItemRepository, StorageError};

const ITEM_COLUMNS: &str = r"
    id, subject_id, block_id, in_block_order, overall_order, review_level,
    review_countdown, try_count, wrong_count, difficult_count, answer_status,
    last_answered, review_due_since, version
";

pub(crate) async fn insert_item(db: &mut SqliteConnection, new: NewItem) -> Result<Item, StorageError> {
    let res = sqlx::query(
        r"
        INSERT INTO items (
            subject_id, block_id, in_block_order, overall_order, review_level, review_countdown
        )
        VALUES (?1, ?2, ?3, ?4, 0, 0)
        ",
    )
    .bind(id_i64("subject_id", new.subject_id.value())?)
    .bind(id_i64("block_id", new.block_id.value())?)
    .bind(i64::from(new.in_block_order))
    .bind(i64::from(new.overall_order))
    .execute(&mut *db)
    .await
    .map_err(conn)?;

    Ok(new.assign_id(item_id_from_i64(res.last_insert_rowid())?))
}

pub(crate) async fn renumber_item(
    db: &mut SqliteConnection,
    id: ItemId,
    in_block_order: u32,
    overall_order: u32,
) -> Result<(), StorageError> {
    let res = sqlx::query("UPDATE items SET in_block_order = ?1, overall_order = ?2 WHERE id = ?3")
        .bind(i64::from(in_block_order))
        .bind(i64::from(overall_order))
        .bind(id_i64("item_id", id.value())?)
        .execute(&mut *db)
        .await
        .map_err(conn)?;
    if res.rows_affected() == 1 {
        Ok(())
    } else {
        Err(StorageError::NotFound)
    }
}

/// Tell a missing item apart from one whose version moved on.
async fn missing_or_stale(db: &mut SqliteConnection, id: ItemId) -> Result<StorageError, StorageError> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM items WHERE id = ?1")
        .bind(id_i64("item_id", id.value())?)
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
impl ItemRepository for SqliteRepository {
    async fn insert_items(&self, items: Vec<NewItem>) -> Result<Vec<Item>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        let mut out = Vec::with_capacity(items.len());
        for new in items {
            out.push(insert_item(&mut tx, new).await?);
        }
        tx.commit().await.map_err(conn)?;
        Ok(out)
    }

    async fn items_for_subject(&self, subject_id: SubjectId) -> Result<Vec<Item>, StorageError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE subject_id = ?1 ORDER BY overall_order ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(id_i64("subject_id", subject_id.value())?)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(map_item_row(&row)?);
        }
        Ok(items)
    }

    async fn get_item(&self, id: ItemId) -> Result<Item, StorageError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id_i64("item_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        match row {
            Some(row) => map_item_row(&row),
            None => Err(StorageError::NotFound),
        }
    }

    async fn update_items(&self, items: &[Item]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        for item in items {
            let res = sqlx::query(
                r"
                UPDATE items SET
                    review_level = ?1,
                    review_countdown = ?2,
                    try_count = ?3,
                    wrong_count = ?4,
                    difficult_count = ?5,
                    answer_status = ?6,
                    last_answered = ?7,
                    review_due_since = ?8,
                    version = version + 1
                WHERE id = ?9 AND version = ?10
                ",
            )
            .bind(item.review.level.as_i64())
            .bind(i64::from(item.review.countdown_days))
            .bind(i64::from(item.try_count))
            .bind(i64::from(item.wrong_count))
            .bind(i64::from(item.difficult_count))
            .bind(item.answer_status.as_i64())
            .bind(item.last_answered)
            .bind(item.review_due_since)
            .bind(id_i64("item_id", item.id.value())?)
            .bind(id_i64("version", item.version)?)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
            if res.rows_affected() != 1 {
                // dropping `tx` rolls back the items already written
                return Err(missing_or_stale(&mut tx, item.id).await?);
            }
        }
        tx.commit().await.map_err(conn)?;
        Ok(())
    }
}
