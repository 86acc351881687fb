use pacer_core::merge::MergePlan;
use pacer_core::model::{ArchiveTarget, IrregularId, IrregularInsertion, Item, SubjectId};
use sqlx::SqliteConnection;

use super::SqliteRepository;
use super::block_repo::write_block;
use super::item_repo::{insert_item, renumber_item};
use super::mapping::{conn, id_i64, map_insertion_row};
use crate::repository::{IrregularRepository, StorageError};

async fn missing_or_taken(db: &mut SqliteConnection, id: IrregularId) -> Result<StorageError, StorageError> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM irregular_insertions WHERE id = ?1")
        .bind(id_i64("irregular_id", id.value())?)
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
impl IrregularRepository for SqliteRepository {
    async fn upsert_insertion(&self, insertion: &IrregularInsertion) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO irregular_insertions (
                id, subject_id, target_insert_number, insert_into_block_id,
                former_block_id, is_modified
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                target_insert_number = excluded.target_insert_number,
                insert_into_block_id = excluded.insert_into_block_id,
                former_block_id = excluded.former_block_id,
                is_modified = excluded.is_modified
            ",
        )
        .bind(id_i64("irregular_id", insertion.id.value())?)
        .bind(id_i64("subject_id", insertion.subject_id.value())?)
        .bind(i64::from(insertion.target_insert_number))
        .bind(id_i64("block_id", insertion.insert_into_block_id.value())?)
        .bind(
            insertion
                .former_block_id
                .map(|b| id_i64("former_block_id", b.value()))
                .transpose()?,
        )
        .bind(i64::from(insertion.is_modified))
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn pending_insertions(
        &self,
        subject_id: SubjectId,
    ) -> Result<Vec<IrregularInsertion>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, subject_id, target_insert_number, insert_into_block_id,
                   former_block_id, is_modified
            FROM irregular_insertions
            WHERE subject_id = ?1 AND merged = 0 AND archived = 0
            ORDER BY id ASC
            ",
        )
        .bind(id_i64("subject_id", subject_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_insertion_row(&row)?);
        }
        Ok(out)
    }

    async fn apply_merge(&self, plan: &MergePlan) -> Result<Vec<Item>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        // claim the insertions first; a concurrent merge of the same plan
        // finds them taken and leaves without writing anything
        for id in &plan.merged {
            let res = sqlx::query(
                "UPDATE irregular_insertions SET merged = 1 WHERE id = ?1 AND merged = 0 AND archived = 0",
            )
            .bind(id_i64("irregular_id", id.value())?)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
            if res.rows_affected() != 1 {
                return Err(missing_or_taken(&mut tx, *id).await?);
            }
        }
        for block in &plan.blocks {
            write_block(&mut tx, block).await?;
        }
        for r in &plan.renumbered {
            renumber_item(&mut tx, r.item_id, r.in_block_order, r.overall_order).await?;
        }
        let mut inserted = Vec::with_capacity(plan.new_items.len());
        for new in &plan.new_items {
            inserted.push(insert_item(&mut tx, new.clone()).await?);
        }
        for target in &plan.archived {
            let (sql, id) = match target {
                ArchiveTarget::Block(id) => ("UPDATE blocks SET archived = 1 WHERE id = ?1", id.value()),
                ArchiveTarget::Insertion(id) => (
                    "UPDATE irregular_insertions SET archived = 1 WHERE id = ?1",
                    id.value(),
                ),
            };
            let res = sqlx::query(sql)
                .bind(id_i64("archive_id", id)?)
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
            if res.rows_affected() != 1 {
                return Err(StorageError::NotFound);
            }
        }

        tx.commit().await.map_err(conn)?;
        Ok(inserted)
    }
}
