use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

const SCHEMA_V1: &[&str] = &[
    r"
        CREATE TABLE IF NOT EXISTS subjects (
            id INTEGER PRIMARY KEY,
            label TEXT NOT NULL,
            review_speed INTEGER NOT NULL CHECK (review_speed > 0),
            review_space INTEGER NOT NULL CHECK (review_space > 0)
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS blocks (
            id INTEGER PRIMARY KEY,
            subject_id INTEGER NOT NULL,
            block_order INTEGER NOT NULL CHECK (block_order > 0),
            name TEXT NOT NULL,
            speed INTEGER NOT NULL CHECK (speed > 0),
            space INTEGER NOT NULL CHECK (space > 0),
            lap INTEGER NOT NULL CHECK (lap > 0),
            size INTEGER NOT NULL CHECK (size > 0),
            is_tail INTEGER NOT NULL,
            level INTEGER NOT NULL,
            start_date TEXT,
            end_date TEXT,
            archived INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (subject_id) REFERENCES subjects(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY,
            subject_id INTEGER NOT NULL,
            block_id INTEGER NOT NULL,
            in_block_order INTEGER NOT NULL CHECK (in_block_order > 0),
            overall_order INTEGER NOT NULL CHECK (overall_order > 0),
            review_level INTEGER NOT NULL CHECK (review_level BETWEEN 0 AND 4),
            review_countdown INTEGER NOT NULL CHECK (review_countdown >= 0),
            try_count INTEGER NOT NULL DEFAULT 0,
            wrong_count INTEGER NOT NULL DEFAULT 0,
            difficult_count INTEGER NOT NULL DEFAULT 0,
            answer_status INTEGER NOT NULL DEFAULT 0,
            last_answered TEXT,
            review_due_since TEXT,
            version INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (block_id) REFERENCES blocks(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS trackers (
            student_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            current_block_id INTEGER NOT NULL,
            item_cursor INTEGER NOT NULL CHECK (item_cursor > 0),
            remaining_space INTEGER NOT NULL CHECK (remaining_space >= 0),
            current_lap INTEGER NOT NULL CHECK (current_lap > 0),
            is_resting INTEGER NOT NULL,
            is_enabled INTEGER NOT NULL,
            finished INTEGER NOT NULL,
            remaining_items INTEGER NOT NULL,
            delay_days INTEGER NOT NULL,
            remaining_review_space INTEGER NOT NULL,
            version INTEGER NOT NULL,
            PRIMARY KEY (student_id, subject_id),
            FOREIGN KEY (subject_id) REFERENCES subjects(id) ON DELETE CASCADE,
            FOREIGN KEY (current_block_id) REFERENCES blocks(id)
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS rest_periods (
            id INTEGER PRIMARY KEY,
            student_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            FOREIGN KEY (subject_id) REFERENCES subjects(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS irregular_insertions (
            id INTEGER PRIMARY KEY,
            subject_id INTEGER NOT NULL,
            target_insert_number INTEGER NOT NULL,
            insert_into_block_id INTEGER NOT NULL,
            former_block_id INTEGER,
            is_modified INTEGER NOT NULL,
            merged INTEGER NOT NULL DEFAULT 0,
            archived INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (subject_id) REFERENCES subjects(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS average_item_times (
            block_id INTEGER PRIMARY KEY,
            minutes INTEGER NOT NULL CHECK (minutes >= 0),
            FOREIGN KEY (block_id) REFERENCES blocks(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS forecasts (
            student_id INTEGER PRIMARY KEY,
            start_date TEXT NOT NULL,
            total_days INTEGER NOT NULL,
            generated_at TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS forecast_patterns (
            student_id INTEGER NOT NULL,
            pattern_order INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            minutes INTEGER NOT NULL,
            occurrence_count INTEGER NOT NULL,
            PRIMARY KEY (student_id, pattern_order, subject_id),
            FOREIGN KEY (student_id) REFERENCES forecasts(student_id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_blocks_subject_order
            ON blocks (subject_id, block_order);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_items_subject_overall
            ON items (subject_id, overall_order);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_items_block_position
            ON items (block_id, in_block_order);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_rest_periods_student_subject
            ON rest_periods (student_id, subject_id, start_date);
    ",
];

/// Runs the versioned migrations for the progression schema.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: full schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        for statement in SCHEMA_V1 {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        log::info!("applied schema migration 1");
    }

    Ok(())
}
