//! Repository for the `files` table.

use gallery_core::types::FileId;

use crate::models::file::{FileRecord, FileUpsert, StoredFileState};
use crate::repositories::workflow_metadata_repo::WorkflowMetadataRepo;
use crate::repositories::{under_folder, with_separator};
use crate::DbPool;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, path, name, folder, size, mtime, kind, width, height, duration, \
     thumbnail_path, is_favorite, has_workflow, workflow_files, last_scanned";

/// Row counts written by one [`FileRepo::flush_batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub upserted: usize,
    pub deleted: usize,
}

/// Provides persistence for indexed files.
pub struct FileRepo;

impl FileRepo {
    /// Write one batch atomically: delete `deletes`, then upsert `upserts`
    /// together with their metadata rows.
    ///
    /// On conflict the existing row is updated in place, keeping
    /// `is_favorite`. If any statement fails the whole batch rolls back.
    pub async fn flush_batch(
        pool: &DbPool,
        upserts: &[FileUpsert],
        deletes: &[FileId],
    ) -> Result<FlushStats, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let mut stats = FlushStats::default();

        for id in deletes {
            let result = sqlx::query("DELETE FROM files WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            stats.deleted += result.rows_affected() as usize;
        }

        for file in upserts {
            sqlx::query(
                "INSERT INTO files
                    (id, path, name, folder, size, mtime, kind, width, height, duration,
                     thumbnail_path, has_workflow, workflow_files, last_scanned)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                    path           = excluded.path,
                    name           = excluded.name,
                    folder         = excluded.folder,
                    size           = excluded.size,
                    mtime          = excluded.mtime,
                    kind           = excluded.kind,
                    width          = excluded.width,
                    height         = excluded.height,
                    duration       = excluded.duration,
                    thumbnail_path = excluded.thumbnail_path,
                    has_workflow   = excluded.has_workflow,
                    workflow_files = excluded.workflow_files,
                    last_scanned   = excluded.last_scanned",
            )
            .bind(&file.id)
            .bind(&file.path)
            .bind(&file.name)
            .bind(&file.folder)
            .bind(file.size)
            .bind(file.mtime)
            .bind(&file.kind)
            .bind(file.width)
            .bind(file.height)
            .bind(file.duration)
            .bind(&file.thumbnail_path)
            .bind(file.has_workflow)
            .bind(&file.workflow_files)
            .bind(file.last_scanned)
            .execute(&mut *tx)
            .await?;

            match &file.metadata {
                Some(metadata) => {
                    WorkflowMetadataRepo::upsert_in_tx(&mut tx, &file.id, metadata).await?
                }
                None => WorkflowMetadataRepo::delete_in_tx(&mut tx, &file.id).await?,
            }
            stats.upserted += 1;
        }

        tx.commit().await?;
        Ok(stats)
    }

    /// Find a single file by ID.
    pub async fn find_by_id(pool: &DbPool, id: &str) -> Result<Option<FileRecord>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM files WHERE id = ?1");
        sqlx::query_as::<_, FileRecord>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a single file by its absolute path.
    pub async fn find_by_path(
        pool: &DbPool,
        path: &str,
    ) -> Result<Option<FileRecord>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM files WHERE path = ?1");
        sqlx::query_as::<_, FileRecord>(&query)
            .bind(path)
            .fetch_optional(pool)
            .await
    }

    /// Change-detection state for every file in `folder`, and in all nested
    /// folders when `recursive`.
    pub async fn list_states_under(
        pool: &DbPool,
        folder: &str,
        recursive: bool,
    ) -> Result<Vec<StoredFileState>, sqlx::Error> {
        let columns = "id, path, size, mtime, last_scanned";
        if recursive {
            let query = format!(
                "SELECT {columns} FROM files WHERE {} ORDER BY path",
                under_folder("folder", 1)
            );
            sqlx::query_as::<_, StoredFileState>(&query)
                .bind(folder)
                .bind(with_separator(folder))
                .fetch_all(pool)
                .await
        } else {
            let query = format!("SELECT {columns} FROM files WHERE folder = ?1 ORDER BY path");
            sqlx::query_as::<_, StoredFileState>(&query)
                .bind(folder)
                .fetch_all(pool)
                .await
        }
    }

    /// List files in one folder, newest first.
    pub async fn list_in_folder(
        pool: &DbPool,
        folder: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FileRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM files
             WHERE folder = ?1
             ORDER BY mtime DESC, name
             LIMIT ?2 OFFSET ?3"
        );
        sqlx::query_as::<_, FileRecord>(&query)
            .bind(folder)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Total number of indexed files.
    pub async fn count(pool: &DbPool) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM files")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    /// Mark or unmark a file as favorite. Returns whether the file exists.
    pub async fn set_favorite(pool: &DbPool, id: &str, favorite: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE files SET is_favorite = ?2 WHERE id = ?1")
            .bind(id)
            .bind(favorite)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
