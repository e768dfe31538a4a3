//! Repository for the `folders` table.

use crate::models::folder::FolderRecord;
use crate::repositories::{under_folder, with_separator};
use crate::DbPool;

/// Provides access to folder modification times.
pub struct FolderRepo;

impl FolderRepo {
    /// Replace the folder rows under `root` with `folders` in one transaction.
    ///
    /// When `recursive` is false only the row for `root` itself is replaced.
    pub async fn replace_under(
        pool: &DbPool,
        root: &str,
        recursive: bool,
        folders: &[FolderRecord],
    ) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;

        if recursive {
            let query = format!("DELETE FROM folders WHERE {}", under_folder("path", 1));
            sqlx::query(&query)
                .bind(root)
                .bind(with_separator(root))
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query("DELETE FROM folders WHERE path = ?1")
                .bind(root)
                .execute(&mut *tx)
                .await?;
        }

        for folder in folders {
            sqlx::query(
                "INSERT INTO folders (path, mtime) VALUES (?1, ?2)
                 ON CONFLICT(path) DO UPDATE SET mtime = excluded.mtime",
            )
            .bind(&folder.path)
            .bind(folder.mtime)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// List all folders, most recently modified first.
    pub async fn list(pool: &DbPool) -> Result<Vec<FolderRecord>, sqlx::Error> {
        sqlx::query_as::<_, FolderRecord>(
            "SELECT path, mtime FROM folders ORDER BY mtime DESC, path",
        )
        .fetch_all(pool)
        .await
    }
}
