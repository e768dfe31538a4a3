use serde::Serialize;
use sqlx::FromRow;

use gallery_core::types::EpochSecs;

/// A row from the `folders` table. Only kept for folder sort order.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct FolderRecord {
    pub path: String,
    pub mtime: EpochSecs,
}
