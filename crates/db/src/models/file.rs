//! Models for the `files` table.

use serde::Serialize;
use sqlx::FromRow;

use gallery_core::types::{EpochSecs, FileId};

use crate::models::workflow_metadata::NewWorkflowMetadata;

/// A row from the `files` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FileRecord {
    pub id: FileId,
    pub path: String,
    pub name: String,
    pub folder: String,
    pub size: i64,
    pub mtime: EpochSecs,
    /// `image`, `video` or `audio`.
    pub kind: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    /// Seconds, for video and audio.
    pub duration: Option<f64>,
    pub thumbnail_path: Option<String>,
    pub is_favorite: bool,
    pub has_workflow: bool,
    /// Newline separated loader filenames, searchable as text.
    pub workflow_files: String,
    pub last_scanned: EpochSecs,
}

/// The change-detection view of a stored file.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct StoredFileState {
    pub id: FileId,
    pub path: String,
    pub size: i64,
    pub mtime: EpochSecs,
    pub last_scanned: EpochSecs,
}

/// Everything the sync engine writes for one processed file.
///
/// `is_favorite` is user state and is never written by a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpsert {
    pub id: FileId,
    pub path: String,
    pub name: String,
    pub folder: String,
    pub size: i64,
    pub mtime: EpochSecs,
    pub kind: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration: Option<f64>,
    pub thumbnail_path: Option<String>,
    pub has_workflow: bool,
    pub workflow_files: String,
    pub last_scanned: EpochSecs,
    /// `None` clears any previously stored metadata.
    pub metadata: Option<NewWorkflowMetadata>,
}
