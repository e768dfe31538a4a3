//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&DbPool` as the first argument.

pub mod file_repo;
pub mod folder_repo;
pub mod workflow_metadata_repo;

pub use file_repo::{FileRepo, FlushStats};
pub use folder_repo::FolderRepo;
pub use workflow_metadata_repo::WorkflowMetadataRepo;

/// SQL predicate matching `column` equal to `?{n}` or nested below it.
///
/// The bound value for `?{n}` is the folder path and `?{n+1}` must be the
/// same path with a trailing separator.
pub(crate) fn under_folder(column: &str, n: usize) -> String {
    format!(
        "({column} = ?{n} OR substr({column}, 1, length(?{m})) = ?{m})",
        m = n + 1
    )
}

/// `folder` with a single trailing `/`.
pub(crate) fn with_separator(folder: &str) -> String {
    format!("{}/", folder.trim_end_matches('/'))
}
