/// Errors that abort a whole sync pass.
///
/// Per-file problems never surface here; they are counted in the report.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("A sync pass is already running for {0}")]
    AlreadyRunning(String),

    #[error("No media roots configured")]
    NoRoots,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
