//! Per-file processing: thumbnail, dimensions, probe and workflow extraction.
//!
//! Every step degrades on its own. A file only fails as a whole when it
//! cannot be read or its blocking task panics, and that failure is returned
//! as [`FileOutcome::Failed`] rather than propagated.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gallery_core::config::GalleryConfig;
use gallery_core::embedded::{read_image_documents, EmbeddedDocuments};
use gallery_core::ffmpeg::{parse_duration, parse_resolution, Ffmpeg};
use gallery_core::hashing::file_id_for_path;
use gallery_core::media::{lowercase_extension, MediaKind};
use gallery_core::thumbnail::{image_dimensions, thumbnail_path, write_image_thumbnail};
use gallery_core::types::EpochSecs;
use gallery_core::workflow::{extract_first, ExtractedMetadata, TraceOptions};
use gallery_db::models::file::FileUpsert;
use gallery_db::models::workflow_metadata::NewWorkflowMetadata;

use crate::scan::ScannedFile;

/// Seek position for video thumbnails, clamped to half the duration.
const VIDEO_THUMBNAIL_AT_SECS: f64 = 1.0;

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// One file to process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileJob {
    pub path: PathBuf,
    pub size: i64,
    pub mtime: EpochSecs,
}

impl From<ScannedFile> for FileJob {
    fn from(file: ScannedFile) -> Self {
        Self {
            path: file.path,
            size: file.size,
            mtime: file.mtime,
        }
    }
}

/// Read-only settings shared by all workers of one pass.
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub thumbnail_dir: PathBuf,
    pub thumbnail_width: u32,
    pub trace: TraceOptions,
    pub ffmpeg: Ffmpeg,
    /// Stamped into `last_scanned` for every file of the pass.
    pub scanned_at: EpochSecs,
}

impl WorkerSnapshot {
    pub fn from_config(config: &GalleryConfig, scanned_at: EpochSecs) -> Self {
        Self {
            thumbnail_dir: config.thumbnail_dir.clone(),
            thumbnail_width: config.thumbnail_width,
            trace: TraceOptions {
                max_hops: config.trace_max_hops,
            },
            ffmpeg: Ffmpeg::from_config(config),
            scanned_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Processed(FileUpsert),
    Failed { path: String, error: String },
}

#[derive(Debug, thiserror::Error)]
enum WorkerError {
    #[error("unsupported media type")]
    Unsupported,

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What the blocking part of the work produced.
#[derive(Debug, Default)]
struct Analysis {
    dimensions: Option<(u32, u32)>,
    duration: Option<f64>,
    thumbnail: Option<PathBuf>,
    has_workflow: bool,
    metadata: Option<ExtractedMetadata>,
}

// ---------------------------------------------------------------------------
// Processing
// ---------------------------------------------------------------------------

/// Process one file into the row to persist.
pub async fn process_file(job: FileJob, snapshot: Arc<WorkerSnapshot>) -> FileOutcome {
    match process(&job, snapshot).await {
        Ok(upsert) => FileOutcome::Processed(upsert),
        Err(e) => {
            let path = job.path.to_string_lossy().to_string();
            tracing::warn!(path = %path, error = %e, "Failed to process file");
            FileOutcome::Failed {
                path,
                error: e.to_string(),
            }
        }
    }
}

async fn process(job: &FileJob, snapshot: Arc<WorkerSnapshot>) -> Result<FileUpsert, WorkerError> {
    let kind = MediaKind::from_path(&job.path).ok_or(WorkerError::Unsupported)?;
    let id = file_id_for_path(&job.path);
    let thumb = thumbnail_path(&snapshot.thumbnail_dir, &id);

    let analysis = match kind {
        MediaKind::Image => analyse_image(&job.path, thumb, Arc::clone(&snapshot)).await?,
        MediaKind::Video | MediaKind::Audio => {
            analyse_probed(&job.path, kind, thumb, Arc::clone(&snapshot)).await?
        }
    };

    let name = job
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let folder = job
        .path
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(FileUpsert {
        id,
        path: job.path.to_string_lossy().to_string(),
        name,
        folder,
        size: job.size,
        mtime: job.mtime,
        kind: kind.as_str().to_string(),
        width: analysis.dimensions.map(|(w, _)| i64::from(w)),
        height: analysis.dimensions.map(|(_, h)| i64::from(h)),
        duration: analysis.duration,
        thumbnail_path: analysis
            .thumbnail
            .map(|p| p.to_string_lossy().to_string()),
        has_workflow: analysis.has_workflow,
        workflow_files: analysis
            .metadata
            .as_ref()
            .map(ExtractedMetadata::files_index_text)
            .unwrap_or_default(),
        last_scanned: snapshot.scanned_at,
        metadata: analysis.metadata.as_ref().map(NewWorkflowMetadata::from_extracted),
    })
}

/// Decode, thumbnail and extract on the blocking pool.
async fn analyse_image(
    path: &Path,
    thumb: PathBuf,
    snapshot: Arc<WorkerSnapshot>,
) -> Result<Analysis, WorkerError> {
    let bytes = tokio::fs::read(path).await?;
    let extension = lowercase_extension(path).unwrap_or_default();
    let shown = path.display().to_string();

    let analysis = tokio::task::spawn_blocking(move || {
        let mut analysis = Analysis::default();

        match write_image_thumbnail(&bytes, &thumb, snapshot.thumbnail_width) {
            Ok(dims) => {
                analysis.dimensions = Some(dims);
                analysis.thumbnail = Some(thumb);
            }
            Err(e) => {
                tracing::warn!(path = %shown, error = %e, "Thumbnail generation failed");
                analysis.dimensions = image_dimensions(&bytes);
            }
        }

        let documents = read_image_documents(&extension, &bytes);
        let (has_workflow, metadata) = extract_documents(&documents, &snapshot.trace, &shown);
        analysis.has_workflow = has_workflow;
        analysis.metadata = metadata;
        analysis
    })
    .await?;

    Ok(analysis)
}

/// Probe with ffprobe, grab a video frame, then extract from container tags.
async fn analyse_probed(
    path: &Path,
    kind: MediaKind,
    thumb: PathBuf,
    snapshot: Arc<WorkerSnapshot>,
) -> Result<Analysis, WorkerError> {
    // Unreadable files fail here rather than degrading silently in ffprobe.
    tokio::fs::metadata(path).await?;

    let mut analysis = Analysis::default();
    let mut documents = EmbeddedDocuments::default();
    let shown = path.display().to_string();

    match snapshot.ffmpeg.probe(path).await {
        Ok(probe) => {
            analysis.duration = parse_duration(&probe);
            analysis.dimensions = parse_resolution(&probe);
            documents = EmbeddedDocuments::from_probe(&probe);
        }
        Err(e) if e.is_unavailable() => {
            tracing::debug!(path = %shown, error = %e, "Prober unavailable");
        }
        Err(e) => {
            tracing::warn!(path = %shown, error = %e, "Probe failed");
        }
    }

    if kind == MediaKind::Video {
        let at = analysis
            .duration
            .map_or(0.0, |d| VIDEO_THUMBNAIL_AT_SECS.min(d / 2.0));
        if let Some(parent) = thumb.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(dir = %parent.display(), error = %e, "Cannot create thumbnail dir");
            }
        }
        let grabbed = snapshot
            .ffmpeg
            .extract_frame(path, &thumb, at, snapshot.thumbnail_width)
            .await;
        match grabbed {
            Ok(()) => analysis.thumbnail = Some(thumb),
            Err(e) if e.is_unavailable() => {
                tracing::debug!(path = %shown, error = %e, "Frame grabber unavailable");
            }
            Err(e) => {
                tracing::warn!(path = %shown, error = %e, "Video thumbnail failed");
            }
        }
    }

    if !documents.is_empty() {
        let trace = snapshot.trace;
        let (has_workflow, metadata) = tokio::task::spawn_blocking(move || {
            extract_documents(&documents, &trace, &shown)
        })
        .await?;
        analysis.has_workflow = has_workflow;
        analysis.metadata = metadata;
    }

    Ok(analysis)
}

fn extract_documents(
    documents: &EmbeddedDocuments,
    trace: &TraceOptions,
    shown: &str,
) -> (bool, Option<ExtractedMetadata>) {
    if documents.is_empty() {
        tracing::debug!(path = %shown, "No embedded workflow");
        return (false, None);
    }
    let (has_workflow, metadata) = tracing::info_span!("extract", path = %shown)
        .in_scope(|| extract_first(documents.candidates(), trace));
    if metadata.is_none() {
        tracing::debug!(path = %shown, has_workflow, "No metadata extracted");
    }
    (has_workflow, metadata)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;
    use image::{ImageFormat, RgbImage};

    use super::*;

    fn snapshot(thumbnail_dir: &Path) -> Arc<WorkerSnapshot> {
        let mut config = GalleryConfig::with_roots(vec![]);
        config.thumbnail_dir = thumbnail_dir.to_path_buf();
        config.thumbnail_width = 16;
        config.ffprobe_path = PathBuf::from("/nonexistent/ffprobe");
        config.ffmpeg_path = PathBuf::from("/nonexistent/ffmpeg");
        Arc::new(WorkerSnapshot::from_config(&config, 1_700_000_000))
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        RgbImage::new(width, height)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn job(path: &Path) -> FileJob {
        FileJob {
            path: path.to_path_buf(),
            size: 1,
            mtime: 10,
        }
    }

    #[tokio::test]
    async fn plain_image_is_processed_without_metadata() {
        let media = tempfile::tempdir().unwrap();
        let thumbs = tempfile::tempdir().unwrap();
        let path = media.path().join("plain.png");
        std::fs::write(&path, png_bytes(64, 32)).unwrap();

        let outcome = process_file(job(&path), snapshot(thumbs.path())).await;
        let upsert = assert_matches!(outcome, FileOutcome::Processed(u) => u);

        assert_eq!(upsert.id, file_id_for_path(&path));
        assert_eq!(upsert.name, "plain.png");
        assert_eq!(upsert.kind, "image");
        assert_eq!((upsert.width, upsert.height), (Some(64), Some(32)));
        assert!(!upsert.has_workflow);
        assert!(upsert.metadata.is_none());
        assert_eq!(upsert.last_scanned, 1_700_000_000);

        let thumb = PathBuf::from(upsert.thumbnail_path.unwrap());
        assert!(thumb.starts_with(thumbs.path()));
        let (tw, _) = image::image_dimensions(&thumb).unwrap();
        assert_eq!(tw, 16);
    }

    #[tokio::test]
    async fn corrupt_image_degrades_without_failing() {
        let media = tempfile::tempdir().unwrap();
        let thumbs = tempfile::tempdir().unwrap();
        let path = media.path().join("broken.png");
        std::fs::write(&path, b"not really a png").unwrap();

        let outcome = process_file(job(&path), snapshot(thumbs.path())).await;
        let upsert = assert_matches!(outcome, FileOutcome::Processed(u) => u);
        assert!(upsert.thumbnail_path.is_none());
        assert_eq!(upsert.width, None);
    }

    #[tokio::test]
    async fn missing_file_fails() {
        let thumbs = tempfile::tempdir().unwrap();
        let path = thumbs.path().join("vanished.png");

        let outcome = process_file(job(&path), snapshot(thumbs.path())).await;
        assert_matches!(outcome, FileOutcome::Failed { path: p, .. } if p.ends_with("vanished.png"));
    }

    #[tokio::test]
    async fn video_without_prober_is_still_indexed() {
        let media = tempfile::tempdir().unwrap();
        let thumbs = tempfile::tempdir().unwrap();
        let path = media.path().join("clip.mp4");
        std::fs::write(&path, b"\x00\x00\x00\x18ftypmp42").unwrap();

        let outcome = process_file(job(&path), snapshot(thumbs.path())).await;
        let upsert = assert_matches!(outcome, FileOutcome::Processed(u) => u);
        assert_eq!(upsert.kind, "video");
        assert_eq!(upsert.duration, None);
        assert!(upsert.thumbnail_path.is_none());
        assert!(!upsert.has_workflow);
    }
}
