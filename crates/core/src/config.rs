//! Gallery configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::CoreError;
use crate::media::ExtensionWhitelist;

/// Default thumbnail width in pixels.
pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 300;

/// Default number of processed files per persistence flush.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default upper bound for a single ffprobe/ffmpeg invocation.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 15;

/// Default bound on link hops while tracing a workflow graph.
pub const DEFAULT_TRACE_MAX_HOPS: usize = 24;

/// Indexer configuration.
///
/// All fields have defaults suitable for a local install except the list of
/// roots, which must name at least one directory.
#[derive(Debug, Clone)]
pub struct GalleryConfig {
    /// Primary output directories to index.
    pub roots: Vec<PathBuf>,
    /// Additional, possibly removable, mounted roots. These are availability
    /// checked before each pass.
    pub extra_roots: Vec<PathBuf>,
    /// Allow-list of indexable extensions.
    pub extensions: ExtensionWhitelist,
    /// Whether sub-directories are walked during a full sync.
    pub recursive: bool,
    /// SQLite connection string.
    pub database_url: String,
    /// Where generated thumbnails are written.
    pub thumbnail_dir: PathBuf,
    pub thumbnail_width: u32,
    /// Size of the extraction worker pool. `1` processes files sequentially.
    pub workers: usize,
    /// Number of processed files persisted per transaction.
    pub batch_size: usize,
    pub ffprobe_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub probe_timeout: Duration,
    /// Maximum link hops followed by the workflow tracer.
    pub trace_max_hops: usize,
}

impl GalleryConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var               | Default                          |
    /// |-----------------------|----------------------------------|
    /// | `GALLERY_ROOTS`       | (required, comma separated)      |
    /// | `GALLERY_EXTRA_ROOTS` | empty                            |
    /// | `GALLERY_EXTENSIONS`  | built-in media list              |
    /// | `GALLERY_RECURSIVE`   | `true`                           |
    /// | `DATABASE_URL`        | `sqlite://gallery.db`            |
    /// | `THUMBNAIL_DIR`       | `.thumbnails`                    |
    /// | `THUMBNAIL_WIDTH`     | `300`                            |
    /// | `SYNC_WORKERS`        | available parallelism            |
    /// | `SYNC_BATCH_SIZE`     | `500`                            |
    /// | `FFPROBE_PATH`        | `ffprobe`                        |
    /// | `FFMPEG_PATH`         | `ffmpeg`                         |
    /// | `PROBE_TIMEOUT_SECS`  | `15`                             |
    /// | `TRACE_MAX_HOPS`      | `24`                             |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let roots = split_paths(lookup("GALLERY_ROOTS").as_deref());
        if roots.is_empty() {
            return Err(CoreError::Config(
                "GALLERY_ROOTS must name at least one directory".to_string(),
            ));
        }

        let extra_roots = split_paths(lookup("GALLERY_EXTRA_ROOTS").as_deref());

        let extensions = match lookup("GALLERY_EXTENSIONS") {
            Some(raw) => {
                let wl = ExtensionWhitelist::new(raw.split(','));
                if wl.is_empty() {
                    return Err(CoreError::Config(format!(
                        "GALLERY_EXTENSIONS contains no supported media extension: '{raw}'"
                    )));
                }
                wl
            }
            None => ExtensionWhitelist::default(),
        };

        let recursive = parse_bool("GALLERY_RECURSIVE", lookup("GALLERY_RECURSIVE"), true)?;

        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://gallery.db".to_string());

        let thumbnail_dir = lookup("THUMBNAIL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".thumbnails"));

        let thumbnail_width: u32 = parse_or(
            "THUMBNAIL_WIDTH",
            lookup("THUMBNAIL_WIDTH"),
            DEFAULT_THUMBNAIL_WIDTH,
        )?;

        let default_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let workers: usize = parse_or("SYNC_WORKERS", lookup("SYNC_WORKERS"), default_workers)?;

        let batch_size: usize =
            parse_or("SYNC_BATCH_SIZE", lookup("SYNC_BATCH_SIZE"), DEFAULT_BATCH_SIZE)?;

        let probe_timeout_secs: u64 = parse_or(
            "PROBE_TIMEOUT_SECS",
            lookup("PROBE_TIMEOUT_SECS"),
            DEFAULT_PROBE_TIMEOUT_SECS,
        )?;

        let trace_max_hops: usize = parse_or(
            "TRACE_MAX_HOPS",
            lookup("TRACE_MAX_HOPS"),
            DEFAULT_TRACE_MAX_HOPS,
        )?;

        let config = Self {
            roots,
            extra_roots,
            extensions,
            recursive,
            database_url,
            thumbnail_dir,
            thumbnail_width,
            workers,
            batch_size,
            ffprobe_path: lookup("FFPROBE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ffprobe")),
            ffmpeg_path: lookup("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            probe_timeout: Duration::from_secs(probe_timeout_secs),
            trace_max_hops,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration for the given roots with every other field at
    /// its default.
    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            extra_roots: Vec::new(),
            extensions: ExtensionWhitelist::default(),
            recursive: true,
            database_url: "sqlite://gallery.db".to_string(),
            thumbnail_dir: PathBuf::from(".thumbnails"),
            thumbnail_width: DEFAULT_THUMBNAIL_WIDTH,
            workers: 1,
            batch_size: DEFAULT_BATCH_SIZE,
            ffprobe_path: PathBuf::from("ffprobe"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            trace_max_hops: DEFAULT_TRACE_MAX_HOPS,
        }
    }

    /// Reject values that would stall or break a sync pass.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.workers == 0 {
            return Err(CoreError::Validation(
                "SYNC_WORKERS must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(CoreError::Validation(
                "SYNC_BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        if self.thumbnail_width == 0 {
            return Err(CoreError::Validation(
                "THUMBNAIL_WIDTH must be at least 1".to_string(),
            ));
        }
        if self.trace_max_hops == 0 {
            return Err(CoreError::Validation(
                "TRACE_MAX_HOPS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Primary and extra roots together.
    pub fn all_roots(&self) -> impl Iterator<Item = &PathBuf> {
        self.roots.iter().chain(self.extra_roots.iter())
    }
}

fn split_paths(raw: Option<&str>) -> Vec<PathBuf> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn parse_or<T: std::str::FromStr>(
    key: &str,
    raw: Option<String>,
    default: T,
) -> Result<T, CoreError> {
    match raw {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| CoreError::Config(format!("{key} has an invalid value: '{v}'"))),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, raw: Option<String>, default: bool) -> Result<bool, CoreError> {
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(CoreError::Config(format!("{key} must be a boolean, got '{v}'"))),
        },
    }
}
