//! Media kind classification and the extension allow-list.
//!
//! The scanner only ever indexes files whose extension is on the
//! allow-list, so partial downloads (`.part`, `.crdownload`, `.tmp`) and
//! sidecar files are skipped without needing a deny-list.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Extension tables
// ---------------------------------------------------------------------------

/// Still and animated image extensions.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];

/// Video container extensions (probed with ffprobe).
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "mkv", "m4v", "avi"];

/// Audio extensions (probed with ffprobe, no thumbnail).
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg"];

// ---------------------------------------------------------------------------
// MediaKind
// ---------------------------------------------------------------------------

/// Broad media category, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

impl MediaKind {
    /// Classify a lowercase extension. Returns `None` for unknown extensions.
    pub fn from_extension(ext: &str) -> Option<Self> {
        if IMAGE_EXTENSIONS.contains(&ext) {
            Some(Self::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            Some(Self::Video)
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            Some(Self::Audio)
        } else {
            None
        }
    }

    /// Classify a path by its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        Self::from_extension(&lowercase_extension(path)?)
    }

    /// Whether this kind is handled by the external prober.
    pub fn is_probed(self) -> bool {
        matches!(self, Self::Video | Self::Audio)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

/// Return the extension of `path` in lowercase, without the leading dot.
pub fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

// ---------------------------------------------------------------------------
// ExtensionWhitelist
// ---------------------------------------------------------------------------

/// Strict allow-list of indexable file extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionWhitelist {
    extensions: BTreeSet<String>,
}

impl ExtensionWhitelist {
    /// Build a whitelist from arbitrary extension strings.
    ///
    /// Leading dots are stripped and matching is case-insensitive. Extensions
    /// that map to no [`MediaKind`] are dropped since nothing could process them.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| MediaKind::from_extension(e).is_some())
            .collect();
        Self { extensions }
    }

    /// Whether `path` should be indexed.
    ///
    /// Hidden files (leading dot) are rejected even if the extension matches.
    pub fn accepts(&self, path: &Path) -> bool {
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden {
            return false;
        }
        lowercase_extension(path).is_some_and(|ext| self.extensions.contains(&ext))
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }
}

impl Default for ExtensionWhitelist {
    fn default() -> Self {
        Self::new(
            IMAGE_EXTENSIONS
                .iter()
                .chain(VIDEO_EXTENSIONS)
                .chain(AUDIO_EXTENSIONS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_from_extension() {
        assert_eq!(MediaKind::from_extension("png"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_extension("webm"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_extension("flac"), Some(MediaKind::Audio));
        assert_eq!(MediaKind::from_extension("txt"), None);
    }

    #[test]
    fn kind_from_path_is_case_insensitive() {
        assert_eq!(
            MediaKind::from_path(Path::new("/a/B.PNG")),
            Some(MediaKind::Image)
        );
    }

    #[test]
    fn default_whitelist_accepts_media_and_rejects_partials() {
        let wl = ExtensionWhitelist::default();
        assert!(wl.accepts(Path::new("/out/ComfyUI_0001.png")));
        assert!(wl.accepts(Path::new("/out/clip.MP4")));
        assert!(!wl.accepts(Path::new("/out/clip.mp4.part")));
        assert!(!wl.accepts(Path::new("/out/download.crdownload")));
        assert!(!wl.accepts(Path::new("/out/noext")));
    }

    #[test]
    fn hidden_files_are_rejected() {
        let wl = ExtensionWhitelist::default();
        assert!(!wl.accepts(Path::new("/out/._ComfyUI_0001.png")));
    }

    #[test]
    fn custom_whitelist_normalises_and_drops_unknown() {
        let wl = ExtensionWhitelist::new([".PNG", " mp4 ", "exe"]);
        let exts: Vec<_> = wl.iter().collect();
        assert_eq!(exts, vec!["mp4", "png"]);
        assert!(!wl.accepts(Path::new("/x/a.jpg")));
    }
}
