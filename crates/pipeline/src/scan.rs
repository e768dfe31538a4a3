//! Filesystem enumeration.
//!
//! Blocking; callers run it on the blocking pool.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use gallery_core::media::ExtensionWhitelist;
use gallery_core::types::EpochSecs;
use gallery_db::models::folder::FolderRecord;
use walkdir::{DirEntry, WalkDir};

/// A whitelisted file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub size: i64,
    /// Whole seconds; sub-second precision is dropped so the comparison
    /// with stored state is stable across filesystems.
    pub mtime: EpochSecs,
}

impl ScannedFile {
    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub files: Vec<ScannedFile>,
    /// Every directory visited, the root included.
    pub folders: Vec<FolderRecord>,
    /// Entries that could not be read.
    pub errors: usize,
}

/// Whether `root` can be scanned right now.
///
/// Mounted roots must also have at least one entry; an unmounted mount
/// point usually remains as an empty directory.
pub fn root_available(root: &Path, is_mount: bool) -> bool {
    match fs::read_dir(root) {
        Ok(mut entries) => !is_mount || entries.next().is_some(),
        Err(_) => false,
    }
}

/// Walk `root`, collecting whitelisted files and visited folders.
///
/// Hidden entries and anything under one of `exclude` are skipped.
pub fn scan_dir(
    root: &Path,
    recursive: bool,
    whitelist: &ExtensionWhitelist,
    exclude: &[PathBuf],
) -> ScanResult {
    let mut result = ScanResult::default();
    let max_depth = if recursive { usize::MAX } else { 1 };

    let walker = WalkDir::new(root)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !skipped(entry, exclude));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "Unreadable entry during scan");
                result.errors += 1;
                continue;
            }
        };

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "Failed to stat entry");
                result.errors += 1;
                continue;
            }
        };
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() as EpochSecs);

        if entry.file_type().is_dir() {
            result.folders.push(FolderRecord {
                path: entry.path().to_string_lossy().to_string(),
                mtime,
            });
        } else if entry.file_type().is_file() && whitelist.accepts(entry.path()) {
            result.files.push(ScannedFile {
                path: entry.into_path(),
                size: metadata.len() as i64,
                mtime,
            });
        }
    }

    result
}

fn skipped(entry: &DirEntry, exclude: &[PathBuf]) -> bool {
    let hidden = entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'));
    hidden || exclude.iter().any(|dir| entry.path().starts_with(dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"data").unwrap();
    }

    fn names(result: &ScanResult) -> Vec<String> {
        let mut names: Vec<String> = result
            .files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    // -- scan_dir ---------------------------------------------------------

    #[test]
    fn whitelist_and_hidden_filtering() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.png"));
        touch(&dir.path().join("b.MP4"));
        touch(&dir.path().join("c.png.part"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join(".hidden.png"));
        touch(&dir.path().join(".cache/d.png"));

        let result = scan_dir(dir.path(), true, &ExtensionWhitelist::default(), &[]);
        assert_eq!(names(&result), vec!["a.png", "b.MP4"]);
        assert_eq!(result.files.iter().find(|f| f.path.ends_with("a.png")).unwrap().size, 4);
    }

    #[test]
    fn non_recursive_stays_at_top_level() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.png"));
        touch(&dir.path().join("sub/b.png"));

        let flat = scan_dir(dir.path(), false, &ExtensionWhitelist::default(), &[]);
        assert_eq!(names(&flat), vec!["a.png"]);

        let deep = scan_dir(dir.path(), true, &ExtensionWhitelist::default(), &[]);
        assert_eq!(names(&deep), vec!["a.png", "b.png"]);
        assert_eq!(deep.folders.len(), 2);
    }

    #[test]
    fn excluded_directory_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.png"));
        touch(&dir.path().join("thumbs/x.jpg"));

        touch(&dir.path().join("usb/u.png"));

        let exclude = [dir.path().join("thumbs"), dir.path().join("usb")];
        let result = scan_dir(dir.path(), true, &ExtensionWhitelist::default(), &exclude);
        assert_eq!(names(&result), vec!["a.png"]);
        assert!(result.folders.iter().all(|f| !f.path.ends_with("thumbs")));
    }

    // -- root_available ---------------------------------------------------

    #[test]
    fn missing_root_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!root_available(&dir.path().join("gone"), false));
    }

    #[test]
    fn empty_mount_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(root_available(dir.path(), false));
        assert!(!root_available(dir.path(), true));

        touch(&dir.path().join("a.png"));
        assert!(root_available(dir.path(), true));
    }
}
