//! Change classification between a scan and the stored index.

use std::collections::HashMap;

use gallery_core::types::EpochSecs;
use gallery_db::models::file::StoredFileState;

use crate::scan::ScannedFile;

/// A file whose size and mtime match the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unchanged {
    pub file: ScannedFile,
    pub last_scanned: EpochSecs,
}

/// The outcome of [`classify`]. Each scanned path lands in exactly one of
/// `new`, `modified` or `unchanged`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub new: Vec<ScannedFile>,
    pub modified: Vec<ScannedFile>,
    pub unchanged: Vec<Unchanged>,
    /// Stored files that were not found on disk.
    pub deleted: Vec<StoredFileState>,
}

impl ChangeSet {
    /// Whether the pass has anything to write.
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn merge(&mut self, other: ChangeSet) {
        self.new.extend(other.new);
        self.modified.extend(other.modified);
        self.unchanged.extend(other.unchanged);
        self.deleted.extend(other.deleted);
    }
}

/// Diff scanned files against stored state, keyed by path.
///
/// A file is modified when its size or whole-second mtime differs.
pub fn classify(scanned: Vec<ScannedFile>, stored: Vec<StoredFileState>) -> ChangeSet {
    let mut stored: HashMap<String, StoredFileState> = stored
        .into_iter()
        .map(|state| (state.path.clone(), state))
        .collect();

    let mut changes = ChangeSet::default();
    for file in scanned {
        match stored.remove(&file.path_string()) {
            None => changes.new.push(file),
            Some(state) if state.size != file.size || state.mtime != file.mtime => {
                changes.modified.push(file)
            }
            Some(state) => changes.unchanged.push(Unchanged {
                file,
                last_scanned: state.last_scanned,
            }),
        }
    }

    changes.deleted = stored.into_values().collect();
    changes.deleted.sort_by(|a, b| a.path.cmp(&b.path));
    changes
}
