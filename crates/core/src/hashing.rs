//! Shared SHA-256 hex digest utility.
//!
//! Used for file identifiers and for the thumbnail cache file names.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::types::FileId;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Derive the stable identifier of a media file from its path.
///
/// The id only changes when the path changes, so a rename has to re-derive it.
pub fn file_id_for_path(path: &Path) -> FileId {
    sha256_hex(path.to_string_lossy().as_bytes())
}
