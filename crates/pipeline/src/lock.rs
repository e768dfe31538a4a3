//! Per-root mutual exclusion for sync passes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::SyncError;

/// Registry of roots that currently have a pass in flight.
///
/// Two paths conflict when either contains the other.
#[derive(Debug, Clone, Default)]
pub struct RootLocks {
    active: Arc<Mutex<Vec<PathBuf>>>,
}

impl RootLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim every path in `roots`, or none of them.
    pub fn acquire(&self, roots: &[PathBuf]) -> Result<RootGuard, SyncError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);

        for root in roots {
            if let Some(held) = active.iter().find(|held| overlaps(held, root)) {
                return Err(SyncError::AlreadyRunning(held.display().to_string()));
            }
        }

        active.extend(roots.iter().cloned());
        Ok(RootGuard {
            active: Arc::clone(&self.active),
            roots: roots.to_vec(),
        })
    }

    pub fn is_locked(&self, root: &Path) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|held| overlaps(held, root))
    }
}

/// Releases its roots when dropped.
#[derive(Debug)]
pub struct RootGuard {
    active: Arc<Mutex<Vec<PathBuf>>>,
    roots: Vec<PathBuf>,
}

impl Drop for RootGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        for root in &self.roots {
            if let Some(pos) = active.iter().position(|held| held == root) {
                active.swap_remove(pos);
            }
        }
    }
}

fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn nested_root_conflicts() {
        let locks = RootLocks::new();
        let _guard = locks.acquire(&[PathBuf::from("/media")]).unwrap();

        assert_matches!(
            locks.acquire(&[PathBuf::from("/media/sub")]),
            Err(SyncError::AlreadyRunning(_))
        );
        assert_matches!(
            locks.acquire(&[PathBuf::from("/")]),
            Err(SyncError::AlreadyRunning(_))
        );
    }

    #[test]
    fn sibling_roots_do_not_conflict() {
        let locks = RootLocks::new();
        let _a = locks.acquire(&[PathBuf::from("/media")]).unwrap();
        let _b = locks.acquire(&[PathBuf::from("/media2")]).unwrap();
        assert!(locks.is_locked(Path::new("/media2/x")));
    }

    #[test]
    fn guard_releases_on_drop() {
        let locks = RootLocks::new();
        let guard = locks.acquire(&[PathBuf::from("/media")]).unwrap();
        drop(guard);
        assert!(!locks.is_locked(Path::new("/media")));
        assert!(locks.acquire(&[PathBuf::from("/media")]).is_ok());
    }

    #[test]
    fn failed_acquire_claims_nothing() {
        let locks = RootLocks::new();
        let _held = locks.acquire(&[PathBuf::from("/b")]).unwrap();
        assert!(locks
            .acquire(&[PathBuf::from("/a"), PathBuf::from("/b")])
            .is_err());
        assert!(!locks.is_locked(Path::new("/a")));
    }
}
