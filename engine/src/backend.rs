//! Transfer backend capability.
//!
//! The engine never branches on "local vs remote": it talks to a
//! `TransferBackend`, selected once per destination by the orchestrator.
//! `fs_ops::LocalBackend` and `sftp::RemoteBackend` are the two media.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::RemoteTarget;
use crate::error::EngineError;

/// Lazy, depth-first sequence of file paths relative to a walk root.
pub type TreeWalk<'a> = Box<dyn Iterator<Item = Result<PathBuf, EngineError>> + 'a>;

/// Operations the engine needs from a destination medium.
pub trait TransferBackend {
    /// Short description for log lines (a path or `user@host:port`).
    fn label(&self) -> String;

    /// Join a relative path onto a destination root using the backend's
    /// separator convention.
    fn destination_path(&self, root: &Path, relative: &Path) -> PathBuf;

    fn exists(&self, path: &Path) -> bool;

    /// Modification time of `path`.
    ///
    /// # Errors
    /// `EngineError::NotFound` when the path is absent; the engine treats this
    /// as "never transferred".
    fn modification_time(&self, path: &Path) -> Result<SystemTime, EngineError>;

    /// Create `path` and any missing ancestors. No-op when present.
    fn ensure_directory(&self, path: &Path) -> Result<(), EngineError>;

    /// Copy a local file to `dst` on this backend, returning bytes written.
    ///
    /// # Errors
    /// `EngineError::Transfer` on any I/O or protocol fault.
    fn copy_file(&self, src: &Path, dst: &Path) -> Result<u64, EngineError>;

    /// Walk `root` depth-first, yielding relative file paths.
    fn list_tree<'a>(&'a self, root: &Path) -> Result<TreeWalk<'a>, EngineError>;
}

/// Establishes a remote backend session for the orchestrator.
pub trait Connect {
    type Backend: TransferBackend;

    /// # Errors
    /// `EngineError::Connect` when the host is unreachable or rejects the
    /// credentials.
    fn connect(&self, target: &RemoteTarget) -> Result<Self::Backend, EngineError>;
}

/// Split a path into its normal components as UTF-8 strings, dropping
/// roots, `.` and prefixes. Backslashes are treated as separators so that a
/// Windows-style relative path maps onto forward-slash remote paths.
pub(crate) fn path_segments(path: &Path) -> Vec<String> {
    path.to_string_lossy()
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .map(str::to_string)
        .collect()
}

/// Join a remote root and a relative path with forward slashes.
pub fn remote_join(root: &Path, relative: &Path) -> PathBuf {
    let root = root.to_string_lossy().replace('\\', "/");
    let absolute = root.starts_with('/');
    let mut segments = path_segments(Path::new(&root));
    segments.extend(path_segments(relative));

    let joined = segments.join("/");
    if absolute {
        PathBuf::from(format!("/{}", joined))
    } else {
        PathBuf::from(joined)
    }
}

/// Suffix of the sibling file a copy is written to before it replaces the
/// destination.
pub const STAGING_SUFFIX: &str = ".mirrorsync-tmp";

/// Sibling path used to stage a copy of `dst`: `dir/.name.mirrorsync-tmp`.
pub fn staging_path(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dst.with_file_name(format!(".{}{}", name, STAGING_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_join_uses_forward_slashes() {
        let joined = remote_join(Path::new("/srv/backup"), Path::new("docs\\report.txt"));
        assert_eq!(joined, PathBuf::from("/srv/backup/docs/report.txt"));
    }

    #[test]
    fn test_remote_join_relative_root() {
        let joined = remote_join(Path::new("backup/"), Path::new("a/b.txt"));
        assert_eq!(joined, PathBuf::from("backup/a/b.txt"));
    }

    #[test]
    fn test_remote_join_normalizes_windows_root() {
        let joined = remote_join(Path::new("backups\\daily"), Path::new("x.txt"));
        assert_eq!(joined, PathBuf::from("backups/daily/x.txt"));
    }

    #[test]
    fn test_path_segments_skips_current_dir() {
        let segs = path_segments(Path::new("./a//b/./c"));
        assert_eq!(segs, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        let staged = staging_path(Path::new("/srv/backup/docs/report.txt"));
        assert_eq!(
            staged,
            PathBuf::from("/srv/backup/docs/.report.txt.mirrorsync-tmp")
        );
    }
}
