//! Remote backend over SSH/SFTP.
//!
//! Destination state is queried one `stat` per file; the remote tree is never
//! walked during a sync. The SSH session belongs to the `RemoteBackend` and is
//! disconnected when the backend is dropped, so an engine run that returns
//! by any path releases the connection.

use std::fs;
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ssh2::{ErrorCode, FileStat, RenameFlags, Session, Sftp};
use tracing::{debug, warn};

use crate::backend::{
    path_segments, remote_join, staging_path, Connect, TransferBackend, TreeWalk,
};
use crate::config::RemoteTarget;
use crate::error::EngineError;
use crate::model::{unix_seconds, NEVER_SYNCED};

/// How long to wait for the TCP connection to the SSH server.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// libssh2 SFTP status codes for a missing file or path.
const FX_NO_SUCH_FILE: i32 = 2;
const FX_NO_SUCH_PATH: i32 = 10;

/// Opens password-authenticated SFTP sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SftpConnector;

impl Connect for SftpConnector {
    type Backend = RemoteBackend;

    fn connect(&self, target: &RemoteTarget) -> Result<RemoteBackend, EngineError> {
        RemoteBackend::connect(target)
    }
}

/// A live SFTP session used as a destination.
pub struct RemoteBackend {
    session: Session,
    sftp: Sftp,
    label: String,
}

impl RemoteBackend {
    /// Connect, handshake and authenticate with the target's password.
    ///
    /// # Errors
    /// `EngineError::Connect` for resolution, TCP, handshake, authentication
    /// or SFTP subsystem failures.
    pub fn connect(target: &RemoteTarget) -> Result<Self, EngineError> {
        let address = target.address();
        let connect_error = |reason: String| EngineError::Connect {
            address: address.clone(),
            reason,
        };

        let tcp = open_tcp(&target.host, target.port).map_err(|e| connect_error(e.to_string()))?;

        let mut session = Session::new().map_err(|e| connect_error(e.to_string()))?;
        session.set_tcp_stream(tcp);
        if let Some(timeout) = target.io_timeout {
            session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
        }
        session
            .handshake()
            .map_err(|e| connect_error(format!("SSH handshake failed: {}", e)))?;
        session
            .userauth_password(&target.username, &target.password)
            .map_err(|e| connect_error(format!("authentication failed: {}", e)))?;
        if !session.authenticated() {
            return Err(connect_error("authentication failed".to_string()));
        }

        let sftp = session
            .sftp()
            .map_err(|e| connect_error(format!("SFTP subsystem unavailable: {}", e)))?;

        debug!(address = %address, user = %target.username, "SFTP session established");
        Ok(RemoteBackend {
            session,
            sftp,
            label: format!("{}@{}", target.username, address),
        })
    }

    fn upload_staged(&self, local: &mut fs::File, staged: &Path) -> io::Result<u64> {
        let mut remote = self.sftp.create(staged).map_err(io::Error::from)?;
        let bytes = io::copy(local, &mut remote)?;
        remote.flush()?;
        Ok(bytes)
    }

    /// Move a completed upload over `dst`. Servers speaking SFTP v3 refuse to
    /// rename onto an existing file, so the old copy is removed and the
    /// rename retried.
    fn replace(&self, staged: &Path, dst: &Path) -> Result<(), ssh2::Error> {
        let flags = Some(RenameFlags::OVERWRITE | RenameFlags::ATOMIC | RenameFlags::NATIVE);
        match self.sftp.rename(staged, dst, flags) {
            Ok(()) => Ok(()),
            Err(first) => {
                if self.sftp.stat(dst).is_err() {
                    return Err(first);
                }
                self.sftp.unlink(dst)?;
                self.sftp.rename(staged, dst, None)
            }
        }
    }

    fn discard(&self, staged: &Path) {
        if let Err(e) = self.sftp.unlink(staged) {
            if !is_missing(&e) {
                warn!(path = %staged.display(), error = %e, "could not remove partial upload");
            }
        }
    }

    fn stat(&self, path: &Path) -> Result<FileStat, EngineError> {
        self.sftp.stat(path).map_err(|e| {
            if is_missing(&e) {
                EngineError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                EngineError::Stat {
                    path: path.to_path_buf(),
                    source: io::Error::from(e),
                }
            }
        })
    }
}

impl Drop for RemoteBackend {
    fn drop(&mut self) {
        if let Err(e) = self.session.disconnect(None, "backup run complete", None) {
            warn!(remote = %self.label, error = %e, "SFTP disconnect failed");
        } else {
            debug!(remote = %self.label, "SFTP session closed");
        }
    }
}

impl TransferBackend for RemoteBackend {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn destination_path(&self, root: &Path, relative: &Path) -> PathBuf {
        remote_join(root, relative)
    }

    fn exists(&self, path: &Path) -> bool {
        self.sftp.stat(path).is_ok()
    }

    fn modification_time(&self, path: &Path) -> Result<SystemTime, EngineError> {
        let stat = self.stat(path)?;
        Ok(stat
            .mtime
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap_or(NEVER_SYNCED))
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), EngineError> {
        let normalized = path.to_string_lossy().replace('\\', "/");
        let mut current = if normalized.starts_with('/') {
            String::from("/")
        } else {
            String::new()
        };

        for segment in path_segments(Path::new(&normalized)) {
            if !current.is_empty() && !current.ends_with('/') {
                current.push('/');
            }
            current.push_str(&segment);
            let dir = Path::new(&current);

            match self.stat(dir) {
                Ok(stat) if stat.is_dir() => continue,
                Ok(_) => {
                    return Err(EngineError::DirectoryCreation {
                        path: dir.to_path_buf(),
                        source: io::Error::new(
                            io::ErrorKind::InvalidInput,
                            "Path exists but is not a directory",
                        ),
                    })
                }
                Err(EngineError::NotFound { .. }) => {}
                Err(EngineError::Stat { source, .. }) => {
                    return Err(EngineError::DirectoryCreation {
                        path: dir.to_path_buf(),
                        source,
                    })
                }
                Err(other) => return Err(other),
            }

            if let Err(e) = self.sftp.mkdir(dir, 0o755) {
                // Lost a race with another writer: fine as long as it is a directory now.
                match self.sftp.stat(dir) {
                    Ok(stat) if stat.is_dir() => {}
                    _ => {
                        return Err(EngineError::DirectoryCreation {
                            path: dir.to_path_buf(),
                            source: io::Error::from(e),
                        })
                    }
                }
            }
            debug!(path = %current, "created remote directory");
        }

        Ok(())
    }

    fn copy_file(&self, src: &Path, dst: &Path) -> Result<u64, EngineError> {
        let transfer_error = |e: io::Error| EngineError::Transfer {
            from: src.to_path_buf(),
            to: dst.to_path_buf(),
            source: e,
        };

        let mut local = fs::File::open(src).map_err(transfer_error)?;
        let src_mtime = local
            .metadata()
            .and_then(|m| m.modified())
            .map_err(transfer_error)?;

        let staged = staging_path(dst);
        let bytes = match self.upload_staged(&mut local, &staged) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.discard(&staged);
                return Err(transfer_error(e));
            }
        };

        // On failure the upload time stands in, which is never older than the source.
        let secs = unix_seconds(src_mtime);
        let times = FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: None,
            atime: Some(secs),
            mtime: Some(secs),
        };
        if let Err(e) = self.sftp.setstat(&staged, times) {
            warn!(path = %staged.display(), error = %e, "could not preserve modification time");
        }

        if let Err(e) = self.replace(&staged, dst) {
            self.discard(&staged);
            return Err(transfer_error(io::Error::from(e)));
        }

        Ok(bytes)
    }

    fn list_tree<'a>(&'a self, root: &Path) -> Result<TreeWalk<'a>, EngineError> {
        let entries = read_sorted(&self.sftp, root).map_err(|e| {
            if is_missing(&e) {
                EngineError::NotFound {
                    path: root.to_path_buf(),
                }
            } else {
                EngineError::Enumeration {
                    path: root.to_path_buf(),
                    source: io::Error::from(e),
                }
            }
        })?;

        Ok(Box::new(RemoteWalk {
            sftp: &self.sftp,
            root: root.to_path_buf(),
            stack: vec![entries.into_iter()],
        }))
    }
}

/// Depth-first walk over remote directories, one `readdir` per directory,
/// issued only when the walk reaches it.
struct RemoteWalk<'a> {
    sftp: &'a Sftp,
    root: PathBuf,
    stack: Vec<std::vec::IntoIter<(PathBuf, FileStat)>>,
}

impl Iterator for RemoteWalk<'_> {
    type Item = Result<PathBuf, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                Some((path, stat)) if stat.is_dir() => match read_sorted(self.sftp, &path) {
                    Ok(entries) => self.stack.push(entries.into_iter()),
                    Err(e) => {
                        return Some(Err(EngineError::Enumeration {
                            path,
                            source: io::Error::from(e),
                        }))
                    }
                },
                Some((path, _)) => {
                    let relative = path
                        .strip_prefix(&self.root)
                        .map(Path::to_path_buf)
                        .unwrap_or(path);
                    return Some(Ok(relative));
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

fn read_sorted(sftp: &Sftp, dir: &Path) -> Result<Vec<(PathBuf, FileStat)>, ssh2::Error> {
    let mut entries = sftp.readdir(dir)?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

fn is_missing(e: &ssh2::Error) -> bool {
    matches!(
        e.code(),
        ErrorCode::SFTP(FX_NO_SUCH_FILE) | ErrorCode::SFTP(FX_NO_SUCH_PATH)
    )
}

fn open_tcp(host: &str, port: u16) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_target() -> RemoteTarget {
        RemoteTarget {
            host: "127.0.0.1".to_string(),
            // Port 1 is reserved and has no listener on a normal test host.
            port: 1,
            username: "backup".to_string(),
            password: "secret".to_string(),
            backup_directory: PathBuf::from("/srv/backup"),
            io_timeout: None,
        }
    }

    #[test]
    fn test_connect_refused_is_connect_error() {
        let result = SftpConnector.connect(&unreachable_target());
        match result {
            Err(EngineError::Connect { address, .. }) => assert_eq!(address, "127.0.0.1:1"),
            Err(other) => panic!("expected connect error, got {other}"),
            Ok(_) => panic!("connection to a closed port should fail"),
        }
    }

    #[test]
    fn test_missing_code_detection() {
        let missing = ssh2::Error::new(ErrorCode::SFTP(FX_NO_SUCH_FILE), "no such file");
        let denied = ssh2::Error::new(ErrorCode::SFTP(3), "permission denied");
        assert!(is_missing(&missing));
        assert!(!is_missing(&denied));
    }
}
