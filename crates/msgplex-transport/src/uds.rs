use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// Permission mode applied to freshly bound socket paths.
pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

/// `sockaddr_un.sun_path` capacity: 108 bytes on Linux, 104 on the BSDs
/// and macOS.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// A listening Unix domain socket.
///
/// Binding validates the path, replaces a stale socket file if one is left
/// over from an earlier run, and restricts the path to owner access. The
/// socket file is removed again on drop, unless something else has taken
/// over the path in the meantime.
pub struct UdsListener {
    listener: UnixListener,
    path: PathBuf,
    bound_identity: Option<(u64, u64)>,
}

impl UdsListener {
    /// Bind with [`DEFAULT_SOCKET_MODE`] permissions.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, DEFAULT_SOCKET_MODE)
    }

    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let len = path.as_os_str().len();
        if len >= MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: MAX_PATH_LEN,
            });
        }

        // A leftover socket from a dead process is fair game; anything else
        // at the path is not ours to delete.
        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(|e| bind_error(&path, e))?;
            if metadata.file_type().is_socket() {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(&path).map_err(|e| bind_error(&path, e))?;
            } else {
                return Err(bind_error(
                    &path,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                ));
            }
        }

        let listener = UnixListener::bind(&path).map_err(|e| bind_error(&path, e))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| bind_error(&path, e))?;

        // Remember which inode we created so drop never unlinks a path that
        // has since been rebound by someone else.
        let metadata = std::fs::symlink_metadata(&path).map_err(|e| bind_error(&path, e))?;
        let bound_identity = Some((metadata.dev(), metadata.ino()));

        info!(?path, "listening on unix domain socket");
        Ok(Self {
            listener,
            path,
            bound_identity,
        })
    }

    /// Wait for the next incoming connection.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted connection");
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UdsListener {
    fn drop(&mut self) {
        let Some((dev, ino)) = self.bound_identity else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket() && metadata.dev() == dev && metadata.ino() == ino {
                debug!(path = ?self.path, "removing socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path rebound elsewhere; leaving it");
            }
        }
    }
}

impl std::fmt::Debug for UdsListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdsListener")
            .field("path", &self.path)
            .finish()
    }
}

fn bind_error(path: &Path, source: std::io::Error) -> TransportError {
    TransportError::Bind {
        path: path.to_path_buf(),
        source,
    }
}

/// Connect to a listening Unix domain socket.
pub async fn connect(path: impl AsRef<Path>) -> Result<UnixStream> {
    let path = path.as_ref();
    let stream = UnixStream::connect(path)
        .await
        .map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
    debug!(?path, "connected to unix domain socket");
    Ok(stream)
}

/// Identity of the process on the other end of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

/// Credentials of the connected peer via `SO_PEERCRED`, Linux only.
#[cfg(target_os = "linux")]
pub fn peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    use std::os::fd::AsRawFd;

    let fd = stream.as_raw_fd();
    let mut cred = libc::ucred {
        pid: 0,
        uid: 0,
        gid: 0,
    };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

    // SAFETY: `cred` and `len` are valid writable pointers for the sizes
    // passed, and `fd` is an open socket descriptor owned by `stream`.
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
            &mut len,
        )
    };

    if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
        Some(PeerCredentials {
            uid: cred.uid,
            gid: cred.gid,
            pid: cred.pid as u32,
        })
    } else {
        None
    }
}

/// Peer credentials are not available on this platform.
#[cfg(not(target_os = "linux"))]
pub fn peer_credentials(_stream: &UnixStream) -> Option<PeerCredentials> {
    None
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("msgplex-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn bind_accept_connect() {
        let dir = scratch_dir("uds");
        let sock = dir.join("basic.sock");

        let listener = UdsListener::bind(&sock).unwrap();
        assert!(sock.exists());

        let (accepted, connected) = tokio::join!(listener.accept(), connect(&sock));
        let mut server = accepted.unwrap();
        let mut client = connected.unwrap();

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        drop(listener);
        assert!(!sock.exists(), "socket file should be removed on drop");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn path_too_long_is_rejected() {
        let long = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = UdsListener::bind(&long);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[tokio::test]
    async fn bind_replaces_stale_sockets_only() {
        let dir = scratch_dir("uds-stale");
        let sock = dir.join("stale.sock");

        // A stale socket file is replaced.
        let first = UdsListener::bind(&sock).unwrap();
        std::mem::forget(first);
        let second = UdsListener::bind(&sock).unwrap();
        drop(second);

        // A regular file at the path is refused.
        std::fs::write(&sock, b"regular file").unwrap();
        let result = UdsListener::bind(&sock);
        assert!(matches!(result, Err(TransportError::Bind { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn bound_path_is_owner_only() {
        let dir = scratch_dir("uds-mode");
        let sock = dir.join("mode.sock");

        let listener = UdsListener::bind(&sock).unwrap();
        let mode = std::fs::metadata(&sock).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn drop_leaves_a_rebound_path_alone() {
        let dir = scratch_dir("uds-rebind");
        let sock = dir.join("rebind.sock");

        let listener = UdsListener::bind(&sock).unwrap();
        std::fs::remove_file(&sock).unwrap();
        std::fs::write(&sock, b"replacement").unwrap();

        drop(listener);
        assert!(sock.exists(), "drop must not remove a path it no longer owns");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn peer_credentials_report_this_process() {
        let dir = scratch_dir("uds-cred");
        let sock = dir.join("cred.sock");

        let listener = UdsListener::bind(&sock).unwrap();
        let (accepted, connected) = tokio::join!(listener.accept(), connect(&sock));
        let server = accepted.unwrap();
        let _client = connected.unwrap();

        let creds = peer_credentials(&server).unwrap();
        assert_eq!(creds.pid, std::process::id());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
