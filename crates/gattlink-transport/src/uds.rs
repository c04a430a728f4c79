use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{Characteristic, LinkTransport, Notifications};

/// Default number of bytes read per notification, matching a typical link MTU.
pub const DEFAULT_NOTIFY_CHUNK: usize = 180;

/// Maximum socket path length.
/// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// Link emulator over a Unix domain socket.
///
/// Raw bytes travel on the socket. Writes decode their base64 value before
/// sending; socket reads of up to `notify_chunk` bytes become base64
/// notifications. The socket has one logical characteristic pair, so the
/// characteristic address is only used for logging.
pub struct UdsLink {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    reader: Mutex<Option<OwnedReadHalf>>,
    connected: Arc<AtomicBool>,
    notify_chunk: usize,
}

impl UdsLink {
    /// Connect to a listening peripheral emulator.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| TransportError::Connect {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!(?path, "connected to link emulator");
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            writer: tokio::sync::Mutex::new(writer),
            reader: Mutex::new(Some(reader)),
            connected: Arc::new(AtomicBool::new(true)),
            notify_chunk: DEFAULT_NOTIFY_CHUNK,
        }
    }

    /// Set the maximum size of a single notification.
    pub fn with_notify_chunk(mut self, notify_chunk: usize) -> Self {
        self.notify_chunk = notify_chunk.max(1);
        self
    }
}

impl LinkTransport for UdsLink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn write(
        &self,
        characteristic: &Characteristic,
        data: &str,
        _with_response: bool,
    ) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let bytes = base64::engine::general_purpose::STANDARD.decode(data)?;

        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.write_all(&bytes).await {
            self.connected.store(false, Ordering::SeqCst);
            return Err(TransportError::Io(err));
        }
        writer.flush().await?;
        debug!(%characteristic, len = bytes.len(), "wrote value");
        Ok(())
    }

    fn subscribe(&self, characteristic: &Characteristic) -> Result<Notifications> {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| TransportError::AlreadySubscribed(characteristic.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::clone(&self.connected);
        let chunk = self.notify_chunk;
        let characteristic = characteristic.clone();
        tokio::spawn(pump_notifications(reader, tx, connected, chunk, characteristic));
        Ok(rx)
    }
}

async fn pump_notifications(
    mut reader: OwnedReadHalf,
    tx: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
    chunk: usize,
    characteristic: Characteristic,
) {
    let mut buf = vec![0u8; chunk];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(%characteristic, "link emulator closed");
                break;
            }
            Ok(n) => {
                let value = base64::engine::general_purpose::STANDARD.encode(&buf[..n]);
                if tx.send(value).is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(%characteristic, error = %err, "link emulator read failed");
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

/// Listening side of the link emulator (plays the peripheral).
pub struct UdsListener {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl UdsListener {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// Bind a filesystem-path socket. Must be called inside a Tokio runtime.
    ///
    /// A stale socket at `path` is removed first; any other file type is an error.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: MAX_PATH_LEN,
            });
        }

        let bind_err = |path: &Path, source: std::io::Error| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        };

        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(|e| bind_err(&path, e))?;
            if !metadata.file_type().is_socket() {
                return Err(bind_err(
                    &path,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                ));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(|e| bind_err(&path, e))?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| bind_err(&path, e))?;
        std::fs::set_permissions(
            &path,
            std::fs::Permissions::from_mode(Self::DEFAULT_SOCKET_MODE),
        )
        .map_err(|e| bind_err(&path, e))?;
        let metadata = std::fs::symlink_metadata(&path).map_err(|e| bind_err(&path, e))?;

        info!(?path, "link emulator listening");
        Ok(Self {
            listener,
            path,
            created_inode: Some((metadata.dev(), metadata.ino())),
        })
    }

    /// Accept the next central connection.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().await.map_err(TransportError::Accept)?;
        debug!("accepted central");
        Ok(stream)
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UdsListener {
    fn drop(&mut self) {
        let Some((dev, ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket() && metadata.dev() == dev && metadata.ino() == ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_sock(tag: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("gattlink-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let sock = dir.join("link.sock");
        (dir, sock)
    }

    #[tokio::test]
    async fn write_and_notify_roundtrip() {
        let (dir, sock_path) = temp_sock("uds-roundtrip");
        let listener = UdsListener::bind(&sock_path).unwrap();
        let ch = Characteristic::new("svc", "tx");

        let link = UdsLink::connect(&sock_path).await.unwrap();
        let mut peripheral = listener.accept().await.unwrap();
        let mut notifications = link.subscribe(&ch).unwrap();

        // "aGVsbG8=" is base64 for "hello"
        link.write(&ch, "aGVsbG8=", false).await.unwrap();
        let mut buf = [0u8; 5];
        peripheral.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        peripheral.write_all(b"hi").await.unwrap();
        let value = notifications.recv().await.unwrap();
        assert_eq!(value, "aGk=");

        drop(peripheral);
        assert!(notifications.recv().await.is_none());
        assert!(!link.is_connected());

        drop(listener);
        assert!(!sock_path.exists(), "socket file should be cleaned up on drop");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn second_subscribe_is_rejected() {
        let (dir, sock_path) = temp_sock("uds-subscribe");
        let listener = UdsListener::bind(&sock_path).unwrap();
        let ch = Characteristic::new("svc", "rx");

        let link = UdsLink::connect(&sock_path).await.unwrap();
        let _peer = listener.accept().await.unwrap();
        let _first = link.subscribe(&ch).unwrap();
        let err = link.subscribe(&ch).unwrap_err();
        assert!(matches!(err, TransportError::AlreadySubscribed(_)));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn invalid_base64_write_is_rejected() {
        let (dir, sock_path) = temp_sock("uds-b64");
        let listener = UdsListener::bind(&sock_path).unwrap();
        let link = UdsLink::connect(&sock_path).await.unwrap();
        let _peer = listener.accept().await.unwrap();

        let err = link
            .write(&Characteristic::new("svc", "tx"), "not base64!", false)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Encoding(_)));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = UdsListener::bind(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[tokio::test]
    async fn bind_rejects_existing_non_socket_file() {
        let (dir, sock_path) = temp_sock("uds-file");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = UdsListener::bind(&sock_path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
