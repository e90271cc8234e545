use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

#[cfg(not(windows))]
use interprocess::local_socket::GenericFilePath;
#[cfg(windows)]
use interprocess::local_socket::GenericNamespaced;
use interprocess::local_socket::prelude::*;
use interprocess::local_socket::{ListenerOptions, Name, Stream};
use tracing::{debug, info};

use crate::ServerError;

/// A byte transport carrying the out-of-process framing.
///
/// `read` and `send` take `&self` so the read loop and the writers
/// (runspace worker, pipeline workers, script threads) can share one
/// connection without serializing reads against writes.
pub trait Connection: Send + Sync {
    /// Bind/accept whatever the transport needs before the first read.
    fn open(&self) -> Result<(), ServerError>;

    /// Read up to `buf.len()` bytes. Returning 0 means the peer closed.
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Write the whole buffer, blocking until it is flushed.
    fn send(&self, data: &[u8]) -> std::io::Result<()>;

    /// Tear the transport down. Idempotent.
    fn close(&self);
}

/// Line-oriented connection over standard input/output. Each `read`
/// returns one newline-terminated line from stdin (or the tail of a
/// line that did not fit the caller's buffer).
#[derive(Debug, Default)]
pub struct StdioConnection {
    pending: Mutex<Vec<u8>>,
}

impl StdioConnection {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connection for StdioConnection {
    fn open(&self) -> Result<(), ServerError> {
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if pending.is_empty() {
            std::io::stdin().lock().read_until(b'\n', &mut pending)?;
        }

        let take = pending.len().min(buf.len());
        buf[..take].copy_from_slice(&pending[..take]);
        pending.drain(..take);
        Ok(take)
    }

    fn send(&self, data: &[u8]) -> std::io::Result<()> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(data)?;
        stdout.flush()
    }

    fn close(&self) {}
}

/// Connection over a local-domain stream socket (a named pipe on
/// Windows). The server binds the given path, listens with a backlog of
/// one, and accepts exactly one peer.
pub struct PipeConnection {
    path: PathBuf,
    stream: RwLock<Option<Arc<Stream>>>,
}

impl PipeConnection {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stream: RwLock::new(None),
        }
    }

    fn active_stream(&self) -> std::io::Result<Arc<Stream>> {
        self.stream
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "connection has not been opened",
                )
            })
    }

    /// Windows addresses pipes in the `\\.\pipe\` namespace; the caller
    /// hands us the full path form, so strip the prefix back off.
    #[cfg(windows)]
    fn socket_name(path: &Path) -> std::io::Result<Name<'_>> {
        let bare = path.to_str().unwrap_or_default();
        bare.strip_prefix(r"\\.\pipe\")
            .unwrap_or(bare)
            .to_ns_name::<GenericNamespaced>()
    }

    #[cfg(not(windows))]
    fn socket_name(path: &Path) -> std::io::Result<Name<'_>> {
        path.to_fs_name::<GenericFilePath>()
    }
}

impl Connection for PipeConnection {
    fn open(&self) -> Result<(), ServerError> {
        #[cfg(unix)]
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed stale socket file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ServerError::Io(e)),
        }

        let name = Self::socket_name(&self.path)?;
        let listener = ListenerOptions::new().name(name).create_sync()?;
        info!(path = %self.path.display(), "listening for one client");

        let stream = listener.accept()?;
        info!("client connected");
        *self.stream.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(stream));
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let stream = self.active_stream()?;
        (&*stream).read(buf)
    }

    fn send(&self, data: &[u8]) -> std::io::Result<()> {
        let stream = self.active_stream()?;
        (&*stream).write_all(data)
    }

    fn close(&self) {
        self.stream
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        #[cfg(unix)]
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::time::Duration;

    #[test]
    fn pipe_connection_accepts_one_peer_and_echoes() {
        let path = std::env::temp_dir().join(format!(
            "ferroposh-test-{}.sock",
            uuid::Uuid::new_v4().simple()
        ));

        let server = Arc::new(PipeConnection::new(path.clone()));
        let server_side = Arc::clone(&server);
        let handle = std::thread::spawn(move || {
            server_side.open().unwrap();
            let mut buf = [0u8; 64];
            let n = server_side.read(&mut buf).unwrap();
            server_side.send(&buf[..n]).unwrap();
        });

        // Wait for the listener to bind before connecting.
        let mut client = None;
        for _ in 0..50 {
            let name = PipeConnection::socket_name(&path).unwrap();
            if let Ok(stream) = Stream::connect(name) {
                client = Some(stream);
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        let mut client = client.expect("client connected");

        client.write_all(b"ping\n").unwrap();
        let mut reply = [0u8; 5];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"ping\n");

        handle.join().unwrap();
        server.close();
        assert!(!path.exists());
    }

    #[test]
    fn read_before_open_reports_not_connected() {
        let connection = PipeConnection::new("/tmp/ferroposh-never-opened.sock");
        let mut buf = [0u8; 4];
        let err = connection.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
    }
}
