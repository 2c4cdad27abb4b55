//! IPC via Unix sockets
//!
//! Lets a host application drive an `OverlayManager` in another process.
//! Uses length-prefixed JSON over Unix domain sockets.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::config;

mod dispatch;
mod messages;
pub use dispatch::{handle_request, serve_connection, Flow};
pub use messages::{OverlayRequest, OverlayResponse};

/// Upper bound on one frame's payload (10 MiB)
const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// `$XDG_RUNTIME_DIR/doc-overlay/overlay.sock`, or the cache dir when no
/// runtime dir is set
pub fn default_socket_path() -> Result<PathBuf> {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return Ok(PathBuf::from(runtime_dir)
            .join(config::APP_DIR)
            .join(config::SOCKET_FILENAME));
    }

    let cache = dirs::cache_dir()
        .context("Failed to determine cache directory (no XDG_RUNTIME_DIR or HOME)")?;
    Ok(cache.join(config::APP_DIR).join(config::SOCKET_FILENAME))
}

/// One end of an overlay IPC connection
pub struct OverlayConnection {
    stream: UnixStream,
}

impl OverlayConnection {
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// Connect to the overlay server socket
    pub fn connect() -> Result<Self> {
        let path = default_socket_path()?;
        Self::connect_to(&path)
    }

    pub fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .with_context(|| format!("Failed to connect to overlay server at {}", path.display()))?;
        Ok(Self { stream })
    }

    pub fn send_request(&mut self, req: &OverlayRequest) -> Result<()> {
        write_message(&mut self.stream, req)
    }

    /// Blocking
    pub fn recv_response(&mut self) -> Result<OverlayResponse> {
        read_message(&mut self.stream)
    }

    /// Send request and wait for response
    pub fn request(&mut self, req: OverlayRequest) -> Result<OverlayResponse> {
        self.send_request(&req)?;
        self.recv_response()
    }

    pub fn recv_request(&mut self) -> Result<OverlayRequest> {
        read_message(&mut self.stream)
    }

    /// Wait up to `timeout` for the next request to start arriving; `None`
    /// if nothing came. A frame that has started is read to the end.
    pub fn poll_request(&mut self, timeout: Duration) -> Result<Option<OverlayRequest>> {
        self.stream
            .set_read_timeout(Some(timeout))
            .context("Failed to set IPC read timeout")?;
        let mut first = [0u8; 1];
        loop {
            match self.stream.read(&mut first) {
                Ok(0) => bail!("Connection closed by peer"),
                Ok(_) => break,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("Failed to read message length"),
            }
        }

        self.stream
            .set_read_timeout(None)
            .context("Failed to clear IPC read timeout")?;
        let mut frame = Cursor::new(first).chain(&mut self.stream);
        read_message(&mut frame).map(Some)
    }

    pub fn send_response(&mut self, resp: &OverlayResponse) -> Result<()> {
        write_message(&mut self.stream, resp)
    }
}

/// Listening socket of the overlay server
pub struct OverlayServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl OverlayServer {
    /// Bind to the default socket path
    pub fn bind() -> Result<Self> {
        let socket_path = default_socket_path()?;
        Self::bind_to(socket_path)
    }

    pub fn bind_to(socket_path: PathBuf) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
        }

        // Left behind by a server that did not shut down cleanly
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)
                .with_context(|| format!("Failed to remove stale socket: {}", socket_path.display()))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind socket at {}", socket_path.display()))?;

        // Owner only
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o700))
                .context("Failed to set socket permissions")?;
        }

        // Accept is polled so the serve loop can notice shutdown signals
        listener
            .set_nonblocking(true)
            .context("Failed to make listener non-blocking")?;

        Ok(Self {
            listener,
            socket_path,
        })
    }

    /// Accept a pending connection, `None` if nobody is waiting
    pub fn try_accept(&self) -> Result<Option<OverlayConnection>> {
        match self.listener.accept() {
            Ok((stream, _addr)) => {
                stream
                    .set_nonblocking(false)
                    .context("Failed to make IPC stream blocking")?;
                Ok(Some(OverlayConnection { stream }))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e).context("Failed to accept IPC connection"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for OverlayServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Frame and send one message
pub(crate) fn write_message<W: Write, T: Serialize>(stream: &mut W, msg: &T) -> Result<()> {
    let json = serde_json::to_vec(msg).context("Failed to serialize message to JSON")?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(anyhow!("Message too large: {} bytes (max: {})", json.len(), MAX_MESSAGE_SIZE));
    }

    // u32 little-endian length, then the JSON payload
    let len = json.len() as u32;
    stream
        .write_all(&len.to_le_bytes())
        .context("Failed to write message length")?;
    stream
        .write_all(&json)
        .context("Failed to write message payload")?;
    stream.flush().context("Failed to flush stream")?;

    Ok(())
}

/// Receive one framed message
pub(crate) fn read_message<R: Read, T: for<'de> Deserialize<'de>>(stream: &mut R) -> Result<T> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .context("Failed to read message length")?;
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(anyhow!("Message too large: {} bytes (max: {})", len, MAX_MESSAGE_SIZE));
    }

    let mut json_buf = vec![0u8; len];
    stream
        .read_exact(&mut json_buf)
        .context("Failed to read message payload")?;

    serde_json::from_slice(&json_buf).context("Failed to deserialize message from JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use std::io::Cursor;

    #[test]
    fn test_frame_layout() {
        let mut buf = Vec::new();
        write_message(&mut buf, &OverlayRequest::Ping).unwrap();
        assert_eq!(&buf[..4], &6u32.to_le_bytes());
        assert_eq!(&buf[4..], b"\"Ping\"");
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_MESSAGE_SIZE as u32 + 1).to_le_bytes());
        let err = read_message::<_, OverlayRequest>(&mut Cursor::new(buf)).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_truncated_frame_is_error() {
        let mut buf = Vec::new();
        write_message(
            &mut buf,
            &OverlayRequest::UpdateContainerBounds(Rect::new(1, 2, 3, 4)),
        )
        .unwrap();
        buf.truncate(buf.len() - 2);
        assert!(read_message::<_, OverlayRequest>(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn test_server_accepts_client() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("overlay.sock");
        let server = OverlayServer::bind_to(path.clone()).unwrap();
        assert!(server.try_accept().unwrap().is_none());

        let mut client = OverlayConnection::connect_to(&path).unwrap();
        let mut accepted = None;
        for _ in 0..100 {
            accepted = server.try_accept().unwrap();
            if accepted.is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        let mut accepted = accepted.unwrap();

        client.send_request(&OverlayRequest::Ping).unwrap();
        assert!(matches!(accepted.recv_request().unwrap(), OverlayRequest::Ping));
        accepted.send_response(&OverlayResponse::Pong).unwrap();
        assert!(matches!(client.recv_response().unwrap(), OverlayResponse::Pong));

        drop(server);
        assert!(!path.exists());
    }

    #[test]
    fn test_poll_request_times_out_then_reads_frame() {
        let (client, server) = UnixStream::pair().unwrap();
        let mut client = OverlayConnection::new(client);
        let mut server = OverlayConnection::new(server);

        let started = std::time::Instant::now();
        assert!(server.poll_request(Duration::from_millis(50)).unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_millis(40));

        client
            .send_request(&OverlayRequest::UpdateWindowPosition { x: -5, y: 7 })
            .unwrap();
        assert_eq!(
            server.poll_request(Duration::from_millis(500)).unwrap(),
            Some(OverlayRequest::UpdateWindowPosition { x: -5, y: 7 })
        );

        drop(client);
        assert!(server.poll_request(Duration::from_millis(500)).is_err());
    }
}
