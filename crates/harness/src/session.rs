//! One client connection to a running submission.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use respcheck_core::codec;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{timeout, Instant};
use tracing::debug;

use crate::error::SessionError;

/// How long to wait for the rest of a reply that arrived in pieces.
const CONTINUATION_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug)]
pub struct ProtocolSession {
    addr: String,
    stream: Option<TcpStream>,
    read_timeout: Duration,
}

impl ProtocolSession {
    /// Connect to `addr` within `connect_timeout`.
    pub async fn open(
        addr: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let targets: Vec<SocketAddr> = lookup_host(addr)
            .await
            .map_err(SessionError::Host)?
            .collect();
        if targets.is_empty() {
            return Err(SessionError::Host(std::io::Error::new(
                ErrorKind::AddrNotAvailable,
                format!("{} resolved to no addresses", addr),
            )));
        }

        let stream = match timeout(connect_timeout, TcpStream::connect(&targets[..])).await {
            Err(_) => {
                return Err(SessionError::ConnectTimeout {
                    addr: addr.to_string(),
                    timeout: connect_timeout,
                })
            }
            Ok(Err(e)) if is_host_error(&e) => return Err(SessionError::Host(e)),
            Ok(Err(e)) => {
                return Err(SessionError::Connect {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                })
            }
            Ok(Ok(stream)) => stream,
        };
        // Requests are tiny; don't let Nagle hold them back.
        let _ = stream.set_nodelay(true);

        debug!(addr = %addr, "Session opened");
        Ok(Self {
            addr: addr.to_string(),
            stream: Some(stream),
            read_timeout,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let read_timeout = self.read_timeout;
        let stream = self.stream.as_mut().ok_or(SessionError::NotOpen)?;
        debug!(bytes = %codec::render_bytes(bytes), "send");

        match timeout(read_timeout, stream.write_all(bytes)).await {
            Err(_) => Err(SessionError::Timeout { timeout: read_timeout }),
            Ok(Err(e)) => Err(io_error(e)),
            Ok(Ok(())) => Ok(()),
        }
    }

    /// One bounded read of at most `max_bytes`.
    pub async fn receive(&mut self, max_bytes: usize) -> Result<Vec<u8>, SessionError> {
        let read_timeout = self.read_timeout;
        let bytes = self.read_once(max_bytes, read_timeout).await?;
        debug!(bytes = %codec::render_bytes(&bytes), "recv");
        Ok(bytes)
    }

    /// [`receive`](Self::receive), then keep reading briefly while the reply
    /// frame is incomplete. Whatever has arrived is returned once the frame
    /// completes, `max_bytes` is reached, the peer stops sending, or the read
    /// timeout runs out.
    pub async fn receive_reply(&mut self, max_bytes: usize) -> Result<Vec<u8>, SessionError> {
        let deadline = Instant::now() + self.read_timeout;
        let mut reply = self.read_once(max_bytes, self.read_timeout).await?;

        while !codec::is_complete_frame(&reply) && reply.len() < max_bytes {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self
                .read_once(max_bytes - reply.len(), remaining.min(CONTINUATION_GRACE))
                .await
            {
                Ok(more) => reply.extend_from_slice(&more),
                Err(SessionError::Timeout { .. } | SessionError::Closed) => break,
                Err(e) => return Err(e),
            }
        }

        debug!(bytes = %codec::render_bytes(&reply), "recv");
        Ok(reply)
    }

    async fn read_once(&mut self, max_bytes: usize, limit: Duration) -> Result<Vec<u8>, SessionError> {
        let stream = self.stream.as_mut().ok_or(SessionError::NotOpen)?;
        let mut buf = vec![0u8; max_bytes.max(1)];

        match timeout(limit, stream.read(&mut buf)).await {
            Err(_) => Err(SessionError::Timeout { timeout: limit }),
            Ok(Ok(0)) => Err(SessionError::Closed),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) => Err(io_error(e)),
        }
    }

    /// Close the connection. Safe to call any number of times.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(addr = %self.addr, error = %e, "Shutdown after peer close");
            }
            debug!(addr = %self.addr, "Session closed");
        }
    }
}

fn is_host_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::PermissionDenied
            | ErrorKind::AddrNotAvailable
            | ErrorKind::Unsupported
            | ErrorKind::OutOfMemory
    ) || is_descriptor_exhaustion(e)
}

#[cfg(unix)]
fn is_descriptor_exhaustion(e: &std::io::Error) -> bool {
    use nix::errno::Errno;

    matches!(
        e.raw_os_error().map(Errno::from_raw),
        Some(Errno::EMFILE | Errno::ENFILE)
    )
}

#[cfg(not(unix))]
fn is_descriptor_exhaustion(_e: &std::io::Error) -> bool {
    false
}

fn io_error(e: std::io::Error) -> SessionError {
    match e.kind() {
        ErrorKind::UnexpectedEof => SessionError::Closed,
        _ if is_host_error(&e) => SessionError::Host(e),
        _ => SessionError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const SHORT: Duration = Duration::from_millis(300);

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn test_open_refused_port_is_connection_failure() {
        let (listener, addr) = listener().await;
        drop(listener);

        let err = ProtocolSession::open(&addr, SHORT, SHORT).await.unwrap_err();
        assert!(matches!(err, SessionError::Connect { .. }), "got {err:?}");
        assert!(!err.is_host_fault());
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_host_fault() {
        let err = ProtocolSession::open("not a host:6379", SHORT, SHORT)
            .await
            .unwrap_err();
        assert!(err.is_host_fault());
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(socket);
        });

        let mut session = ProtocolSession::open(&addr, SHORT, SHORT).await.unwrap();
        session.send(&codec::encode_command(&["PING"])).await.unwrap();
        let err = session.receive(1024).await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));

        session.close().await;
        server.abort();
    }

    #[tokio::test]
    async fn test_receive_reply_joins_split_frame() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(b"$5\r\n").await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            socket.write_all(b"hello\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut session = ProtocolSession::open(&addr, SHORT, SHORT).await.unwrap();
        session
            .send(&codec::encode_command(&["ECHO", "hello"]))
            .await
            .unwrap();
        let reply = session.receive_reply(1024).await.unwrap();
        assert_eq!(codec::decode_bulk_string(&reply), Some(&b"hello"[..]));

        session.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_before_reply() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut session = ProtocolSession::open(&addr, SHORT, SHORT).await.unwrap();
        server.await.unwrap();
        let _ = session.send(b"*1\r\n$4\r\nPING\r\n").await;
        let err = session.receive(1024).await.unwrap_err();
        assert!(
            matches!(err, SessionError::Closed | SessionError::Io(_)),
            "got {err:?}"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_descriptor_exhaustion_is_host_fault() {
        use nix::errno::Errno;

        for errno in [Errno::EMFILE, Errno::ENFILE] {
            let err = io_error(std::io::Error::from_raw_os_error(errno as i32));
            assert!(err.is_host_fault(), "{errno:?}");
        }
        let refused = io_error(std::io::Error::from_raw_os_error(Errno::ECONNRESET as i32));
        assert!(!refused.is_host_fault());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (listener, addr) = listener().await;
        let mut session = ProtocolSession::open(&addr, SHORT, SHORT).await.unwrap();
        assert!(session.is_open());

        session.close().await;
        session.close().await;
        assert!(!session.is_open());
        assert!(matches!(
            session.send(b"PING").await,
            Err(SessionError::NotOpen)
        ));
        drop(listener);
    }
}
