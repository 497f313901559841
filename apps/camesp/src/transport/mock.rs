//! In-memory connector that replays scripted server bytes and records what
//! the client wrote.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::{Connector, Stream};

/// What the fake server sends back on one connection.
#[derive(Debug, Clone)]
pub struct Script {
    response: Vec<u8>,
    reset_at_end: bool,
}

impl Script {
    /// Replays `response`, then reports end of stream.
    pub fn respond(response: impl Into<Vec<u8>>) -> Self {
        Self {
            response: response.into(),
            reset_at_end: false,
        }
    }

    /// Replays `response`, then fails the next read with a connection reset.
    pub fn reset_after(response: impl Into<Vec<u8>>) -> Self {
        Self {
            response: response.into(),
            reset_at_end: true,
        }
    }
}

/// Client side record of one opened connection.
#[derive(Debug, Clone)]
pub struct MockConnection {
    pub host: String,
    pub port: u16,
    written: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

impl MockConnection {
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written.lock()).into_owned()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MockConnector {
    scripts: Mutex<VecDeque<Script>>,
    connections: Mutex<Vec<MockConnection>>,
    attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the script served by the next successful open. When the queue
    /// is empty, opens are refused.
    pub fn push(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    /// Number of `open` calls, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> Vec<MockConnection> {
        self.connections.lock().clone()
    }

    pub fn connection(&self, index: usize) -> Option<MockConnection> {
        self.connections.lock().get(index).cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, host: &str, port: u16) -> io::Result<Stream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let Some(script) = self.scripts.lock().pop_front() else {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("no scripted peer for {host}:{port}"),
            ));
        };
        let record = MockConnection {
            host: host.to_string(),
            port,
            written: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        self.connections.lock().push(record.clone());
        let io = ScriptedIo {
            script,
            position: 0,
            record,
        };
        Ok(Stream::new(Box::new(io), format!("{host}:{port}")))
    }
}

struct ScriptedIo {
    script: Script,
    position: usize,
    record: MockConnection,
}

impl AsyncRead for ScriptedIo {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let remaining = &this.script.response[this.position..];
        if remaining.is_empty() {
            if this.script.reset_at_end {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "scripted reset",
                )));
            }
            return Poll::Ready(Ok(()));
        }
        let len = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..len]);
        this.position += len;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ScriptedIo {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.record.is_closed() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write after shutdown",
            )));
        }
        self.record.written.lock().extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.record.closed.store(true, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}
