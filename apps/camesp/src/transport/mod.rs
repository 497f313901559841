use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tracing::debug;

pub mod mock;
pub mod tcp;

pub use tcp::TcpConnector;

/// Any bidirectional byte stream a [`Connector`] can hand out.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Opens byte streams to remote hosts.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, host: &str, port: u16) -> io::Result<Stream>;
}

/// Buffered stream handle.
///
/// Callers must `close()` it on every exit path; dropping it releases the
/// socket but skips the orderly shutdown.
pub struct Stream {
    inner: BufStream<Box<dyn Io>>,
    peer: String,
    closed: bool,
}

impl Stream {
    pub fn new(io: Box<dyn Io>, peer: impl Into<String>) -> Self {
        Self {
            inner: BufStream::new(io),
            peer: peer.into(),
            closed: false,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Reads up to and including the next `\n`. Returns 0 at end of stream.
    pub async fn read_line(&mut self, line: &mut Vec<u8>) -> io::Result<usize> {
        self.inner.read_until(b'\n', line).await
    }

    pub async fn read_exact(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).await?;
        Ok(buf)
    }

    pub async fn read_to_end(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.inner.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data).await
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }

    /// Flushes and shuts the stream down. Safe to call more than once.
    pub async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!(peer = %self.peer, "closing stream");
        let flushed = self.inner.flush().await;
        let shutdown = self.inner.shutdown().await;
        flushed.and(shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockConnector, Script};
    use super::*;

    #[tokio::test]
    async fn reads_lines_and_exact_bytes() {
        let connector = MockConnector::new();
        connector.push(Script::respond(b"first line\r\nABCDrest".to_vec()));
        let mut stream = connector.open("device.local", 80).await.expect("open");

        let mut line = Vec::new();
        stream.read_line(&mut line).await.expect("line");
        assert_eq!(line, b"first line\r\n");
        assert_eq!(stream.read_exact(4).await.expect("exact"), b"ABCD");
        assert_eq!(stream.read_to_end().await.expect("rest"), b"rest");
    }

    #[tokio::test]
    async fn close_flushes_and_is_idempotent() {
        let connector = MockConnector::new();
        connector.push(Script::respond(Vec::new()));
        let mut stream = connector.open("device.local", 80).await.expect("open");
        stream.write(b"hello").await.expect("write");
        stream.close().await.expect("close");
        stream.close().await.expect("second close");

        let conn = connector.connection(0).expect("recorded");
        assert_eq!(conn.written(), b"hello");
        assert!(conn.is_closed());
    }
}
