use std::borrow::Cow;
use std::io;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use super::HttpError;
use crate::metrics;
use crate::transport::Stream;

/// Sent by the client after every non-terminal chunk. The device firmware
/// on the other side waits for it before pushing the next chunk.
pub const CHUNK_ACK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";

const MAX_LINE: usize = 8 * 1024;
const MAX_HEADERS: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    /// Size of the last chunk read; `None` until a chunk round happens.
    pub chunk_size: Option<usize>,
    content: BytesMut,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn is_chunked(&self) -> bool {
        self.header("Transfer-Encoding")
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("chunked"))
    }

    /// Everything received so far, all chunks concatenated.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn into_content(self) -> Bytes {
        self.content.freeze()
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    /// Reads the status line and headers.
    pub async fn read_head(stream: &mut Stream) -> Result<Self, HttpError> {
        let status_line = read_text_line(stream).await?.ok_or(HttpError::Closed)?;
        let (status, reason) = parse_status_line(&status_line)?;

        let mut headers = Vec::new();
        loop {
            let line = read_text_line(stream)
                .await?
                .ok_or_else(|| HttpError::Malformed("headers truncated".into()))?;
            if line.is_empty() {
                break;
            }
            if headers.len() == MAX_HEADERS {
                return Err(HttpError::Malformed("too many headers".into()));
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HttpError::Malformed(format!("bad header line {line:?}")))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self {
            status,
            reason,
            headers,
            chunk_size: None,
            content: BytesMut::new(),
        })
    }

    /// Reads a non-chunked body: `Content-Length` bytes, or up to end of
    /// stream when the length is not announced.
    pub async fn read_body(&mut self, stream: &mut Stream) -> Result<(), HttpError> {
        match self.header("Content-Length") {
            Some(length) => {
                let length: usize = length
                    .parse()
                    .map_err(|_| HttpError::Malformed(format!("bad content length {length:?}")))?;
                let body = stream.read_exact(length).await?;
                self.content.extend_from_slice(&body);
            }
            None => {
                let body = stream.read_to_end().await?;
                self.content.extend_from_slice(&body);
            }
        }
        Ok(())
    }

    /// Reads one chunk, appends it to the content and returns its size.
    /// A size of zero is the terminator.
    pub async fn read_chunk(&mut self, stream: &mut Stream) -> Result<usize, HttpError> {
        let size_line = read_text_line(stream)
            .await
            .map_err(truncation_is_malformed)?
            .ok_or_else(|| HttpError::Malformed("stream ended before chunk size".into()))?;
        let size_field = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| HttpError::Malformed(format!("bad chunk size {size_line:?}")))?;
        self.chunk_size = Some(size);

        if size == 0 {
            // Trailer section; an early end of stream after the terminator is tolerated.
            while let Some(line) = read_text_line(stream).await.map_err(truncation_is_malformed)? {
                if line.is_empty() {
                    break;
                }
            }
            return Ok(0);
        }

        let data = stream
            .read_exact(size)
            .await
            .map_err(|err| truncation_is_malformed(err.into()))?;
        self.content.extend_from_slice(&data);
        match read_text_line(stream).await.map_err(truncation_is_malformed)? {
            Some(line) if line.is_empty() => Ok(size),
            _ => Err(HttpError::Malformed("chunk data not followed by CRLF".into())),
        }
    }
}

/// Writes the per-chunk acknowledgement.
pub async fn send_ack(stream: &mut Stream) -> Result<(), HttpError> {
    stream.write(CHUNK_ACK).await?;
    stream.flush().await?;
    metrics::HTTP_CHUNK_ACKS.inc();
    Ok(())
}

/// Receives a whole response.
///
/// Non-200 responses stop right after the headers. Chunked 200 responses
/// are read one chunk per round, acknowledging every non-empty chunk before
/// the next round, until the zero-size terminator. Malformed chunk framing
/// ends the rounds and returns what was accumulated; I/O failures are errors.
pub async fn read_acknowledged(stream: &mut Stream) -> Result<HttpResponse, HttpError> {
    let mut response = HttpResponse::read_head(stream).await?;
    if !response.is_ok() {
        debug!(status = response.status, "non-200 response, no chunk rounds");
        return Ok(response);
    }
    if !response.is_chunked() {
        response.read_body(stream).await?;
        return Ok(response);
    }

    loop {
        match response.read_chunk(stream).await {
            Ok(0) => break,
            Ok(_) => send_ack(stream).await?,
            Err(HttpError::Malformed(reason)) => {
                warn!(peer = %stream.peer(), %reason, "chunk framing broken, keeping partial content");
                break;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(response)
}

async fn read_text_line(stream: &mut Stream) -> Result<Option<String>, HttpError> {
    let mut line = Vec::new();
    let read = stream.read_line(&mut line).await?;
    if read == 0 {
        return Ok(None);
    }
    if line.len() > MAX_LINE {
        return Err(HttpError::Malformed("line too long".into()));
    }
    if line.last() != Some(&b'\n') {
        return Err(HttpError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "line cut by end of stream",
        )));
    }
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    String::from_utf8(line)
        .map(Some)
        .map_err(|_| HttpError::Malformed("line is not utf-8".into()))
}

fn truncation_is_malformed(err: HttpError) -> HttpError {
    match err {
        HttpError::Io(io) if io.kind() == io::ErrorKind::UnexpectedEof => {
            HttpError::Malformed("chunk truncated".into())
        }
        other => other,
    }
}

fn parse_status_line(line: &str) -> Result<(u16, String), HttpError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(HttpError::Malformed(format!("bad status line {line:?}")));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| HttpError::Malformed(format!("bad status code in {line:?}")))?;
    let reason = parts.next().unwrap_or_default().to_string();
    Ok((status, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Connector;
    use crate::transport::mock::{MockConnector, Script};

    async fn stream_for(script: Script) -> (MockConnector, Stream) {
        let connector = MockConnector::new();
        connector.push(script);
        let stream = connector.open("cam.local", 80).await.expect("open");
        (connector, stream)
    }

    fn ack_count(written: &[u8]) -> usize {
        written
            .windows(CHUNK_ACK.len())
            .filter(|window| *window == CHUNK_ACK)
            .count()
    }

    #[tokio::test]
    async fn plain_body_uses_content_length() {
        let (_connector, mut stream) = stream_for(Script::respond(
            b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\n203.0.113.7trailing".to_vec(),
        ))
        .await;
        let response = read_acknowledged(&mut stream).await.expect("response");
        assert_eq!(response.status, 200);
        assert_eq!(response.reason, "OK");
        assert_eq!(response.text(), "203.0.113.7");
        assert_eq!(response.chunk_size, None);
    }

    #[tokio::test]
    async fn body_without_length_reads_to_end() {
        let (_connector, mut stream) = stream_for(Script::respond(
            b"HTTP/1.0 200 OK\r\nServer: tiny\r\n\r\nhello".to_vec(),
        ))
        .await;
        let response = read_acknowledged(&mut stream).await.expect("response");
        assert_eq!(response.header("server"), Some("tiny"));
        assert_eq!(response.content(), b"hello");
    }

    #[tokio::test]
    async fn one_ack_per_non_terminal_chunk() {
        let (connector, mut stream) = stream_for(Script::respond(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nabcd\r\n3\r\nefg\r\n1\r\nh\r\n0\r\n\r\nEXTRA".to_vec(),
        ))
        .await;
        let response = read_acknowledged(&mut stream).await.expect("response");
        assert_eq!(response.content(), b"abcdefgh");
        assert_eq!(response.chunk_size, Some(0));

        let rest = stream.read_to_end().await.expect("rest");
        assert_eq!(rest, b"EXTRA", "reading stops right after the terminator");

        let written = connector.connection(0).expect("conn").written();
        assert_eq!(ack_count(&written), 3);
        assert_eq!(written.len(), 3 * CHUNK_ACK.len());
    }

    #[tokio::test]
    async fn non_200_means_zero_rounds() {
        let (connector, mut stream) = stream_for(Script::respond(
            b"HTTP/1.1 404 Not Found\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nabcd\r\n0\r\n\r\n".to_vec(),
        ))
        .await;
        let response = read_acknowledged(&mut stream).await.expect("response");
        assert_eq!(response.status, 404);
        assert_eq!(response.chunk_size, None);
        assert!(response.content().is_empty());
        assert!(connector.connection(0).expect("conn").written().is_empty());
    }

    #[tokio::test]
    async fn malformed_chunk_returns_partial_content() {
        let (connector, mut stream) = stream_for(Script::respond(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\nzz\r\nnope".to_vec(),
        ))
        .await;
        let response = read_acknowledged(&mut stream).await.expect("partial response");
        assert_eq!(response.content(), b"ok");
        assert_eq!(ack_count(&connector.connection(0).expect("conn").written()), 1);
    }

    #[tokio::test]
    async fn truncated_chunk_returns_partial_content() {
        let (_connector, mut stream) = stream_for(Script::respond(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n8\r\nxy".to_vec(),
        ))
        .await;
        let response = read_acknowledged(&mut stream).await.expect("partial response");
        assert_eq!(response.content(), b"abc");
    }

    #[tokio::test]
    async fn reset_mid_body_is_an_error() {
        let (_connector, mut stream) = stream_for(Script::reset_after(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n".to_vec(),
        ))
        .await;
        let err = read_acknowledged(&mut stream).await.expect_err("reset");
        assert!(matches!(err, HttpError::Io(_)));
    }

    #[tokio::test]
    async fn garbage_status_line_is_rejected() {
        let (_connector, mut stream) =
            stream_for(Script::respond(b"SSH-2.0-OpenSSH_9.6\r\n".to_vec())).await;
        let err = read_acknowledged(&mut stream).await.expect_err("not http");
        assert!(matches!(err, HttpError::Malformed(_)));
    }

    #[tokio::test]
    async fn empty_stream_is_closed() {
        let (_connector, mut stream) = stream_for(Script::respond(Vec::new())).await;
        let err = read_acknowledged(&mut stream).await.expect_err("closed");
        assert!(matches!(err, HttpError::Closed));
    }
}
