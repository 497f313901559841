use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use super::request::{HttpRequest, MULTIPART_CONTENT_TYPE, Method, Part};
use super::response::{self, HttpResponse};
use super::HttpError;
use super::url::parse as parse_url;
use crate::link::LinkState;
use crate::metrics;
use crate::transport::{Connector, Stream};

pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request payload. Multipart wins over JSON when a caller has both.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// `multipart/form-data`; an empty list still sends the multipart type.
    Multipart(Vec<Part>),
    Json(String),
}

impl RequestBody {
    pub fn from_parts(data: Option<Vec<Part>>, json: Option<String>) -> Self {
        match (data, json) {
            (Some(parts), _) => RequestBody::Multipart(parts),
            (None, Some(json)) => RequestBody::Json(json),
            (None, None) => RequestBody::Empty,
        }
    }
}

/// One-shot HTTP requests over a [`Connector`].
///
/// Never retries and never surfaces an error: every failure is logged and
/// reported as `None`. Retry policy belongs to the caller.
#[derive(Clone)]
pub struct HttpClient {
    connector: Arc<dyn Connector>,
    link: LinkState,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(connector: Arc<dyn Connector>, link: LinkState) -> Self {
        Self {
            connector,
            link,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Deadline applied separately to connecting and to the exchange.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn get(&self, url: &str) -> Option<HttpResponse> {
        self.request("GET", url, RequestBody::Empty, &[]).await
    }

    pub async fn request(
        &self,
        method: &str,
        url: &str,
        body: RequestBody,
        headers: &[(&str, &str)],
    ) -> Option<HttpResponse> {
        let method = match method.parse::<Method>() {
            Ok(method) => method,
            Err(err) => {
                debug!(%url, error = %err, "request rejected");
                metrics::HTTP_REQUESTS.with_label_values(&["rejected"]).inc();
                return None;
            }
        };
        let parsed = parse_url(url);
        let host = match (parsed.protocol.as_deref(), parsed.host.as_deref()) {
            (Some("http"), Some(host)) => host.to_string(),
            _ => {
                debug!(%url, "request rejected, only http urls with a host are supported");
                metrics::HTTP_REQUESTS.with_label_values(&["rejected"]).inc();
                return None;
            }
        };
        if !self.link.is_station_active() {
            warn!(%url, "network link down, request skipped");
            metrics::HTTP_REQUESTS.with_label_values(&["rejected"]).inc();
            return None;
        }
        let port = parsed.port.unwrap_or(DEFAULT_PORT);

        let mut request = HttpRequest::new(method, parsed.request_target());
        let host_header = if port == DEFAULT_PORT {
            host.clone()
        } else {
            format!("{host}:{port}")
        };
        request.set_header("Host", host_header);
        request.set_header("Accept", "*/*");
        request.set_header("Connection", "keep-alive");
        for (name, value) in headers {
            request.set_header(*name, *value);
        }
        match body {
            RequestBody::Empty => {}
            RequestBody::Multipart(parts) => {
                request.set_header("Content-Type", MULTIPART_CONTENT_TYPE);
                request.set_multipart();
                for part in parts {
                    request.add_part(part);
                }
            }
            RequestBody::Json(json) => request.set_content(Part::json(json)),
        }

        let mut stream = match timeout(self.timeout, self.connector.open(&host, port)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                warn!(%url, error = %err, "http request failed, cannot connect");
                metrics::HTTP_REQUESTS.with_label_values(&["failed"]).inc();
                return None;
            }
            Err(_) => {
                warn!(%url, "http request failed, connect timed out");
                metrics::HTTP_REQUESTS.with_label_values(&["failed"]).inc();
                return None;
            }
        };

        let outcome = timeout(self.timeout, exchange(&mut stream, &request)).await;
        if let Err(err) = stream.close().await {
            debug!(%url, error = %err, "stream close failed");
        }

        match outcome {
            Ok(Ok(response)) => {
                debug!(%url, status = response.status, bytes = response.content().len(), "http response");
                metrics::HTTP_REQUESTS.with_label_values(&["ok"]).inc();
                Some(response)
            }
            Ok(Err(err)) => {
                warn!(%url, error = %err, "http request failed");
                metrics::HTTP_REQUESTS.with_label_values(&["failed"]).inc();
                None
            }
            Err(_) => {
                warn!(%url, "http request failed, timed out");
                metrics::HTTP_REQUESTS.with_label_values(&["failed"]).inc();
                None
            }
        }
    }
}

async fn exchange(stream: &mut Stream, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
    request.send(stream).await?;
    response::read_acknowledged(stream).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockConnector, Script};

    fn client(connector: &Arc<MockConnector>, link: LinkState) -> HttpClient {
        HttpClient::new(connector.clone(), link)
    }

    #[tokio::test]
    async fn unsupported_scheme_or_missing_host_never_opens() {
        let connector = Arc::new(MockConnector::new());
        let http = client(&connector, LinkState::connected());
        for url in ["https://example.com", "ftp://example.com/x", "http://", "example.com/ip"] {
            assert!(http.get(url).await.is_none(), "url {url:?}");
        }
        assert!(http.request("PUT", "http://example.com/", RequestBody::Empty, &[]).await.is_none());
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test]
    async fn link_down_skips_io() {
        let connector = Arc::new(MockConnector::new());
        connector.push(Script::respond(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec()));
        let http = client(&connector, LinkState::new());
        assert!(http.get("http://api.ipify.org/").await.is_none());
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test]
    async fn get_sends_default_headers_and_closes() {
        let connector = Arc::new(MockConnector::new());
        connector.push(Script::respond(
            b"HTTP/1.1 200 OK\r\nContent-Length: 12\r\n\r\n198.51.100.4".to_vec(),
        ));
        let http = client(&connector, LinkState::connected());
        let response = http
            .request(
                "GET",
                "http://api.infoip.io/ip?fmt=text",
                RequestBody::Empty,
                &[("User-Agent", "camesp")],
            )
            .await
            .expect("response");
        assert_eq!(response.text(), "198.51.100.4");

        let conn = connector.connection(0).expect("opened");
        assert_eq!(conn.host, "api.infoip.io");
        assert_eq!(conn.port, 80);
        assert!(conn.is_closed());
        assert_eq!(
            conn.written_text(),
            "GET /ip?fmt=text HTTP/1.1\r\nHost: api.infoip.io\r\nAccept: */*\r\nConnection: keep-alive\r\nUser-Agent: camesp\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn explicit_port_reaches_connector_and_host_header() {
        let connector = Arc::new(MockConnector::new());
        connector.push(Script::respond(b"HTTP/1.1 204 No Content\r\n\r\n".to_vec()));
        let http = client(&connector, LinkState::connected());
        let response = http.get("http://192.168.1.30:8080/").await.expect("response");
        assert_eq!(response.status, 204);

        let conn = connector.connection(0).expect("opened");
        assert_eq!(conn.port, 8080);
        assert!(conn.written_text().contains("Host: 192.168.1.30:8080\r\n"));
    }

    #[tokio::test]
    async fn json_post_carries_body() {
        let connector = Arc::new(MockConnector::new());
        connector.push(Script::respond(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec()));
        let http = client(&connector, LinkState::connected());
        let body = RequestBody::from_parts(None, Some(r#"{"a":1}"#.to_string()));
        http.request("POST", "http://hub.local/api", body, &[])
            .await
            .expect("response");

        let written = connector.connection(0).expect("opened").written_text();
        assert!(written.starts_with("POST /api HTTP/1.1\r\n"));
        assert!(written.contains("Content-Type: application/json\r\n"));
        assert!(written.ends_with("\r\n\r\n{\"a\":1}"));
    }

    #[tokio::test]
    async fn multipart_wins_over_json() {
        let connector = Arc::new(MockConnector::new());
        connector.push(Script::respond(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec()));
        let http = client(&connector, LinkState::connected());
        let body = RequestBody::from_parts(
            Some(vec![Part::text("chat_id", "42")]),
            Some("{}".to_string()),
        );
        http.request("POST", "http://hub.local/send", body, &[])
            .await
            .expect("response");

        let written = connector.connection(0).expect("opened").written_text();
        assert!(written.contains("Content-Type: multipart/form-data; boundary="));
        assert!(written.contains("name=\"chat_id\""));
        assert!(!written.contains("application/json"));
    }

    #[tokio::test]
    async fn refused_connection_is_no_result() {
        let connector = Arc::new(MockConnector::new());
        let http = client(&connector, LinkState::connected());
        assert!(http.get("http://l2.io/ip").await.is_none());
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn reset_mid_response_still_closes_stream() {
        let connector = Arc::new(MockConnector::new());
        connector.push(Script::reset_after(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nab\r\n".to_vec(),
        ));
        let http = client(&connector, LinkState::connected());
        assert!(http.get("http://cam.local/stream").await.is_none());
        assert!(connector.connection(0).expect("opened").is_closed());
    }

    #[tokio::test]
    async fn chunked_response_is_acknowledged_and_returned() {
        let connector = Arc::new(MockConnector::new());
        connector.push(Script::respond(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n".to_vec(),
        ));
        let http = client(&connector, LinkState::connected());
        let response = http.get("http://cam.local/chunks").await.expect("response");
        assert_eq!(response.content(), b"abcde");

        let written = connector.connection(0).expect("opened").written_text();
        assert_eq!(written.matches("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").count(), 2);
    }
}
