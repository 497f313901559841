use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;

use super::HttpError;
use crate::transport::Stream;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/form-data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = HttpError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            other => Err(HttpError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// One piece of a request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub content_type: String,
    pub body: Bytes,
}

impl Part {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            filename: None,
            content_type: "text/plain".to_string(),
            body: Bytes::from(value.into()),
        }
    }

    pub fn json(body: impl Into<String>) -> Self {
        Self {
            name: None,
            filename: None,
            content_type: JSON_CONTENT_TYPE.to_string(),
            body: Bytes::from(body.into()),
        }
    }

    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            filename: Some(filename.into()),
            content_type: content_type.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum Body {
    #[default]
    Empty,
    Multipart(Vec<Part>),
    Single(Part),
}

/// Outgoing request. Header order is preserved on the wire.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    body: Body,
    boundary: String,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self {
            method: Method::Get,
            path: "/".to_string(),
            headers: Vec::new(),
            body: Body::Empty,
            boundary: new_boundary(),
        }
    }
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    /// Replaces an existing header (names compare case-insensitively) in
    /// place, otherwise appends it.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Switches the body to multipart (if it was not already) and appends a part.
    pub fn add_part(&mut self, part: Part) {
        match &mut self.body {
            Body::Multipart(parts) => parts.push(part),
            _ => self.body = Body::Multipart(vec![part]),
        }
    }

    /// Multipart body, possibly without any part yet.
    pub fn set_multipart(&mut self) {
        if !matches!(self.body, Body::Multipart(_)) {
            self.body = Body::Multipart(Vec::new());
        }
    }

    /// Single typed body; replaces anything set before.
    pub fn set_content(&mut self, part: Part) {
        self.body = Body::Single(part);
    }

    pub fn with_boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = boundary.into();
        self
    }

    pub fn encode(&self) -> Bytes {
        let (content_type, body) = match &self.body {
            Body::Empty => (None, None),
            Body::Single(part) => (Some(part.content_type.clone()), Some(part.body.clone())),
            Body::Multipart(parts) => (
                Some(format!(
                    "{MULTIPART_CONTENT_TYPE}; boundary={}",
                    self.boundary
                )),
                Some(encode_multipart(parts, &self.boundary)),
            ),
        };

        let mut out = BytesMut::with_capacity(256);
        out.put_slice(format!("{} {} HTTP/1.1\r\n", self.method, self.path).as_bytes());
        for (name, value) in &self.headers {
            let is_framing = name.eq_ignore_ascii_case("content-type")
                || name.eq_ignore_ascii_case("content-length");
            if is_framing && body.is_some() {
                continue;
            }
            out.put_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        if let (Some(content_type), Some(body)) = (content_type, &body) {
            out.put_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
            out.put_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        }
        out.put_slice(b"\r\n");
        if let Some(body) = body {
            out.put_slice(&body);
        }
        out.freeze()
    }

    pub async fn send(&self, stream: &mut Stream) -> Result<(), HttpError> {
        stream.write(&self.encode()).await?;
        stream.flush().await?;
        Ok(())
    }
}

fn encode_multipart(parts: &[Part], boundary: &str) -> Bytes {
    if parts.is_empty() {
        return Bytes::new();
    }
    let mut out = BytesMut::new();
    for part in parts {
        out.put_slice(format!("--{boundary}\r\n").as_bytes());
        let mut disposition = "Content-Disposition: form-data".to_string();
        if let Some(name) = &part.name {
            disposition.push_str(&format!("; name=\"{name}\""));
        }
        if let Some(filename) = &part.filename {
            disposition.push_str(&format!("; filename=\"{filename}\""));
        }
        out.put_slice(disposition.as_bytes());
        out.put_slice(b"\r\n");
        out.put_slice(format!("Content-Type: {}\r\n\r\n", part.content_type).as_bytes());
        out.put_slice(&part.body);
        out.put_slice(b"\r\n");
    }
    out.put_slice(format!("--{boundary}--\r\n").as_bytes());
    out.freeze()
}

fn new_boundary() -> String {
    let token: u64 = rand::thread_rng().r#gen();
    format!("----camesp{token:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(bytes: &Bytes) -> String {
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    #[test]
    fn get_without_body_keeps_header_order() {
        let mut request = HttpRequest::new(Method::Get, "/ip");
        request.set_header("Host", "api.infoip.io");
        request.set_header("Accept", "*/*");
        request.set_header("Connection", "keep-alive");
        request.set_header("accept", "text/plain");

        assert_eq!(
            text(&request.encode()),
            "GET /ip HTTP/1.1\r\nHost: api.infoip.io\r\nAccept: text/plain\r\nConnection: keep-alive\r\n\r\n"
        );
    }

    #[test]
    fn json_body_sets_type_and_length() {
        let mut request = HttpRequest::new(Method::Post, "/notify");
        request.set_header("Host", "hub.local");
        request.set_content(Part::json(r#"{"on":true}"#));

        let encoded = text(&request.encode());
        assert!(encoded.starts_with("POST /notify HTTP/1.1\r\nHost: hub.local\r\n"));
        assert!(encoded.contains("Content-Type: application/json\r\n"));
        assert!(encoded.contains("Content-Length: 11\r\n"));
        assert!(encoded.ends_with("\r\n\r\n{\"on\":true}"));
    }

    #[test]
    fn multipart_body_frames_each_part() {
        let mut request = HttpRequest::new(Method::Post, "/upload").with_boundary("XYZ");
        request.add_part(Part::text("device", "esp32cam"));
        request.add_part(Part::file("shot", "shot.jpg", "image/jpeg", vec![0xFF, 0xD8]));

        let encoded = request.encode();
        let expected_body = b"--XYZ\r\nContent-Disposition: form-data; name=\"device\"\r\nContent-Type: text/plain\r\n\r\nesp32cam\r\n--XYZ\r\nContent-Disposition: form-data; name=\"shot\"; filename=\"shot.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8\r\n--XYZ--\r\n";
        assert!(encoded.ends_with(expected_body));
        let head = String::from_utf8_lossy(&encoded[..encoded.len() - expected_body.len()]);
        assert!(head.contains("Content-Type: multipart/form-data; boundary=XYZ\r\n"));
        assert!(head.contains(&format!("Content-Length: {}\r\n", expected_body.len())));
    }

    #[test]
    fn caller_framing_headers_are_replaced_when_body_present() {
        let mut request = HttpRequest::new(Method::Post, "/").with_boundary("B");
        request.set_header("Content-Type", MULTIPART_CONTENT_TYPE);
        request.add_part(Part::text("a", "1"));
        let encoded = text(&request.encode());
        assert_eq!(encoded.matches("Content-Type: multipart").count(), 1);
        assert!(encoded.contains("boundary=B"));
    }

    #[test]
    fn method_parsing_is_strict() {
        assert_eq!("GET".parse::<Method>().ok(), Some(Method::Get));
        assert_eq!("POST".parse::<Method>().ok(), Some(Method::Post));
        assert!("PUT".parse::<Method>().is_err());
        assert!("get".parse::<Method>().is_err());
    }
}
