use url::Url;
use url::form_urlencoded;

/// Schemes the parser recognises. Anything else leaves `protocol` empty.
const KNOWN_SCHEMES: &[&str] = &["http", "https"];

/// A URL split into the pieces the HTTP client needs.
///
/// Parsing never fails: unknown schemes and malformed input produce a value
/// whose `protocol` is `None`, and callers must check it before use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedUrl {
    pub protocol: Option<String>,
    pub host: Option<String>,
    /// Only set when the URL names a port that differs from the scheme default.
    pub port: Option<u16>,
    pub path: String,
    pub params: Option<Vec<(String, String)>>,
}

impl ParsedUrl {
    /// Re-encodes the query parameters, without the leading `?`.
    pub fn query_string(&self) -> Option<String> {
        let params = self.params.as_ref()?;
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            serializer.append_pair(key, value);
        }
        Some(serializer.finish())
    }

    /// Path with the query string appended when there is one.
    pub fn request_target(&self) -> String {
        match self.query_string() {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}

pub fn parse(raw: &str) -> ParsedUrl {
    let Ok(url) = Url::parse(raw.trim()) else {
        return ParsedUrl::default();
    };

    let protocol = KNOWN_SCHEMES
        .contains(&url.scheme())
        .then(|| url.scheme().to_string());
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_string);
    let path = match url.path() {
        "" => "/".to_string(),
        path => path.to_string(),
    };
    let params = url.query().map(|_| {
        url.query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect()
    });

    ParsedUrl {
        protocol,
        host,
        port: url.port(),
        path,
        params,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_http_url() {
        let parsed = parse("http://192.168.1.20:8080/motion/status?zone=2&on=1");
        assert_eq!(parsed.protocol.as_deref(), Some("http"));
        assert_eq!(parsed.host.as_deref(), Some("192.168.1.20"));
        assert_eq!(parsed.port, Some(8080));
        assert_eq!(parsed.path, "/motion/status");
        assert_eq!(
            parsed.params,
            Some(vec![
                ("zone".to_string(), "2".to_string()),
                ("on".to_string(), "1".to_string())
            ])
        );
        assert_eq!(parsed.request_target(), "/motion/status?zone=2&on=1");
    }

    #[test]
    fn default_port_and_root_path() {
        let parsed = parse("http://api.ipify.org");
        assert_eq!(parsed.port, None);
        assert_eq!(parsed.path, "/");
        assert_eq!(parsed.params, None);
        assert_eq!(parsed.request_target(), "/");
    }

    #[test]
    fn https_is_recognised_but_distinct() {
        let parsed = parse("https://example.com/x");
        assert_eq!(parsed.protocol.as_deref(), Some("https"));
        assert_eq!(parsed.host.as_deref(), Some("example.com"));
    }

    #[test]
    fn unknown_scheme_leaves_protocol_empty() {
        let parsed = parse("ftp://files.example.com/pub");
        assert_eq!(parsed.protocol, None);
    }

    #[test]
    fn malformed_input_leaves_protocol_empty() {
        for raw in ["", "not a url", "http://", "://missing.scheme"] {
            let parsed = parse(raw);
            assert_eq!(parsed.protocol, None, "input {raw:?}");
            assert_eq!(parsed.host, None, "input {raw:?}");
        }
    }
}
