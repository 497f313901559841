//! Minimal HTTP/1.1 client side: URL parsing, request encoding, response
//! decoding with the acknowledged chunk rounds, and the client that ties
//! them to a transport.

use std::io;

use thiserror::Error;

pub mod client;
pub mod request;
pub mod response;
pub mod url;

pub use client::{HttpClient, RequestBody};
pub use request::{HttpRequest, Method, Part};
pub use response::HttpResponse;
pub use self::url::ParsedUrl;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("connection closed before a response arrived")]
    Closed,
    #[error("unsupported method {0}")]
    UnsupportedMethod(String),
}
