use std::io;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use super::{Connector, Stream};

/// Plain TCP, resolved through the system resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self, host: &str, port: u16) -> io::Result<Stream> {
        let socket = TcpStream::connect((host, port)).await?;
        socket.set_nodelay(true)?;
        debug!(host, port, "tcp connected");
        Ok(Stream::new(Box::new(socket), format!("{host}:{port}")))
    }
}
