//! TCP handshake transport.

use async_trait::async_trait;
use reqwest::Url;
use tokio::net::TcpStream;

use super::{Completion, ProbeError, Transport};

/// Opens a TCP connection to the URL's host and port and closes it again.
///
/// The completed handshake is the signal; nothing is sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, url: &Url) -> Result<Completion, ProbeError> {
        let host = url
            .host_str()
            .ok_or_else(|| ProbeError::InvalidUrl(url.to_string(), "missing host".to_string()))?;
        // IPv6 literals come back bracketed
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = url.port_or_known_default().unwrap_or(80);

        TcpStream::connect((host, port))
            .await
            .map_err(|e| ProbeError::Network(format!("failed to connect to {}:{}: {}", host, port, e)))?;

        Ok(Completion::default())
    }
}
