//! HTTP transport and server-side status check.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client, Url};
use serde::Serialize;

use super::{normalize_url, Completion, ProbeError, Transport};

/// Timeout for the status-aware server-side check.
pub const SERVER_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Issues a `HEAD` request and reports whether it completed.
///
/// Redirects are not followed: the first response already proves the host
/// answered. The status is recorded but the probe's policy decides what it
/// means.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, ProbeError> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self, url: &Url) -> Result<Completion, ProbeError> {
        let response = self
            .client
            .head(url.clone())
            .send()
            .await
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        Ok(Completion {
            status: Some(response.status().as_u16()),
        })
    }
}

/// Result of a status-aware check, as reported by `/api/check-server`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerCheck {
    pub status: &'static str,
    pub url: String,
    #[serde(rename = "statusCode", skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServerCheck {
    fn working(url: &str) -> Self {
        Self {
            status: "Working",
            url: url.to_string(),
            status_code: None,
            error: None,
        }
    }

    fn not_working(url: &str) -> Self {
        Self {
            status: "Not Working",
            url: url.to_string(),
            status_code: None,
            error: None,
        }
    }

    pub fn is_working(&self) -> bool {
        self.status == "Working"
    }
}

/// Check a server from this host, where status codes are visible.
///
/// Unlike the opaque probe this only reports `Working` for a 2xx response.
pub async fn check_server(client: &Client, address: &str, timeout: Duration) -> ServerCheck {
    let url = match normalize_url(address) {
        Ok(url) => url,
        Err(e) => {
            let mut check = ServerCheck::not_working(address);
            check.error = Some(e.to_string());
            return check;
        }
    };

    match client.head(url).timeout(timeout).send().await {
        Ok(response) if response.status().is_success() => ServerCheck::working(address),
        Ok(response) => {
            let mut check = ServerCheck::not_working(address);
            check.status_code = Some(response.status().as_u16());
            check
        }
        Err(e) => {
            tracing::warn!("Error checking server {}: {}", address, e);
            let mut check = ServerCheck::not_working(address);
            check.error = Some(if e.is_timeout() {
                format!("timed out after {:?}", timeout)
            } else {
                e.to_string()
            });
            check
        }
    }
}
