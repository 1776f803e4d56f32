//! TCP and HTTP probes

use async_trait::async_trait;
use reqwest::{redirect, Client};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use super::traits::{HttpProbe, PortDialer};
use crate::error::{Result, SupervisorError};

/// Plain TCP connect probe
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

#[async_trait]
impl PortDialer for TcpDialer {
    async fn dial(&self, host: &str, port: u16, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("connect to {}:{} failed: {}", host, port, e);
                false
            }
            Err(_) => {
                debug!("connect to {}:{} timed out after {:?}", host, port, timeout);
                false
            }
        }
    }
}

/// HTTP GET probe. Redirects are not followed, so the first status code is
/// the one compared against the expected result.
#[derive(Clone)]
pub struct ReqwestProbe {
    client: Client,
}

impl ReqwestProbe {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .user_agent(concat!("supervisor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn get_status(&self, url: &str, timeout: Duration) -> Result<u16> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| SupervisorError::Probe(format!("GET {url} failed: {e}")))?;
        Ok(resp.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(TcpDialer.dial("127.0.0.1", port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_dial_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!TcpDialer.dial("127.0.0.1", port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_http_probe_connection_refused_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = ReqwestProbe::new().unwrap();
        let result = probe
            .get_status(&format!("http://127.0.0.1:{port}/"), Duration::from_secs(2))
            .await;
        assert!(result.is_err());
    }
}
