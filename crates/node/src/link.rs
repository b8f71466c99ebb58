//! Network connectivity capability. The device has no WiFi stack of its own
//! to ask, so "connected" means the backend accepts a TCP connection.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::state::SharedStatus;

#[async_trait]
pub trait Link: Send + Sync {
    async fn is_up(&self) -> bool;
    /// Try to (re)establish connectivity; returns the resulting state.
    async fn acquire(&self) -> bool;
    async fn mark_down(&self);
}

/// TCP reachability probe against the backend host.
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
    status: SharedStatus,
}

impl TcpProbe {
    pub fn from_url(url: &str, timeout: Duration, status: SharedStatus) -> Result<Self> {
        let parsed = reqwest::Url::parse(url).with_context(|| format!("invalid backend url '{url}'"))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| anyhow!("backend url '{url}' has no host"))?;
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| anyhow!("backend url '{url}' has no port"))?;
        Ok(Self {
            addr: format!("{host}:{port}"),
            timeout,
            status,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Link for TcpProbe {
    async fn is_up(&self) -> bool {
        self.status.read().await.link_up
    }

    async fn acquire(&self) -> bool {
        let up = match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                warn!(addr = %self.addr, "link probe failed: {e}");
                false
            }
            Err(_) => {
                warn!(addr = %self.addr, "link probe timed out after {:?}", self.timeout);
                false
            }
        };

        let mut st = self.status.write().await;
        if up && !st.link_up {
            info!(addr = %self.addr, "link up");
        }
        st.set_link(up);
        up
    }

    async fn mark_down(&self) {
        self.status.write().await.set_link(false);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state;
    use tokio::net::TcpListener;

    const T: Duration = Duration::from_secs(2);

    #[test]
    fn addr_from_url_with_port() {
        let p = TcpProbe::from_url("http://10.0.0.5:5000/api", T, state::shared()).unwrap();
        assert_eq!(p.addr(), "10.0.0.5:5000");
    }

    #[test]
    fn addr_from_url_default_port() {
        let p = TcpProbe::from_url("https://hub.example.org", T, state::shared()).unwrap();
        assert_eq!(p.addr(), "hub.example.org:443");
    }

    #[test]
    fn rejects_garbage_url() {
        assert!(TcpProbe::from_url("not a url", T, state::shared()).is_err());
    }

    #[tokio::test]
    async fn acquire_against_listener_sets_link_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let status = state::shared();
        let p = TcpProbe::from_url(&format!("http://127.0.0.1:{port}"), T, status.clone()).unwrap();

        assert!(!p.is_up().await);
        assert!(p.acquire().await);
        assert!(p.is_up().await);
        assert!(status.read().await.link_up);

        p.mark_down().await;
        assert!(!p.is_up().await);
    }

    #[tokio::test]
    async fn acquire_against_closed_port_stays_down() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let p = TcpProbe::from_url(&format!("http://127.0.0.1:{port}"), T, state::shared()).unwrap();
        assert!(!p.acquire().await);
        assert!(!p.is_up().await);
    }
}
