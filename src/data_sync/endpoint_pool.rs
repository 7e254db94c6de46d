use super::transport::{Connection, Connector};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// An endpoint that answered its probe
#[derive(Clone)]
pub struct LiveEndpoint {
    pub connection: Connection,
    /// Position in the source's candidate list
    pub index: usize,
    pub url: String,
}

impl fmt::Debug for LiveEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveEndpoint").field("index", &self.index).field("url", &self.url).finish()
    }
}

/// Result of moving to another candidate
#[derive(Debug, Clone)]
pub struct Rotation {
    pub endpoint: LiveEndpoint,
    /// The search ran past the end of the list and started over from the top
    pub wrapped: bool,
}

/// Probes candidate endpoints. Holds no per-scan state, so one pool can serve
/// any number of sources.
#[derive(Clone)]
pub struct EndpointPool {
    connector: Arc<dyn Connector>,
    probe_timeout: Duration,
}

impl EndpointPool {
    pub fn new(connector: Arc<dyn Connector>, probe_timeout: Duration) -> Self {
        Self { connector, probe_timeout }
    }

    /// Single liveness check: `eth_chainId` within the probe timeout. No retries.
    pub async fn probe(&self, url: &str) -> Option<Connection> {
        let connection = match self.connector.connect(url) {
            Ok(connection) => connection,
            Err(e) => {
                debug!("Probe of {} failed to connect: {}", url, e);
                return None;
            }
        };

        match timeout(self.probe_timeout, connection.chain_id()).await {
            Ok(Ok(chain_id)) => {
                debug!("Endpoint {} is live (chain id {})", url, chain_id);
                Some(connection)
            }
            Ok(Err(e)) => {
                debug!("Probe of {} failed: {}", url, e);
                None
            }
            Err(_) => {
                debug!("Probe of {} timed out after {:?}", url, self.probe_timeout);
                None
            }
        }
    }

    /// First candidate, in list order, that passes the probe
    pub async fn first_live(&self, urls: &[String]) -> Option<LiveEndpoint> {
        for (index, url) in urls.iter().enumerate() {
            if let Some(connection) = self.probe(url).await {
                return Some(LiveEndpoint { connection, index, url: url.clone() });
            }
        }
        None
    }

    /// Next live candidate after `current_index`, wrapping to the start of the
    /// list. The current endpoint is tried last. `None` only if every candidate
    /// failed its probe.
    pub async fn next_live(&self, urls: &[String], current_index: usize) -> Option<Rotation> {
        let len = urls.len();
        for step in 1..=len {
            let index = (current_index + step) % len;
            if let Some(connection) = self.probe(&urls[index]).await {
                return Some(Rotation {
                    endpoint: LiveEndpoint { connection, index, url: urls[index].clone() },
                    wrapped: index <= current_index,
                });
            }
        }
        None
    }
}
