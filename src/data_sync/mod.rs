/// Data harvesting layer
///
/// Everything that talks to the outside world on behalf of a harvest run:
///
/// - JSON-RPC transport with failures classified at the boundary
/// - Endpoint pool probing candidate RPC URLs for liveness
/// - Adaptive range harvester scanning `eth_getLogs` in shrinking chunks
/// - Price and reserve collaborators
/// - The harvest service folding per-source results into the checkpointed aggregate

pub mod config;
pub mod endpoint_pool;
pub mod harvester;
pub mod mock_transport;
pub mod price;
pub mod reserves;
pub mod service;
pub mod source;
pub mod transport;


pub use config::{AppConfig, HarvestConfig, ServerConfig};
pub use endpoint_pool::{EndpointPool, LiveEndpoint, Rotation};
pub use harvester::{FailureAction, RangeHarvester, ScanOutcome, ScanState};
pub use price::{FixedPriceFeed, PriceFeed, TickerPriceFeed};
pub use reserves::get_reserves;
pub use service::{HarvestService, HarvestServiceBuilder, RunOptions, RunReport, should_scan};
pub use source::{ScanTuning, SourceDescriptor};
pub use transport::{Connection, Connector, FailureKind, HttpConnector, HttpRpcTransport, LogQuery, LogTransport, RawLog, TransportError};
