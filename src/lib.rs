// Layers
pub mod data_sync; // Data Layer: endpoint pool, range harvester, collaborators, harvest service
pub mod logic; // Logic Layer: payload decoding, windows, aggregate fold
pub mod storage; // Checkpoint stores for the aggregate document
pub mod api; // Report server

// Common utilities and types
pub mod errors;
pub mod utils;

// Re-export key components from each layer
pub use data_sync::{
    AppConfig, EndpointPool, FailureKind, HarvestConfig, HarvestService, HarvestServiceBuilder, PriceFeed, RangeHarvester,
    RunOptions, RunReport, ScanOutcome, ScanTuning, ServerConfig, SourceDescriptor, TransportError,
};
pub use errors::HarvestError;
pub use logic::{AggregateState, BlockGap, ChainResult, DecodedEvent, TrackedSlot, WindowSummary, decode_swap_volume, recompute_totals};
pub use storage::{CheckpointError, CheckpointStore, JsonFileStore, MemoryStore};
