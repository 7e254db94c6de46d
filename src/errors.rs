use crate::data_sync::transport::TransportError;
use crate::storage::CheckpointError;

#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("no live endpoint for source {source_id}")]
    NoLiveEndpoint { source_id: String },
    #[error("invalid block range {from_block}..={to_block}")]
    InvalidRange { from_block: u64, to_block: u64 },
    #[error("could not read head block of {source_id}: {error}")]
    HeadUnavailable { source_id: String, error: TransportError },
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}
