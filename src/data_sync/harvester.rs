use super::endpoint_pool::{EndpointPool, LiveEndpoint};
use super::source::{ScanTuning, SourceDescriptor};
use super::transport::{FailureKind, LogQuery, RawLog};
use crate::errors::HarvestError;
use crate::logic::{BlockGap, DecodedEvent, decode_swap_volume};
use crate::utils::constants::SWAP_EVENT_TOPIC;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Range-class failures in a row before the chunk size is halved
pub const RANGE_FAILURES_BEFORE_SHRINK: u32 = 3;

/// Failures in a row before moving to the next endpoint
pub const FAILURES_BEFORE_ROTATE: u32 = 2;

/// What the scan loop should do after a failed chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Back off, then query the same chunk again
    Retry,
    /// Chunk size was halved; query again right away
    RetrySmaller,
    /// Switch to the next candidate endpoint
    Rotate,
    /// Give up on the current chunk and record it as a gap
    Abandon,
}

/// Cursor and failure bookkeeping of a single scan.
///
/// Pure state machine: the async driver feeds it outcomes and it decides the
/// next step. The range counter and the general counter never reset each other;
/// only progress resets both. A halving caused by a refused span caps the chunk
/// size for the rest of the scan, so an endpoint switch never restores it.
#[derive(Debug, Clone)]
pub struct ScanState {
    next_from: u64,
    to_block: u64,
    done: bool,
    max_range: u64,
    min_range: u64,
    ceiling: u64,
    rotation_range_reset: u64,
    /// Upper bound for the chunk size restored on rotation
    span_limit: u64,
    max_stalled_attempts: u32,
    failures: u32,
    range_failures: u32,
    stalled: u32,
    cycles_since_progress: u32,
}

impl ScanState {
    pub fn new(tuning: &ScanTuning, from_block: u64, to_block: u64) -> Self {
        let min_range = tuning.min_range.max(1);
        let ceiling = tuning.initial_range.max(min_range);
        Self {
            next_from: from_block,
            to_block,
            done: from_block > to_block,
            max_range: ceiling,
            min_range,
            ceiling,
            rotation_range_reset: tuning.rotation_range_reset,
            span_limit: ceiling,
            max_stalled_attempts: tuning.max_stalled_attempts.max(1),
            failures: 0,
            range_failures: 0,
            stalled: 0,
            cycles_since_progress: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn next_from(&self) -> u64 {
        self.next_from
    }

    pub fn max_range(&self) -> u64 {
        self.max_range
    }

    pub fn span_limit(&self) -> u64 {
        self.span_limit
    }

    /// Failed attempts since the last accepted chunk
    pub fn stalled(&self) -> u32 {
        self.stalled
    }

    /// Inclusive bounds of the chunk to query next
    pub fn current_chunk(&self) -> (u64, u64) {
        let chunk_to = self.next_from.saturating_add(self.max_range).min(self.to_block);
        (self.next_from, chunk_to)
    }

    fn advance_past_chunk(&mut self) {
        let (_, chunk_to) = self.current_chunk();
        if chunk_to >= self.to_block {
            self.done = true;
        } else {
            self.next_from = chunk_to + 1;
        }
        self.failures = 0;
        self.range_failures = 0;
        self.stalled = 0;
        self.cycles_since_progress = 0;
    }

    /// The current chunk was fetched
    pub fn on_success(&mut self) {
        self.advance_past_chunk();
    }

    pub fn on_failure(&mut self, kind: FailureKind) -> FailureAction {
        self.failures += 1;
        self.stalled = self.stalled.saturating_add(1);

        if self.stalled >= self.max_stalled_attempts && self.cycles_since_progress > 0 {
            return FailureAction::Abandon;
        }

        if kind.is_range_class() {
            self.range_failures += 1;
            if self.range_failures >= RANGE_FAILURES_BEFORE_SHRINK {
                self.range_failures = 0;
                if self.max_range > self.min_range {
                    self.max_range = (self.max_range / 2).max(self.min_range);
                    if kind == FailureKind::RangeTooLarge {
                        self.span_limit = self.span_limit.min(self.max_range);
                    }
                    return FailureAction::RetrySmaller;
                }
            }
        }

        if self.failures >= FAILURES_BEFORE_ROTATE {
            self.failures = 0;
            return FailureAction::Rotate;
        }
        FailureAction::Retry
    }

    /// An endpoint switch happened. `wrapped` when the candidate list was
    /// exhausted and the search started over.
    pub fn on_rotated(&mut self, wrapped: bool) {
        self.failures = 0;
        let restored = self.rotation_range_reset.min(self.ceiling).min(self.span_limit);
        self.max_range = self.max_range.max(restored);
        if wrapped {
            self.cycles_since_progress += 1;
        }
    }

    /// Skip the current chunk, returning the blocks left uncovered
    pub fn abandon_chunk(&mut self) -> BlockGap {
        let (from_block, to_block) = self.current_chunk();
        self.advance_past_chunk();
        BlockGap { from_block, to_block }
    }
}

/// Everything one scan produced
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Ascending by block number
    pub events: Vec<DecodedEvent>,
    pub gaps: Vec<BlockGap>,
    pub final_chunk_size: u64,
    pub chunks: u32,
    pub rotations: u32,
}

impl ScanOutcome {
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }
}

/// Adaptive, failover-aware `eth_getLogs` scanner
#[derive(Clone)]
pub struct RangeHarvester {
    pool: EndpointPool,
}

impl RangeHarvester {
    pub fn new(pool: EndpointPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &EndpointPool {
        &self.pool
    }

    /// Scan `[from_block, to_block]` starting on the first live candidate
    pub async fn scan(&self, source: &SourceDescriptor, from_block: u64, to_block: u64) -> Result<ScanOutcome, HarvestError> {
        let endpoint = self.pool.first_live(&source.rpc_urls).await.ok_or_else(|| HarvestError::NoLiveEndpoint {
            source_id: source.id.clone(),
        })?;
        self.scan_from(source, endpoint, from_block, to_block).await
    }

    /// Scan `[from_block, to_block]` starting on an endpoint the caller already
    /// found live. Calls are strictly sequential; the loop owns all its state.
    pub async fn scan_from(
        &self,
        source: &SourceDescriptor,
        endpoint: LiveEndpoint,
        from_block: u64,
        to_block: u64,
    ) -> Result<ScanOutcome, HarvestError> {
        if from_block > to_block {
            return Err(HarvestError::InvalidRange { from_block, to_block });
        }

        let started = Instant::now();
        let total_blocks = (to_block - from_block).saturating_add(1);
        let mut active = endpoint;
        let mut state = ScanState::new(&source.scan, from_block, to_block);
        let mut outcome = ScanOutcome::default();
        let mut next_report_pct = 10;

        info!("Fetching swaps for {}: {} blocks ({}..={}) via {}", source.id, total_blocks, from_block, to_block, active.url);

        while !state.is_done() {
            let (chunk_from, chunk_to) = state.current_chunk();
            let query = LogQuery {
                address: source.pool_address,
                topic0: SWAP_EVENT_TOPIC,
                from_block: chunk_from,
                to_block: chunk_to,
            };

            match active.connection.get_logs(&query).await {
                Ok(logs) => {
                    outcome.events.extend(decode_chunk(source, logs, chunk_from, chunk_to));
                    outcome.chunks += 1;
                    state.on_success();

                    let done_pct = ((chunk_to - from_block) as u128 + 1) * 100 / total_blocks as u128;
                    if done_pct >= next_report_pct || state.is_done() {
                        info!("{}: {}% - {} swaps", source.id, done_pct, outcome.events.len());
                        next_report_pct = (done_pct / 10 + 1) * 10;
                    }

                    tokio::task::yield_now().await;
                    sleep(source.scan.pacing_delay()).await;
                }
                Err(e) => {
                    debug!("{}: chunk {}..={} failed on {}: {}", source.id, chunk_from, chunk_to, active.url, e);

                    match state.on_failure(e.kind) {
                        FailureAction::RetrySmaller => {
                            info!("{}: Reducing range to {}", source.id, state.max_range());
                            continue;
                        }
                        FailureAction::Abandon => {
                            let gap = state.abandon_chunk();
                            error!(
                                "{}: Too many failures, skipping blocks {}..={} (last error: {})",
                                source.id, gap.from_block, gap.to_block, e
                            );
                            outcome.gaps.push(gap);
                            continue;
                        }
                        FailureAction::Rotate => match self.pool.next_live(&source.rpc_urls, active.index).await {
                            Some(rotation) => {
                                state.on_rotated(rotation.wrapped);
                                if rotation.wrapped {
                                    warn!("{}: Cycling through RPCs again", source.id);
                                }
                                info!(
                                    "{}: Switching to RPC #{}: {}",
                                    source.id,
                                    rotation.endpoint.index + 1,
                                    rotation.endpoint.url
                                );
                                active = rotation.endpoint;
                                outcome.rotations += 1;
                                continue;
                            }
                            None => {
                                warn!("{}: No candidate endpoint answered, staying on {}", source.id, active.url);
                                state.on_rotated(true);
                            }
                        },
                        FailureAction::Retry => {}
                    }

                    sleep(source.scan.backoff(state.stalled())).await;
                }
            }
        }

        outcome.final_chunk_size = state.max_range();
        info!(
            "{}: Done - {} total swaps in {} chunks, {} rotations, {} gaps, {:?}",
            source.id,
            outcome.events.len(),
            outcome.chunks,
            outcome.rotations,
            outcome.gaps.len(),
            started.elapsed()
        );
        Ok(outcome)
    }
}

/// Decode one chunk's logs, dropping anything the node returned outside the
/// requested bounds so chunks can never overlap
fn decode_chunk(source: &SourceDescriptor, mut logs: Vec<RawLog>, chunk_from: u64, chunk_to: u64) -> Vec<DecodedEvent> {
    logs.retain(|log| log.block_number >= chunk_from && log.block_number <= chunk_to);
    logs.sort_by_key(|log| log.block_number);
    logs.into_iter()
        .map(|log| DecodedEvent {
            block_number: log.block_number,
            volume: decode_swap_volume(&log.data, source.tracked_slot, source.tracked_decimals),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuning(initial_range: u64, min_range: u64) -> ScanTuning {
        ScanTuning {
            initial_range,
            min_range,
            rotation_range_reset: min_range,
            max_stalled_attempts: 30,
            ..ScanTuning::default()
        }
    }

    #[test]
    fn test_chunks_cover_range_exactly() {
        let mut state = ScanState::new(&tuning(99, 10), 0, 249);
        let mut chunks = Vec::new();
        while !state.is_done() {
            chunks.push(state.current_chunk());
            state.on_success();
        }
        assert_eq!(chunks, vec![(0, 99), (100, 199), (200, 249)]);
    }

    #[test]
    fn test_single_block_range() {
        let mut state = ScanState::new(&tuning(100, 10), 42, 42);
        assert_eq!(state.current_chunk(), (42, 42));
        state.on_success();
        assert!(state.is_done());
    }

    #[test]
    fn test_range_at_end_of_u64() {
        let mut state = ScanState::new(&tuning(100, 10), u64::MAX - 5, u64::MAX);
        assert_eq!(state.current_chunk(), (u64::MAX - 5, u64::MAX));
        state.on_success();
        assert!(state.is_done());
    }

    #[test]
    fn test_three_range_failures_halve() {
        let mut state = ScanState::new(&tuning(1_000, 100), 0, 10_000);
        assert_eq!(state.on_failure(FailureKind::RangeTooLarge), FailureAction::Retry);
        assert_eq!(state.on_failure(FailureKind::RangeTooLarge), FailureAction::Rotate);
        state.on_rotated(false);
        assert_eq!(state.on_failure(FailureKind::RangeTooLarge), FailureAction::RetrySmaller);
        assert_eq!(state.max_range(), 500);
        // the cursor did not move
        assert_eq!(state.next_from(), 0);
    }

    #[test]
    fn test_halving_stops_at_floor() {
        let mut state = ScanState::new(&tuning(1_000, 300), 0, 10_000);
        let mut seen = Vec::new();
        for _ in 0..30 {
            if state.on_failure(FailureKind::Timeout) == FailureAction::Rotate {
                state.on_rotated(false);
            }
            seen.push(state.max_range());
        }
        assert!(seen.iter().all(|range| *range >= 300));
        assert_eq!(state.max_range(), 300);
        assert!(seen.contains(&500));
    }

    #[test]
    fn test_general_failures_rotate_without_shrinking() {
        let mut state = ScanState::new(&tuning(1_000, 100), 0, 10_000);
        assert_eq!(state.on_failure(FailureKind::Unreachable), FailureAction::Retry);
        assert_eq!(state.on_failure(FailureKind::Unreachable), FailureAction::Rotate);
        state.on_rotated(false);
        assert_eq!(state.on_failure(FailureKind::Unknown), FailureAction::Retry);
        assert_eq!(state.on_failure(FailureKind::Malformed), FailureAction::Rotate);
        assert_eq!(state.max_range(), 1_000);
    }

    #[test]
    fn test_general_failure_does_not_reset_range_counter() {
        let mut state = ScanState::new(&tuning(1_000, 100), 0, 10_000);
        state.on_failure(FailureKind::RateLimited);
        state.on_failure(FailureKind::Unreachable);
        state.on_rotated(false);
        state.on_failure(FailureKind::RateLimited);
        assert_eq!(state.on_failure(FailureKind::RateLimited), FailureAction::RetrySmaller);
    }

    #[test]
    fn test_success_resets_counters() {
        let mut state = ScanState::new(&tuning(1_000, 100), 0, 10_000);
        state.on_failure(FailureKind::RangeTooLarge);
        state.on_failure(FailureKind::RangeTooLarge);
        state.on_success();
        assert_eq!(state.stalled(), 0);
        assert_eq!(state.on_failure(FailureKind::RangeTooLarge), FailureAction::Retry);
    }

    #[test]
    fn test_rotation_restores_range_up_to_ceiling() {
        let mut state = ScanState::new(
            &ScanTuning { initial_range: 1_000, min_range: 100, rotation_range_reset: 5_000, ..ScanTuning::default() },
            0,
            10_000,
        );
        for _ in 0..3 {
            state.on_failure(FailureKind::Timeout);
        }
        assert_eq!(state.max_range(), 500);
        state.on_rotated(false);
        assert_eq!(state.max_range(), 1_000);
    }

    #[test]
    fn test_rotation_never_restores_a_refused_chunk_size() {
        let mut state = ScanState::new(&ScanTuning::default(), 0, 100_000);
        let mut ranges = Vec::new();
        // the node refuses any chunk size above 999
        while state.max_range() > 999 {
            if state.on_failure(FailureKind::RangeTooLarge) == FailureAction::Rotate {
                state.on_rotated(true);
            }
            ranges.push(state.max_range());
            assert!(ranges.len() < 30, "no convergence: {:?}", ranges);
        }
        assert_eq!(ranges, vec![5_000, 5_000, 2_500, 2_500, 2_500, 1_250, 1_250, 1_250, 625]);
        assert_eq!(state.span_limit(), 625);
        assert!(state.stalled() < ScanTuning::default().max_stalled_attempts);

        state.on_success();
        state.on_rotated(true);
        assert_eq!(state.max_range(), 625);
    }

    #[test]
    fn test_rate_limit_shrink_is_restored_on_rotation() {
        let mut state = ScanState::new(&ScanTuning::default(), 0, 100_000);
        state.on_failure(FailureKind::RateLimited);
        state.on_failure(FailureKind::RateLimited);
        state.on_rotated(false);
        assert_eq!(state.on_failure(FailureKind::RateLimited), FailureAction::RetrySmaller);
        assert_eq!(state.max_range(), 2_500);
        state.on_failure(FailureKind::RateLimited);
        state.on_failure(FailureKind::RateLimited);
        assert_eq!(state.on_failure(FailureKind::RateLimited), FailureAction::RetrySmaller);
        assert_eq!(state.max_range(), 1_250);
        state.on_rotated(false);
        assert_eq!(state.max_range(), 2_000);
        assert_eq!(state.span_limit(), 5_000);
    }

    #[test]
    fn test_escalation_needs_a_full_cycle() {
        let mut state = ScanState::new(
            &ScanTuning { initial_range: 100, min_range: 100, max_stalled_attempts: 4, ..ScanTuning::default() },
            0,
            1_000,
        );
        let mut actions = Vec::new();
        for _ in 0..6 {
            let action = state.on_failure(FailureKind::Unreachable);
            if action == FailureAction::Rotate {
                // list not yet exhausted
                state.on_rotated(false);
            }
            actions.push(action);
        }
        assert!(!actions.contains(&FailureAction::Abandon));

        state.on_rotated(true);
        assert_eq!(state.on_failure(FailureKind::Unreachable), FailureAction::Abandon);
        let gap = state.abandon_chunk();
        assert_eq!(gap, BlockGap { from_block: 0, to_block: 100 });
        assert_eq!(state.next_from(), 101);
        assert_eq!(state.stalled(), 0);
    }
}
