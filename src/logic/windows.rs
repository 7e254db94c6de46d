use crate::logic::decoder::DecodedEvent;
use crate::utils::constants::SECONDS_PER_DAY;
use serde::{Deserialize, Serialize};

/// Look-back periods summarized for each source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowConfig {
    pub short_days: u64,
    pub long_days: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { short_days: 30, long_days: 90 }
    }
}

/// First block of each window for a given chain head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub head_block: u64,
    pub short_from: u64,
    pub long_from: u64,
}

impl WindowConfig {
    pub fn bounds(&self, head_block: u64, block_time_secs: f64) -> WindowBounds {
        WindowBounds {
            head_block,
            short_from: window_start(head_block, block_time_secs, self.short_days),
            long_from: window_start(head_block, block_time_secs, self.long_days),
        }
    }
}

pub fn blocks_per_day(block_time_secs: f64) -> u64 {
    if block_time_secs <= 0.0 {
        return 0;
    }
    (SECONDS_PER_DAY / block_time_secs).floor() as u64
}

/// `max(1, head - blocks_per_day * days)`, never past the head itself
pub fn window_start(head_block: u64, block_time_secs: f64, days: u64) -> u64 {
    let span = blocks_per_day(block_time_secs).saturating_mul(days);
    head_block.saturating_sub(span).max(1).min(head_block)
}

/// Events at or after `from_block`. `events` must be in ascending block order,
/// which is what the harvester yields.
pub fn events_since(events: &[DecodedEvent], from_block: u64) -> &[DecodedEvent] {
    let start = events.partition_point(|event| event.block_number < from_block);
    &events[start..]
}
