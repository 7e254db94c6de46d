use crate::logic::decoder::DecodedEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Swap count and volume over one look-back window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub swap_count: u64,
    pub volume_native: f64,
    pub volume_usd: Option<f64>,
}

impl WindowSummary {
    pub fn from_events(events: &[DecodedEvent], price: Option<f64>) -> Self {
        let volume_native: f64 = events.iter().map(|event| event.volume).sum();
        Self {
            swap_count: events.len() as u64,
            volume_native,
            volume_usd: price.map(|price| volume_native * price),
        }
    }

    fn accumulate(&mut self, other: &WindowSummary) {
        self.swap_count += other.swap_count;
        self.volume_native += other.volume_native;
        if let Some(usd) = other.volume_usd {
            self.volume_usd = Some(self.volume_usd.unwrap_or(0.0) + usd);
        }
    }
}

/// Reserves of the pool at scan time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiquiditySnapshot {
    pub tracked_reserve: Option<f64>,
    pub paired_asset: String,
    pub paired_reserve: Option<f64>,
    pub usd: Option<f64>,
}

impl LiquiditySnapshot {
    /// Both sides of a balanced pool are worth the tracked side, hence the factor two.
    pub fn new(paired_asset: &str, reserves: Option<(f64, f64)>, price: Option<f64>) -> Self {
        let (tracked_reserve, paired_reserve) = match reserves {
            Some((tracked, paired)) => (Some(tracked), Some(paired)),
            None => (None, None),
        };
        Self {
            tracked_reserve,
            paired_asset: paired_asset.to_string(),
            paired_reserve,
            usd: tracked_reserve.zip(price).map(|(tracked, price)| tracked * price * 2.0),
        }
    }
}

/// Inclusive block interval the harvester had to give up on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockGap {
    pub from_block: u64,
    pub to_block: u64,
}

impl BlockGap {
    pub fn len(&self) -> u64 {
        self.to_block - self.from_block + 1
    }

    pub fn is_empty(&self) -> bool {
        self.to_block < self.from_block
    }
}

/// Everything learned about one source in one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainResult {
    pub name: String,
    pub pool_address: String,
    pub current_block: u64,
    pub liquidity: LiquiditySnapshot,
    #[serde(rename = "1_month")]
    pub short_window: WindowSummary,
    #[serde(rename = "3_months")]
    pub long_window: WindowSummary,
    #[serde(default)]
    pub scanned_from: u64,
    /// Price the USD figures of this result were computed with
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub unresolved_gaps: Vec<BlockGap>,
}

impl ChainResult {
    pub fn is_complete(&self) -> bool {
        self.unresolved_gaps.is_empty()
    }

    pub fn missing_blocks(&self) -> u64 {
        self.unresolved_gaps.iter().map(BlockGap::len).sum()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    #[serde(rename = "1_month")]
    pub short_window: WindowSummary,
    #[serde(rename = "3_months")]
    pub long_window: WindowSummary,
}

impl Totals {
    /// Sum over all sources. Iteration follows the map's key order so the float
    /// sums come out bit-identical on every recomputation.
    pub fn fold(chains: &BTreeMap<String, ChainResult>) -> Self {
        chains.values().fold(Totals::default(), |mut totals, chain| {
            totals.short_window.accumulate(&chain.short_window);
            totals.long_window.accumulate(&chain.long_window);
            totals
        })
    }
}

/// The persisted document: per-source results and their totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateState {
    pub generated_at: Option<DateTime<Utc>>,
    pub price: Option<f64>,
    #[serde(default)]
    pub chains: BTreeMap<String, ChainResult>,
    #[serde(default)]
    pub totals: Totals,
}

impl AggregateState {
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.chains.contains_key(source_id)
    }

    /// Store one source's result and refresh the derived fields
    pub fn insert_result(&mut self, source_id: &str, result: ChainResult, price: Option<f64>, now: DateTime<Utc>) {
        self.chains.insert(source_id.to_string(), result);
        self.price = price;
        self.generated_at = Some(now);
        self.totals = Totals::fold(&self.chains);
    }

    pub fn totals_consistent(&self) -> bool {
        self.totals == Totals::fold(&self.chains)
    }
}

/// Rebuild the totals from the per-source map alone
pub fn recompute_totals(mut state: AggregateState) -> AggregateState {
    state.totals = Totals::fold(&state.chains);
    state
}
