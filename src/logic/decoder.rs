use crate::utils::constants::{SWAP_PAYLOAD_HEX_LEN, WORD_HEX_LEN};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Which token slot of the pair holds the tracked asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TrackedSlot {
    /// token0
    First,
    /// token1
    Second,
}

/// A swap that has been reduced to the tracked asset volume
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedEvent {
    pub block_number: u64,
    pub volume: f64,
}

/// The four amount words of a Swap payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapAmounts {
    pub amount0_in: U256,
    pub amount1_in: U256,
    pub amount0_out: U256,
    pub amount1_out: U256,
}

impl SwapAmounts {
    /// Parse the hex payload of a Swap log. Returns `None` unless the payload is
    /// exactly four 32-byte words of hex, with or without a `0x` prefix.
    pub fn parse(payload: &str) -> Option<Self> {
        let data = payload.strip_prefix("0x").unwrap_or(payload);
        if data.len() != SWAP_PAYLOAD_HEX_LEN || !data.is_ascii() {
            return None;
        }

        let word = |i: usize| U256::from_str_radix(&data[i * WORD_HEX_LEN..(i + 1) * WORD_HEX_LEN], 16).ok();

        Some(Self {
            amount0_in: word(0)?,
            amount1_in: word(1)?,
            amount0_out: word(2)?,
            amount1_out: word(3)?,
        })
    }

    /// in + out of the tracked slot, in raw token units
    pub fn tracked_total(&self, slot: TrackedSlot) -> U256 {
        let (amount_in, amount_out) = match slot {
            TrackedSlot::First => (self.amount0_in, self.amount0_out),
            TrackedSlot::Second => (self.amount1_in, self.amount1_out),
        };
        amount_in.saturating_add(amount_out)
    }
}

/// Raw tracked volume of a Swap payload, zero for anything malformed.
pub fn decode_raw_volume(payload: &str, slot: TrackedSlot) -> U256 {
    SwapAmounts::parse(payload)
        .map(|amounts| amounts.tracked_total(slot))
        .unwrap_or(U256::ZERO)
}

/// Tracked volume of a Swap payload scaled by `decimals`.
///
/// Never fails: a record that can't be parsed counts as zero volume so one bad
/// log can't abort a scan.
pub fn decode_swap_volume(payload: &str, slot: TrackedSlot, decimals: u8) -> f64 {
    scale_units(decode_raw_volume(payload, slot), decimals)
}

/// Fixed-point token amount to a float in whole-token units
pub fn scale_units(value: U256, decimals: u8) -> f64 {
    if value.is_zero() {
        return 0.0;
    }
    let raw = value.to_string().parse::<f64>().unwrap_or(0.0);
    raw / 10f64.powi(decimals as i32)
}
