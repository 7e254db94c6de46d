//! Pure computation: payload decoding, window arithmetic and the aggregate fold.
//! Nothing in here touches the network or the disk.

pub mod aggregate;
pub mod decoder;
pub mod windows;

pub use aggregate::{AggregateState, BlockGap, ChainResult, LiquiditySnapshot, Totals, WindowSummary, recompute_totals};
pub use decoder::{DecodedEvent, SwapAmounts, TrackedSlot, decode_raw_volume, decode_swap_volume, scale_units};
pub use windows::{WindowBounds, WindowConfig, events_since, window_start};
