use super::source::SourceDescriptor;
use super::transport::{Connection, TransportError};
use crate::logic::{TrackedSlot, scale_units};
use crate::utils::constants::IUniswapV2Pair;
use alloy_primitives::{Bytes, U256};
use alloy_sol_types::SolCall;
use tracing::{error, warn};

/// getReserves call data for a pair
pub fn get_reserves_call_data() -> Bytes {
    IUniswapV2Pair::getReservesCall {}.abi_encode().into()
}

/// Decode `(reserve0, reserve1)` from getReserves return data
pub fn decode_reserves(return_data: &[u8]) -> Option<(U256, U256)> {
    match IUniswapV2Pair::getReservesCall::abi_decode_returns(return_data) {
        Ok(reserves) => Some((U256::from(reserves.reserve0), U256::from(reserves.reserve1))),
        Err(e) => {
            warn!("Failed to decode reserves: {}", e);
            None
        }
    }
}

/// Pool reserves as `(tracked, paired)` in whole-token units.
///
/// Any failure means "unknown"; reserves never hold up a scan.
pub async fn get_reserves(connection: &Connection, source: &SourceDescriptor) -> Option<(f64, f64)> {
    match fetch_raw_reserves(connection, source).await {
        Ok(Some((reserve0, reserve1))) => {
            let (tracked, paired) = match source.tracked_slot {
                TrackedSlot::First => (reserve0, reserve1),
                TrackedSlot::Second => (reserve1, reserve0),
            };
            Some((
                scale_units(tracked, source.tracked_decimals),
                scale_units(paired, source.paired_decimals),
            ))
        }
        Ok(None) => None,
        Err(e) => {
            error!("Error getting liquidity for {}: {}", source.id, e);
            None
        }
    }
}

async fn fetch_raw_reserves(connection: &Connection, source: &SourceDescriptor) -> Result<Option<(U256, U256)>, TransportError> {
    let return_data = connection.call(source.pool_address, get_reserves_call_data()).await?;
    Ok(decode_reserves(&return_data))
}
