use alloy_primitives::B256;
use alloy_sol_types::{SolEvent, sol};

sol! {
    /// Uniswap V2 compatible pair: the Swap event we harvest and the reserves view
    interface IUniswapV2Pair {
        event Swap(
            address indexed sender,
            uint256 amount0In,
            uint256 amount1In,
            uint256 amount0Out,
            uint256 amount1Out,
            address indexed to
        );

        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
    }
}

/// topic0 of `Swap(address,uint256,uint256,uint256,uint256,address)`
pub const SWAP_EVENT_TOPIC: B256 = IUniswapV2Pair::Swap::SIGNATURE_HASH;

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Decimals of the tracked asset in every pool we know of
pub const DEFAULT_TRACKED_DECIMALS: u8 = 18;

/// One ABI word as hex digits
pub const WORD_HEX_LEN: usize = 64;

/// amount0In, amount1In, amount0Out, amount1Out
pub const SWAP_PAYLOAD_HEX_LEN: usize = WORD_HEX_LEN * 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_topic() {
        assert_eq!(
            format!("{:#x}", SWAP_EVENT_TOPIC),
            "0xd78ad95fa46c994b6551d0da85fc275fe613ce37657fb8d5e3d130840159d822"
        );
    }
}
