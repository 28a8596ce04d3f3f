//! Contract interfaces used by the snapshot pipeline

use alloy_primitives::{address, Address};
use alloy_sol_types::sol;

// ============================================
// MULTICALL3 INTERFACE
// ============================================

sol! {
    /// Multicall3 - deployed at same address on all EVM chains
    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls)
            external payable returns (Result[] memory returnData);
    }
}

// ============================================
// POOL INTERFACES
// ============================================

sol! {
    /// Two-token StableSwap pool
    interface IStableSwapPool {
        function getA() external view returns (uint256);
        function fees() external view returns (
            uint256 tradeFee, uint256 adminFee, uint256 depositFee, uint256 withdrawFee
        );
        function paused() external view returns (bool);
        function getReserves() external view returns (uint256 reserve0, uint256 reserve1);
    }

    interface IERC20 {
        function totalSupply() external view returns (uint256);
    }
}

/// Canonical Multicall3 deployment
pub const MULTICALL3: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");
