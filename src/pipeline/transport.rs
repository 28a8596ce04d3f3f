//! Aggregate transport: one Multicall3 `aggregate3` call per chunk
//!
//! The executor talks to the chain only through [`AggregateTransport`], so
//! the chunking logic can be exercised against a mock chain.

use alloy_eips::BlockId;
use alloy_primitives::Address;
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_sol_types::SolCall;
use alloy_transport::TransportError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::abi::IMulticall3;
use crate::error::SnapshotError;

#[async_trait]
pub trait AggregateTransport: Send + Sync {
    /// Issue one aggregate call. Returns one entry per submitted call, in
    /// submission order.
    async fn aggregate3(
        &self,
        aggregator: Address,
        calls: Vec<IMulticall3::Call3>,
        block: Option<BlockId>,
        chunk: usize,
    ) -> Result<Vec<IMulticall3::Result>, SnapshotError>;

    async fn latest_block(&self) -> Result<u64, SnapshotError>;
}

#[async_trait]
impl<T: AggregateTransport + ?Sized> AggregateTransport for Arc<T> {
    async fn aggregate3(
        &self,
        aggregator: Address,
        calls: Vec<IMulticall3::Call3>,
        block: Option<BlockId>,
        chunk: usize,
    ) -> Result<Vec<IMulticall3::Result>, SnapshotError> {
        (**self).aggregate3(aggregator, calls, block, chunk).await
    }

    async fn latest_block(&self) -> Result<u64, SnapshotError> {
        (**self).latest_block().await
    }
}

// ============================================
// JSON-RPC TRANSPORT
// ============================================

/// HTTP JSON-RPC transport. The provider handle is reused across chunks.
pub struct RpcTransport {
    provider: DynProvider,
}

impl RpcTransport {
    pub fn connect(rpc_url: &str) -> Result<Self, SnapshotError> {
        let url: url::Url = rpc_url.parse().map_err(|e: url::ParseError| SnapshotError::InvalidEndpoint {
            url: rpc_url.to_string(),
            reason: e.to_string(),
        })?;

        let provider = ProviderBuilder::new().connect_http(url).erased();
        Ok(Self { provider })
    }
}

/// Node-side errors (reverts, gas caps) are execution failures; everything
/// else never reached the EVM.
fn classify(chunk: usize, err: TransportError) -> SnapshotError {
    match err.as_error_resp() {
        Some(payload) => SnapshotError::ChunkExecutionFailure {
            chunk,
            message: payload.to_string(),
        },
        None => SnapshotError::TransportFailure {
            chunk: Some(chunk),
            message: err.to_string(),
        },
    }
}

#[async_trait]
impl AggregateTransport for RpcTransport {
    async fn aggregate3(
        &self,
        aggregator: Address,
        calls: Vec<IMulticall3::Call3>,
        block: Option<BlockId>,
        chunk: usize,
    ) -> Result<Vec<IMulticall3::Result>, SnapshotError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let calldata = IMulticall3::aggregate3Call { calls }.abi_encode();

        let tx = TransactionRequest::default()
            .to(aggregator)
            .input(calldata.into());

        let mut request = self.provider.call(tx);
        if let Some(block) = block {
            request = request.block(block);
        }

        let result = request.await.map_err(|e| classify(chunk, e))?;
        debug!("Chunk {} returned {} bytes", chunk, result.len());

        IMulticall3::aggregate3Call::abi_decode_returns(&result).map_err(|e| {
            SnapshotError::ChunkExecutionFailure {
                chunk,
                message: format!("failed to decode multicall result: {}", e),
            }
        })
    }

    async fn latest_block(&self) -> Result<u64, SnapshotError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| SnapshotError::TransportFailure {
                chunk: None,
                message: e.to_string(),
            })
    }
}
