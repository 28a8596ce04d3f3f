//! Runtime configuration for a snapshot run
//!
//! Loaded from environment variables (with `.env` support) or from a TOML
//! file, then validated before any RPC traffic.

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::pipeline::encoder::parse_checked_address;
use crate::pipeline::{AggregatorTable, BatchOptions, FailurePolicy};
use crate::registry::Network;

// ============================================
// CONFIGURATION STRUCT
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // ========== Network Settings ==========
    /// JSON-RPC endpoint of the target network
    pub rpc_url: String,

    /// Chain ID (1 = Ethereum Mainnet)
    pub chain_id: u64,

    /// Aggregator override for the configured chain (EIP-55).
    /// Falls back to canonical Multicall3.
    pub multicall_address: Option<String>,

    /// TOML file listing the pools to snapshot
    pub registry_path: String,

    // ========== Batching ==========
    /// Calls per aggregate request
    pub max_chunk_size: usize,

    /// Aggregate requests in flight at once
    pub max_concurrent_chunks: usize,

    /// Overall deadline in seconds (0 = none)
    pub deadline_secs: u64,

    /// Extra attempts for a failed chunk
    pub chunk_retries: u32,

    /// Base delay between attempts, grows linearly
    pub retry_backoff_ms: u64,

    // ========== Run Behaviour ==========
    pub failure_policy: FailurePolicy,

    /// Read every chunk at one block resolved up front
    pub pin_block: bool,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let failure_policy = match env::var("FAILURE_POLICY") {
            Ok(value) => value.parse().map_err(|e: String| eyre::eyre!(e))?,
            Err(_) => defaults.failure_policy,
        };

        Ok(Self {
            rpc_url: env::var("RPC_URL").unwrap_or(defaults.rpc_url),
            chain_id: env_or("CHAIN_ID", defaults.chain_id),
            multicall_address: env::var("MULTICALL_ADDRESS").ok().filter(|s| !s.trim().is_empty()),
            registry_path: env::var("REGISTRY_PATH").unwrap_or(defaults.registry_path),
            max_chunk_size: env_or("MAX_CHUNK_SIZE", defaults.max_chunk_size),
            max_concurrent_chunks: env_or("MAX_CONCURRENT_CHUNKS", defaults.max_concurrent_chunks),
            deadline_secs: env_or("DEADLINE_SECS", defaults.deadline_secs),
            chunk_retries: env_or("CHUNK_RETRIES", defaults.chunk_retries),
            retry_backoff_ms: env_or("RETRY_BACKOFF_MS", defaults.retry_backoff_ms),
            failure_policy,
            pin_block: env_or("PIN_BLOCK", defaults.pin_block),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration before connecting
    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.is_empty() || self.rpc_url.contains("YOUR_API_KEY") {
            return Err(eyre::eyre!("Invalid RPC_URL - please set a reachable JSON-RPC endpoint"));
        }

        self.network()?;
        self.aggregator_table()?;

        if self.registry_path.trim().is_empty() {
            return Err(eyre::eyre!("REGISTRY_PATH must name a pool registry file"));
        }

        if self.max_chunk_size == 0 {
            return Err(eyre::eyre!("MAX_CHUNK_SIZE must be at least 1"));
        }
        if self.max_concurrent_chunks == 0 {
            return Err(eyre::eyre!("MAX_CONCURRENT_CHUNKS must be at least 1"));
        }

        Ok(())
    }

    pub fn network(&self) -> Result<Network> {
        Network::from_chain_id(self.chain_id)
            .ok_or_else(|| eyre::eyre!("Unsupported CHAIN_ID {}", self.chain_id))
    }

    /// Default aggregator table with the configured override applied
    pub fn aggregator_table(&self) -> Result<AggregatorTable> {
        let table = AggregatorTable::default();
        match &self.multicall_address {
            Some(address) => {
                let address = parse_checked_address(address, "MULTICALL_ADDRESS")?;
                Ok(table.with(self.network()?, address))
            }
            None => Ok(table),
        }
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            max_chunk_size: self.max_chunk_size,
            max_concurrent_chunks: self.max_concurrent_chunks,
            deadline: (self.deadline_secs > 0).then(|| Duration::from_secs(self.deadline_secs)),
            chunk_retries: self.chunk_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let network = self
            .network()
            .map(|n| n.to_string())
            .unwrap_or_else(|_| "unsupported".to_string());
        let deadline = if self.deadline_secs > 0 {
            format!("{}s", self.deadline_secs)
        } else {
            "none".to_string()
        };

        println!("╔════════════════════════════════════════════════════════════╗");
        println!("║            STABLESWAP SNAPSHOT - CONFIGURATION             ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ Network:           {:^40} ║", network);
        println!("║ Chain ID:          {:^40} ║", self.chain_id);
        println!("║ Aggregator:        {:^40} ║",
            self.multicall_address.as_deref().unwrap_or("Multicall3 (canonical)")
        );
        println!("║ Registry:          {:^40} ║", self.registry_path);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ BATCHING                                                   ║");
        println!("║ • Chunk Size:      {:^40} ║", self.max_chunk_size);
        println!("║ • Concurrency:     {:^40} ║", self.max_concurrent_chunks);
        println!("║ • Deadline:        {:^40} ║", deadline);
        println!("║ • Retries:         {:^40} ║",
            format!("{} (+{}ms each)", self.chunk_retries, self.retry_backoff_ms)
        );
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ RUN                                                        ║");
        println!("║ • Failure Policy:  {:^40} ║", self.failure_policy);
        println!("║ • Pin Block:       {:^40} ║",
            if self.pin_block { "✓ Enabled" } else { "✗ Disabled" }
        );
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

impl Default for Config {
    fn default() -> Self {
        let batch = BatchOptions::default();
        Self {
            rpc_url: "https://eth.llamarpc.com".to_string(),
            chain_id: 1,
            multicall_address: None,
            registry_path: "registry.toml".to_string(),
            max_chunk_size: batch.max_chunk_size,
            max_concurrent_chunks: batch.max_concurrent_chunks,
            deadline_secs: batch.deadline.map(|d| d.as_secs()).unwrap_or(0),
            chunk_retries: batch.chunk_retries,
            retry_backoff_ms: batch.retry_backoff.as_millis() as u64,
            failure_policy: FailurePolicy::Abort,
            pin_block: true,
        }
    }
}

// ============================================
// TESTS
// ============================================
