//! Pool registry
//!
//! Versioned list of the StableSwap pools tracked on one network, loaded
//! from a TOML file supplied by the operator. No deployment addresses are
//! compiled in. Addresses are kept as EIP-55 strings; the call encoder
//! validates them before anything touches the chain.

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

// ============================================
// NETWORKS
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Ethereum,
    Arbitrum,
    Optimism,
    Base,
    Polygon,
}

impl Network {
    pub const ALL: [Network; 5] = [
        Network::Ethereum,
        Network::Arbitrum,
        Network::Optimism,
        Network::Base,
        Network::Polygon,
    ];

    pub fn chain_id(self) -> u64 {
        match self {
            Network::Ethereum => 1,
            Network::Arbitrum => 42161,
            Network::Optimism => 10,
            Network::Base => 8453,
            Network::Polygon => 137,
        }
    }

    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.chain_id() == chain_id)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Ethereum => write!(f, "Ethereum"),
            Network::Arbitrum => write!(f, "Arbitrum"),
            Network::Optimism => write!(f, "Optimism"),
            Network::Base => write!(f, "Base"),
            Network::Polygon => write!(f, "Polygon"),
        }
    }
}

// ============================================
// POOL ENTRIES
// ============================================

/// Reserve token metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMeta {
    pub symbol: String,
    pub address: String,
    pub decimals: u8,
}

/// One tracked pool. Field order of the snapshot is fixed by the schema,
/// not by this struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    pub name: String,
    pub pool_address: String,
    pub lp_token_address: String,
    pub tokens: [TokenMeta; 2],
}

// ============================================
// REGISTRY FILE
// ============================================

/// Pools tracked on one network, in query order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    /// Bumped by the operator whenever a pool is added, removed or re-pointed
    pub version: String,
    pub network: Network,
    #[serde(default, rename = "pool")]
    pub pools: Vec<PoolEntry>,
}

impl Registry {
    pub fn from_toml(content: &str) -> Result<Self> {
        let registry: Self = toml::from_str(content)?;
        registry.validate()?;
        Ok(registry)
    }

    /// Load and validate a registry file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("cannot read registry {}: {}", path.display(), e))?;
        Self::from_toml(&content)
    }

    /// Names must be unique since they label every report entry
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(eyre::eyre!("registry version must not be empty"));
        }
        let mut seen = HashSet::new();
        for pool in &self.pools {
            if !seen.insert(pool.name.as_str()) {
                return Err(eyre::eyre!("duplicate pool name `{}` in registry", pool.name));
            }
        }
        Ok(())
    }

    /// Refuse a registry written for another chain
    pub fn ensure_network(&self, network: Network) -> Result<()> {
        if self.network != network {
            return Err(eyre::eyre!(
                "registry {} lists {} pools but CHAIN_ID selects {}",
                self.version,
                self.network,
                network
            ));
        }
        Ok(())
    }
}
