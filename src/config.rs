//! Coordinator configuration
//!
//! Every field has a default taken from the main network, so a TOML file only
//! needs to list the values it overrides.

use crate::{Error, Result};
use alloy_primitives::{address, Address};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Safe group-account deployment addresses
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SafeDeployment {
    /// Implementation proxies delegate to
    pub singleton: Address,
    pub proxy_factory: Address,
    pub fallback_handler: Address,
}

impl Default for SafeDeployment {
    fn default() -> Self {
        Self {
            singleton: address!("3E5c63644E683549055b9Be8653de26E0B4CD36E"),
            proxy_factory: address!("a6B71E26C5e0845f74c812102Ca7114b6a896AB2"),
            fallback_handler: address!("f48f2B2d2a534e402487b3ee7C18c33Aec0Fe5e4"),
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Network name, also the human readable part of U-ledger addresses
    pub network: String,

    /// Endpoint handed to the chain collaborators
    pub rpc_url: String,

    /// Maximum time to wait for a terminal status (milliseconds)
    pub confirmation_timeout_ms: u64,

    /// Interval between status queries (milliseconds)
    pub confirmation_interval_ms: u64,

    /// Gas for plain native transfers
    pub transfer_gas_limit: u64,

    /// Relative gas margin over the simulated amount
    pub gas_limit_extra_rel: f64,

    /// Minimum absolute gas margin
    pub gas_limit_extra_abs: u64,

    /// Base fee (wei) for atomic transactions when the chain reports none
    pub default_base_fee: u128,

    pub default_max_fee_per_gas: u128,

    pub default_max_priority_fee_per_gas: u128,

    /// Flat U-ledger fee (nano units)
    pub utxo_default_fee: u64,

    pub contract_registry: Address,

    pub safe: SafeDeployment,

    /// Use one `batchDelegate` call instead of undelegate followed by `delegate` per entry
    pub batch_ftso_delegation: bool,

    /// Serialize pipeline runs per sender address
    pub serialize_per_identity: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            network: "flare".to_string(),
            rpc_url: "https://flare-api.flare.network/ext/bc/C/rpc".to_string(),
            confirmation_timeout_ms: 60_000,
            confirmation_interval_ms: 2_000,
            transfer_gas_limit: 21_000,
            gas_limit_extra_rel: 0.05,
            gas_limit_extra_abs: 10_000,
            default_base_fee: 25_000_000_000,
            default_max_fee_per_gas: 50_000_000_000,
            default_max_priority_fee_per_gas: 0,
            utxo_default_fee: 1_000_000,
            contract_registry: address!("aD67FE66660Fb8dFE9d6b1b4240d8650e30F6019"),
            safe: SafeDeployment::default(),
            batch_ftso_delegation: true,
            serialize_per_identity: false,
        }
    }
}

impl CoordinatorConfig {
    pub fn flare() -> Self {
        Self::default()
    }

    pub fn songbird() -> Self {
        Self {
            network: "songbird".to_string(),
            rpc_url: "https://songbird-api.flare.network/ext/bc/C/rpc".to_string(),
            batch_ftso_delegation: false,
            ..Self::default()
        }
    }

    pub fn coston2() -> Self {
        Self {
            network: "costwo".to_string(),
            rpc_url: "https://coston2-api.flare.network/ext/bc/C/rpc".to_string(),
            ..Self::default()
        }
    }

    pub fn coston() -> Self {
        Self {
            network: "coston".to_string(),
            rpc_url: "https://coston-api.flare.network/ext/bc/C/rpc".to_string(),
            batch_ftso_delegation: false,
            ..Self::default()
        }
    }

    /// Looks up a preset by network name
    pub fn preset(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "flare" => Ok(Self::flare()),
            "songbird" => Ok(Self::songbird()),
            "coston2" | "costwo" => Ok(Self::coston2()),
            "coston" => Ok(Self::coston()),
            other => Err(Error::Config(format!("unknown network preset: {other}"))),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.confirmation_interval_ms == 0 {
            return Err(Error::Config(
                "confirmation_interval_ms must be positive".to_string(),
            ));
        }
        if !self.gas_limit_extra_rel.is_finite() || self.gas_limit_extra_rel < 0.0 {
            return Err(Error::Config(format!(
                "gas_limit_extra_rel must be a non-negative number, got {}",
                self.gas_limit_extra_rel
            )));
        }
        Ok(())
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn confirmation_interval(&self) -> Duration {
        Duration::from_millis(self.confirmation_interval_ms)
    }
}
