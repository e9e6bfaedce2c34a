//! Fee estimation for both ledgers

use crate::chain::ChainStateReader;
use crate::config::CoordinatorConfig;
use crate::types::UtxoTx;
use crate::units::{ceil_to_gwei, floor_to_gwei, WEI_PER_NANO};
use crate::{Error, Result};
use tracing::debug;

/// Intrinsic gas of an atomic transaction
pub const ATOMIC_TX_INTRINSIC_GAS: u64 = 10_000;

/// Gas per credential of an atomic transaction
pub const ATOMIC_TX_GAS_PER_SIGNATURE: u64 = 1_000;

/// EIP-1559 fee fields for an A-ledger transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountFees {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

pub struct FeeEstimator<'a, R: ?Sized> {
    reader: &'a R,
    config: &'a CoordinatorConfig,
}

impl<'a, R: ChainStateReader + ?Sized> FeeEstimator<'a, R> {
    pub fn new(reader: &'a R, config: &'a CoordinatorConfig) -> Self {
        Self { reader, config }
    }

    /// Fee market values rounded down to whole gwei, configured defaults where absent
    pub async fn account_fees(&self) -> Result<AccountFees> {
        let data = self.reader.fee_data().await?;
        let fees = AccountFees {
            max_fee_per_gas: data
                .max_fee_per_gas
                .map(floor_to_gwei)
                .unwrap_or(self.config.default_max_fee_per_gas),
            max_priority_fee_per_gas: data
                .max_priority_fee_per_gas
                .map(floor_to_gwei)
                .unwrap_or(self.config.default_max_priority_fee_per_gas),
        };
        debug!(
            "A-ledger fees: max {} wei, priority {} wei",
            fees.max_fee_per_gas, fees.max_priority_fee_per_gas
        );
        Ok(fees)
    }

    /// Base fee (wei) for atomic transactions, rounded up to whole gwei
    pub async fn base_fee(&self) -> Result<u128> {
        let data = self.reader.fee_data().await?;
        Ok(data
            .gas_price
            .map(ceil_to_gwei)
            .unwrap_or(self.config.default_base_fee))
    }

    pub fn utxo_default_fee(&self) -> u64 {
        self.config.utxo_default_fee
    }
}

/// Gas cost of an atomic transaction: intrinsic part, credentials and unsigned size
pub fn atomic_gas_cost(tx: &UtxoTx) -> Result<u64> {
    Ok(ATOMIC_TX_INTRINSIC_GAS
        + ATOMIC_TX_GAS_PER_SIGNATURE * tx.signature_count() as u64
        + tx.unsigned_bytes()?.len() as u64)
}

/// Atomic fee in nano units for a base fee in wei
pub fn atomic_fee(base_fee: u128, tx: &UtxoTx) -> Result<u64> {
    let base_fee_gwei = base_fee / u128::from(WEI_PER_NANO);
    let fee = base_fee_gwei * u128::from(atomic_gas_cost(tx)?);
    u64::try_from(fee).map_err(|_| Error::InvalidParameter(format!("atomic fee {fee} overflows")))
}
