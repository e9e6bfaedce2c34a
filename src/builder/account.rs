use crate::chain::{CallRequest, ChainStateReader, ContractCallSimulator, SimulationError};
use crate::config::CoordinatorConfig;
use crate::fee::FeeEstimator;
use crate::types::AccountTx;
use crate::{Error, Result};
use alloy_primitives::{Address, Bytes, U256};
use tracing::debug;

/// Gas limits are rounded up to this granularity
const GAS_LIMIT_ROUNDING: u64 = 1_000;

/// Simulated gas plus the larger of the relative and absolute margins,
/// rounded up to a multiple of 1000. Saturates at the largest multiple of
/// 1000 that fits in a `u64`.
pub fn gas_ceiling(simulated: u64, extra_rel: f64, extra_abs: u64) -> u64 {
    let extra_rel = (simulated as f64 * extra_rel).ceil() as u64;
    let topped = simulated.saturating_add(extra_rel.max(extra_abs));
    topped
        .div_ceil(GAS_LIMIT_ROUNDING)
        .checked_mul(GAS_LIMIT_ROUNDING)
        .unwrap_or(u64::MAX / GAS_LIMIT_ROUNDING * GAS_LIMIT_ROUNDING)
}

/// Builds EIP-1559 shaped A-ledger transactions
pub struct AccountTxBuilder<'a, C: ?Sized> {
    client: &'a C,
    config: &'a CoordinatorConfig,
}

impl<'a, C> AccountTxBuilder<'a, C>
where
    C: ChainStateReader + ContractCallSimulator + ?Sized,
{
    pub fn new(client: &'a C, config: &'a CoordinatorConfig) -> Self {
        Self { client, config }
    }

    /// Fee fields and nonce from chain state, gas from simulation
    pub async fn build(&self, from: Address, to: Address, value: U256, data: Bytes) -> Result<AccountTx> {
        let mut tx = self.base(from, to, value, data).await?;
        tx.gas_limit = self.simulate(&tx).await?;
        Ok(tx)
    }

    /// Plain native transfer with the configured fixed gas
    pub async fn transfer(&self, from: Address, to: Address, value: U256) -> Result<AccountTx> {
        let mut tx = self.base(from, to, value, Bytes::new()).await?;
        tx.gas_limit = self.config.transfer_gas_limit;
        Ok(tx)
    }

    /// Sends the whole balance minus the gas it costs at the max fee
    pub async fn wipe(&self, from: Address, to: Address) -> Result<AccountTx> {
        let mut tx = self.transfer(from, to, U256::ZERO).await?;
        let balance = self.client.account_balance(from).await?;
        let gas_cost = tx.max_cost();
        tx.value = balance.checked_sub(gas_cost).ok_or(Error::InsufficientBalance {
            required: gas_cost,
            available: balance,
        })?;
        debug!("Wiping {} wei from {} to {}", tx.value, from, to);
        Ok(tx)
    }

    async fn base(&self, from: Address, to: Address, value: U256, data: Bytes) -> Result<AccountTx> {
        let chain_id = self.client.chain_id().await?;
        let nonce = self.client.nonce(from).await?;
        let fees = FeeEstimator::new(self.client, self.config).account_fees().await?;
        Ok(AccountTx {
            chain_id,
            nonce,
            from,
            to,
            value,
            data,
            gas_limit: 0,
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
        })
    }

    async fn simulate(&self, tx: &AccountTx) -> Result<u64> {
        let request = CallRequest {
            from: tx.from,
            to: tx.to,
            value: tx.value,
            data: tx.data.clone(),
        };
        let simulated = self
            .client
            .estimate_gas(&request)
            .await
            .map_err(|e| match e {
                SimulationError::Reverted(reason) => Error::SimulationFailure(reason),
                SimulationError::Chain(e) => Error::Chain(e),
            })?;
        let gas_limit = gas_ceiling(
            simulated,
            self.config.gas_limit_extra_rel,
            self.config.gas_limit_extra_abs,
        );
        debug!("Simulated {} gas, limit set to {}", simulated, gas_limit);
        Ok(gas_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeLedger;

    #[test]
    fn test_gas_ceiling_bounds() {
        for simulated in [0u64, 1, 21_000, 50_000, 199_999, 1_000_000, 12_345_678] {
            let ceiling = gas_ceiling(simulated, 0.05, 10_000);
            assert!(ceiling >= simulated + 10_000);
            assert_eq!(ceiling % 1_000, 0);
        }
        // relative margin dominates above 200k
        assert_eq!(gas_ceiling(1_000_000, 0.05, 10_000), 1_050_000);
        assert_eq!(gas_ceiling(50_000, 0.05, 10_000), 60_000);
        assert_eq!(gas_ceiling(50_001, 0.05, 10_000), 61_000);

        let top = u64::MAX / 1_000 * 1_000;
        assert_eq!(gas_ceiling(u64::MAX - 500, 0.0, 0), top);
        assert_eq!(gas_ceiling(u64::MAX, 0.05, 10_000), top);
    }

    #[tokio::test]
    async fn test_build_simulates_gas() {
        let ledger = FakeLedger::new();
        ledger.update(|s| {
            s.gas_estimate = 123_456;
            s.nonces.insert(Address::repeat_byte(1), 9);
        });
        let config = CoordinatorConfig::default();
        let builder = AccountTxBuilder::new(&ledger, &config);

        let tx = builder
            .build(
                Address::repeat_byte(1),
                Address::repeat_byte(2),
                U256::ZERO,
                Bytes::from_static(&[1, 2, 3, 4]),
            )
            .await
            .unwrap();

        assert_eq!(tx.nonce, 9);
        assert_eq!(tx.chain_id, 14);
        assert_eq!(tx.gas_limit, 134_000);
        assert_eq!(tx.max_fee_per_gas, 50_000_000_000);
        assert_eq!(ledger.estimates()[0].from, Address::repeat_byte(1));
    }

    #[tokio::test]
    async fn test_revert_becomes_simulation_failure() {
        let ledger = FakeLedger::new();
        ledger.update(|s| {
            s.reverts
                .insert(Address::repeat_byte(2), "nothing to claim".to_string())
        });
        let config = CoordinatorConfig::default();
        let builder = AccountTxBuilder::new(&ledger, &config);

        let err = builder
            .build(Address::repeat_byte(1), Address::repeat_byte(2), U256::ZERO, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SimulationFailure(reason) if reason == "nothing to claim"));
    }

    #[tokio::test]
    async fn test_transfer_and_wipe() {
        let ledger = FakeLedger::new();
        let from = Address::repeat_byte(1);
        let config = CoordinatorConfig::default();
        let builder = AccountTxBuilder::new(&ledger, &config);

        let tx = builder
            .transfer(from, Address::repeat_byte(2), U256::from(7u64))
            .await
            .unwrap();
        assert_eq!(tx.gas_limit, 21_000);
        assert!(ledger.estimates().is_empty());

        let gas_cost = U256::from(21_000u64 * 50_000_000_000u64);
        ledger.fund_account(from, gas_cost + U256::from(1_000u64));
        let wipe = builder.wipe(from, Address::repeat_byte(2)).await.unwrap();
        assert_eq!(wipe.value, U256::from(1_000u64));

        ledger.fund_account(from, gas_cost - U256::from(1u64));
        assert!(matches!(
            builder.wipe(from, Address::repeat_byte(2)).await,
            Err(Error::InsufficientBalance { .. })
        ));
    }
}
