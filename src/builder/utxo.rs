use crate::chain::{ChainStateReader, LedgerIds};
use crate::config::CoordinatorConfig;
use crate::fee::atomic_fee;
use crate::types::{
    AccountCredit, AccountDebit, AssetId, LedgerKind, NodeId, StakeParams, Utxo, UtxoAddress,
    UtxoOutput, UtxoOwners, UtxoTx, UtxoTxKind,
};
use crate::units::to_wei;
use crate::{Error, Result};
use alloy_primitives::{Address, Bytes, U256};
use tracing::debug;

/// Picks unlocked outputs of `asset_id` spendable by `owner` alone, largest
/// first, until `target` is covered. Ties break on outpoint so the choice is
/// deterministic.
pub fn select_utxos(
    available: &[Utxo],
    asset_id: &AssetId,
    owner: &UtxoAddress,
    now: u64,
    target: u64,
) -> Result<(Vec<Utxo>, u64)> {
    let mut candidates: Vec<&Utxo> = available
        .iter()
        .filter(|u| &u.asset_id == asset_id && u.owners.spendable_by(owner, now))
        .collect();
    candidates.sort_by(|a, b| {
        b.amount
            .cmp(&a.amount)
            .then_with(|| a.outpoint().cmp(&b.outpoint()))
    });

    let mut selected = Vec::new();
    let mut total = 0u64;
    for utxo in candidates {
        if total >= target {
            break;
        }
        total = total.saturating_add(utxo.amount);
        selected.push(utxo.clone());
    }
    if total < target {
        return Err(Error::InsufficientBalance {
            required: U256::from(target),
            available: U256::from(total),
        });
    }
    Ok((selected, total))
}

/// Builds U-ledger transactions and the atomic transactions of the A-ledger
pub struct UtxoTxBuilder<'a, C: ?Sized> {
    reader: &'a C,
    config: &'a CoordinatorConfig,
    ids: LedgerIds,
    /// Unix seconds, for locktime checks
    now: u64,
}

impl<'a, C: ChainStateReader + ?Sized> UtxoTxBuilder<'a, C> {
    /// Builder over `reader`, treating `now` (unix seconds) as the current time
    pub fn new(reader: &'a C, config: &'a CoordinatorConfig, ids: LedgerIds, now: u64) -> Self {
        Self {
            reader,
            config,
            ids,
            now,
        }
    }

    fn output(&self, owner: UtxoAddress, amount: u64) -> UtxoOutput {
        UtxoOutput {
            asset_id: self.ids.asset_id,
            amount,
            owners: UtxoOwners::single(owner),
        }
    }

    fn tx(&self, ledger: LedgerKind, inputs: Vec<Utxo>, outputs: Vec<UtxoOutput>, kind: UtxoTxKind) -> UtxoTx {
        UtxoTx {
            network_id: self.ids.network_id,
            ledger: self.ids.id_of(ledger),
            inputs,
            outputs,
            kind,
            memo: Bytes::new(),
        }
    }

    /// Inputs covering `spent` plus the default fee, with change back to `owner`
    async fn fund(&self, owner: UtxoAddress, spent: u64) -> Result<(Vec<Utxo>, Vec<UtxoOutput>)> {
        let fee = self.config.utxo_default_fee;
        let target = spent.checked_add(fee).ok_or_else(|| {
            Error::InvalidParameter(format!("amount {spent} plus fee overflows"))
        })?;
        let available = self.reader.utxos(LedgerKind::Utxo, owner, None).await?;
        let (inputs, total) = select_utxos(&available, &self.ids.asset_id, &owner, self.now, target)?;
        let change = total - target;
        let outputs = if change > 0 {
            vec![self.output(owner, change)]
        } else {
            Vec::new()
        };
        debug!(
            "Selected {} outputs worth {} for {} plus fee {}",
            inputs.len(),
            total,
            spent,
            fee
        );
        Ok((inputs, outputs))
    }

    /// Pays `amount` to `recipient`, change back to `owner`
    pub async fn transfer(&self, owner: UtxoAddress, recipient: UtxoAddress, amount: u64) -> Result<UtxoTx> {
        let (inputs, mut outputs) = self.fund(owner, amount).await?;
        outputs.insert(0, self.output(recipient, amount));
        let tx = self.tx(LedgerKind::Utxo, inputs, outputs, UtxoTxKind::Base);
        tx.validate(&self.ids.asset_id)?;
        Ok(tx)
    }

    /// Everything spendable minus the fee
    pub async fn transfer_all(&self, owner: UtxoAddress, recipient: UtxoAddress) -> Result<UtxoTx> {
        let balance = self.spendable_balance(owner).await?;
        let fee = self.config.utxo_default_fee;
        let amount = balance
            .checked_sub(fee)
            .filter(|amount| *amount > 0)
            .ok_or(Error::InsufficientBalance {
                required: U256::from(fee),
                available: U256::from(balance),
            })?;
        self.transfer(owner, recipient, amount).await
    }

    /// Native outputs `owner` can spend alone at the builder's time
    pub async fn spendable_balance(&self, owner: UtxoAddress) -> Result<u64> {
        let available = self.reader.utxos(LedgerKind::Utxo, owner, None).await?;
        Ok(available
            .iter()
            .filter(|u| u.asset_id == self.ids.asset_id && u.owners.spendable_by(&owner, self.now))
            .map(|u| u.amount)
            .sum())
    }

    /// U-ledger export of `amount` to the owner's A-ledger atomic memory
    pub async fn export(&self, owner: UtxoAddress, amount: u64) -> Result<UtxoTx> {
        let (inputs, outputs) = self.fund(owner, amount).await?;
        let kind = UtxoTxKind::Export {
            destination: self.ids.account_ledger,
            exported: vec![self.output(owner, amount)],
        };
        let tx = self.tx(LedgerKind::Utxo, inputs, outputs, kind);
        tx.validate(&self.ids.asset_id)?;
        Ok(tx)
    }

    /// U-ledger import of everything the A-ledger exported to `owner`
    pub async fn import(&self, owner: UtxoAddress) -> Result<UtxoTx> {
        let imported = self
            .reader
            .utxos(LedgerKind::Utxo, owner, Some(self.ids.account_ledger))
            .await?;
        let total: u64 = imported.iter().map(|u| u.amount).sum();
        let fee = self.config.utxo_default_fee;
        let credited = total
            .checked_sub(fee)
            .ok_or(Error::InsufficientExportedBalance {
                required: fee,
                available: total,
            })?;
        let outputs = if credited > 0 {
            vec![self.output(owner, credited)]
        } else {
            Vec::new()
        };
        let kind = UtxoTxKind::Import {
            source: self.ids.account_ledger,
            imported,
        };
        let tx = self.tx(LedgerKind::Utxo, Vec::new(), outputs, kind);
        tx.validate(&self.ids.asset_id)?;
        Ok(tx)
    }

    /// A-ledger export of `amount` to the owner's U-ledger atomic memory; the
    /// fee is debited on top of the amount
    pub async fn atomic_export(
        &self,
        from: Address,
        owner: UtxoAddress,
        amount: u64,
        base_fee: u128,
    ) -> Result<UtxoTx> {
        let nonce = self.reader.nonce(from).await?;
        let debit = AccountDebit {
            address: from,
            asset_id: self.ids.asset_id,
            amount,
            nonce,
        };
        let kind = UtxoTxKind::AtomicExport {
            destination: self.ids.utxo_ledger,
            debits: vec![debit],
            exported: vec![self.output(owner, amount)],
        };
        let mut tx = self.tx(LedgerKind::Account, Vec::new(), Vec::new(), kind);

        // fixed-width encoding: the zero-fee draft has the final size
        let fee = atomic_fee(base_fee, &tx)?;
        let total = amount
            .checked_add(fee)
            .ok_or_else(|| Error::InvalidParameter(format!("amount {amount} plus fee overflows")))?;
        if let UtxoTxKind::AtomicExport { debits, .. } = &mut tx.kind {
            debits[0].amount = total;
        }

        let balance = self.reader.account_balance(from).await?;
        if balance < to_wei(total) {
            return Err(Error::InsufficientBalance {
                required: to_wei(total),
                available: balance,
            });
        }
        debug!("Atomic export of {} with fee {} from {}", amount, fee, from);
        tx.validate(&self.ids.asset_id)?;
        Ok(tx)
    }

    /// A-ledger import of everything the U-ledger exported to `owner`
    pub async fn atomic_import(&self, owner: UtxoAddress, to: Address, base_fee: u128) -> Result<UtxoTx> {
        let imported = self
            .reader
            .utxos(LedgerKind::Account, owner, Some(self.ids.utxo_ledger))
            .await?;
        let total: u64 = imported.iter().map(|u| u.amount).sum();
        let kind = UtxoTxKind::AtomicImport {
            source: self.ids.utxo_ledger,
            imported,
            credits: vec![AccountCredit {
                address: to,
                asset_id: self.ids.asset_id,
                amount: total,
            }],
        };
        let mut tx = self.tx(LedgerKind::Account, Vec::new(), Vec::new(), kind);

        let fee = atomic_fee(base_fee, &tx)?;
        let credited = total
            .checked_sub(fee)
            .ok_or(Error::InsufficientExportedBalance {
                required: fee,
                available: total,
            })?;
        if let UtxoTxKind::AtomicImport { credits, .. } = &mut tx.kind {
            credits[0].amount = credited;
        }
        debug!("Atomic import of {} with fee {} to {}", total, fee, to);
        tx.validate(&self.ids.asset_id)?;
        Ok(tx)
    }

    /// Stakes `weight` to `node_id`; rewards go to `owner`
    pub async fn add_delegator(
        &self,
        owner: UtxoAddress,
        node_id: NodeId,
        weight: u64,
        start_time: u64,
        end_time: u64,
    ) -> Result<UtxoTx> {
        let (inputs, outputs) = self.fund(owner, weight).await?;
        let kind = UtxoTxKind::AddDelegator {
            stake: self.stake(owner, node_id, weight, start_time, end_time),
            staked: vec![self.output(owner, weight)],
        };
        let tx = self.tx(LedgerKind::Utxo, inputs, outputs, kind);
        tx.validate(&self.ids.asset_id)?;
        Ok(tx)
    }

    /// Registers `node_id` staking `weight`. `delegation_fee_bips` is at most 10000.
    pub async fn add_validator(
        &self,
        owner: UtxoAddress,
        node_id: NodeId,
        weight: u64,
        start_time: u64,
        end_time: u64,
        delegation_fee_bips: u32,
    ) -> Result<UtxoTx> {
        if delegation_fee_bips > 10_000 {
            return Err(Error::InvalidParameter(format!(
                "delegation fee {delegation_fee_bips} exceeds 10000 bips"
            )));
        }
        let (inputs, outputs) = self.fund(owner, weight).await?;
        let kind = UtxoTxKind::AddValidator {
            stake: self.stake(owner, node_id, weight, start_time, end_time),
            staked: vec![self.output(owner, weight)],
            delegation_fee_bips,
        };
        let tx = self.tx(LedgerKind::Utxo, inputs, outputs, kind);
        tx.validate(&self.ids.asset_id)?;
        Ok(tx)
    }

    fn stake(&self, owner: UtxoAddress, node_id: NodeId, weight: u64, start_time: u64, end_time: u64) -> StakeParams {
        StakeParams {
            node_id,
            start_time,
            end_time,
            weight,
            reward_owners: UtxoOwners::single(owner),
        }
    }
}
