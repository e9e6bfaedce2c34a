//! Cross-ledger transfers
//!
//! A transfer is a two step saga: export on the source ledger, import on the
//! destination. Only the shortfall over what already waits in atomic memory is
//! exported, and an import always sweeps everything waiting. A run interrupted
//! between the steps is resumed with `import_pending_*`.

use crate::chain::LedgerClient;
use crate::coordinator::Network;
use crate::signer::SigningIdentity;
use crate::types::TxReceipt;
use crate::units::to_nano;
use crate::{Error, Result};
use alloy_primitives::U256;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// A-ledger to U-ledger
    ToUtxo,
    /// U-ledger to A-ledger
    ToAccount,
}

/// What a transfer would do, computed from current balances (nano units)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossLedgerTransferPlan {
    pub direction: TransferDirection,
    /// `None` moves everything spendable
    pub amount: Option<u64>,
    /// Already exported and waiting for import
    pub unimported: u64,
    /// Zero when no export is needed
    pub export_amount: u64,
    /// U-ledger fee of the leg the shortfall accounts for: the import when
    /// moving to the U-ledger, the export when moving to the A-ledger
    pub fee: u64,
}

impl CrossLedgerTransferPlan {
    pub fn needs_export(&self) -> bool {
        self.export_amount > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    Planned,
    Exported,
    Imported,
    /// A hook vetoed one of the legs
    Vetoed,
}

/// Saga state after a transfer run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub plan: CrossLedgerTransferPlan,
    pub export: Option<TxReceipt>,
    pub import: Option<TxReceipt>,
    pub stage: TransferStage,
}

impl TransferReport {
    fn new(plan: CrossLedgerTransferPlan) -> Self {
        Self {
            plan,
            export: None,
            import: None,
            stage: TransferStage::Planned,
        }
    }

    pub fn is_vetoed(&self) -> bool {
        self.stage == TransferStage::Vetoed
    }
}

/// Composes the export and import pipelines of a network
pub struct CrossLedgerTransferCoordinator<'a, C> {
    network: &'a Network<C>,
}

impl<'a, C: LedgerClient> CrossLedgerTransferCoordinator<'a, C> {
    pub fn new(network: &'a Network<C>) -> Self {
        Self { network }
    }

    pub async fn plan_to_utxo(&self, identity: &dyn SigningIdentity, amount: U256) -> Result<CrossLedgerTransferPlan> {
        let amount = to_nano(amount)?;
        let owner = identity.key().utxo_address()?;
        let fee = self.network.config().utxo_default_fee;
        let unimported = self.network.unimported_to_utxo(owner).await?;
        let needed = amount.saturating_add(fee);
        Ok(CrossLedgerTransferPlan {
            direction: TransferDirection::ToUtxo,
            amount: Some(amount),
            unimported,
            export_amount: needed.saturating_sub(unimported),
            fee,
        })
    }

    pub async fn plan_to_account(
        &self,
        identity: &dyn SigningIdentity,
        amount: Option<U256>,
    ) -> Result<CrossLedgerTransferPlan> {
        let amount = amount.map(to_nano).transpose()?;
        let owner = identity.key().utxo_address()?;
        let fee = self.network.config().utxo_default_fee;
        let unimported = self.network.unimported_to_account(owner).await?;
        let export_amount = match amount {
            Some(amount) => amount.saturating_sub(unimported),
            None => self
                .network
                .utxo_balance(owner)
                .await?
                .saturating_sub(fee),
        };
        Ok(CrossLedgerTransferPlan {
            direction: TransferDirection::ToAccount,
            amount,
            unimported,
            export_amount,
            fee,
        })
    }

    pub async fn transfer_to_utxo(&self, identity: &dyn SigningIdentity, amount: U256) -> Result<TransferReport> {
        let plan = self.plan_to_utxo(identity, amount).await?;
        let owner = identity.key().utxo_address()?;
        let requested = plan.amount.unwrap_or_default();
        info!(
            "Moving {} to the U-ledger ({} waiting, exporting {})",
            requested, plan.unimported, plan.export_amount
        );
        let mut report = TransferReport::new(plan);

        // Step 1: export the shortfall
        if plan.needs_export() {
            match self
                .network
                .export_nano_from_account(identity, plan.export_amount)
                .await?
            {
                Some(receipt) => {
                    report.export = Some(receipt);
                    report.stage = TransferStage::Exported;
                }
                None => {
                    warn!("Export to the U-ledger vetoed");
                    report.stage = TransferStage::Vetoed;
                    return Ok(report);
                }
            }
        }

        // Step 2: import everything waiting
        let waiting = self.network.unimported_to_utxo(owner).await?;
        if waiting < requested {
            return Err(Error::InsufficientExportedBalance {
                required: requested,
                available: waiting,
            });
        }
        if waiting > 0 {
            self.import(&mut report, self.network.import_to_utxo(identity).await?);
        }
        Ok(report)
    }

    pub async fn transfer_to_account(
        &self,
        identity: &dyn SigningIdentity,
        amount: Option<U256>,
    ) -> Result<TransferReport> {
        let plan = self.plan_to_account(identity, amount).await?;
        let owner = identity.key().utxo_address()?;
        info!(
            "Moving {:?} to the A-ledger ({} waiting, exporting {})",
            plan.amount, plan.unimported, plan.export_amount
        );
        let mut report = TransferReport::new(plan);

        // Step 1: export the shortfall
        if plan.needs_export() {
            match self
                .network
                .export_nano_from_utxo(identity, plan.export_amount)
                .await?
            {
                Some(receipt) => {
                    report.export = Some(receipt);
                    report.stage = TransferStage::Exported;
                }
                None => {
                    warn!("Export to the A-ledger vetoed");
                    report.stage = TransferStage::Vetoed;
                    return Ok(report);
                }
            }
        }

        // Step 2: import everything waiting
        let waiting = self.network.unimported_to_account(owner).await?;
        if let Some(requested) = plan.amount {
            if waiting < requested {
                return Err(Error::InsufficientExportedBalance {
                    required: requested,
                    available: waiting,
                });
            }
        }
        if waiting > 0 {
            self.import(&mut report, self.network.import_to_account(identity).await?);
        }
        Ok(report)
    }

    fn import(&self, report: &mut TransferReport, receipt: Option<TxReceipt>) {
        match receipt {
            Some(receipt) => {
                report.import = Some(receipt);
                report.stage = TransferStage::Imported;
            }
            None => {
                warn!("Import vetoed, funds stay in atomic memory");
                report.stage = TransferStage::Vetoed;
            }
        }
    }

    /// Imports whatever waits for the U-ledger; nothing to do is not an error
    pub async fn import_pending_to_utxo(&self, identity: &dyn SigningIdentity) -> Result<Option<TxReceipt>> {
        let owner = identity.key().utxo_address()?;
        let waiting = self.network.unimported_to_utxo(owner).await?;
        if waiting == 0 {
            debug!("Nothing waiting for import to the U-ledger");
            return Ok(None);
        }
        self.network.import_to_utxo(identity).await
    }

    pub async fn import_pending_to_account(&self, identity: &dyn SigningIdentity) -> Result<Option<TxReceipt>> {
        let owner = identity.key().utxo_address()?;
        let waiting = self.network.unimported_to_account(owner).await?;
        if waiting == 0 {
            debug!("Nothing waiting for import to the A-ledger");
            return Ok(None);
        }
        self.network.import_to_account(identity).await
    }
}
