//! Transaction submission pipeline
//!
//! `Built -> (before-signature) -> Signed -> (before-submission) -> Submitted
//! -> Polling -> Confirmed | Rejected | TimedOut`, one variant per ledger.
//! A veto ends the run without an error and without further events.

use crate::chain::LedgerClient;
use crate::lifecycle::{
    AfterConfirmation, AfterSubmission, BeforeSignature, BeforeSubmission, LifecycleHooks,
    TransactionLifecycle, TxKind,
};
use crate::poller::{ConfirmationPoller, PollOutcome};
use crate::signer::{SignerNegotiator, SigningIdentity};
use crate::types::{AccountTx, LedgerKind, TxReceipt, UnsignedTransaction, UtxoTx};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::debug;

/// Clock in Unix milliseconds
pub type TimeFn = Arc<dyn Fn() -> u64 + Send + Sync>;

pub(crate) fn system_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Sign, veto, submit, confirm
pub struct SubmissionPipeline<'a, C: ?Sized> {
    client: &'a C,

    /// Snapshot taken when the pipeline was created
    hooks: LifecycleHooks,

    poller: ConfirmationPoller,

    current_time_fn: TimeFn,
}

impl<'a, C: LedgerClient + ?Sized> SubmissionPipeline<'a, C> {
    pub fn new(client: &'a C, hooks: LifecycleHooks, poller: ConfirmationPoller) -> Self {
        Self {
            client,
            hooks,
            poller,
            current_time_fn: Arc::new(system_time_ms),
        }
    }

    /// Set the current time function (for testing)
    pub fn with_time_fn(mut self, f: TimeFn) -> Self {
        self.current_time_fn = f;
        self
    }

    fn now(&self) -> u64 {
        (self.current_time_fn)()
    }

    /// Runs an A-ledger transaction. `Ok(None)` means a hook vetoed it.
    pub async fn run_account(
        &self,
        kind: TxKind,
        identity: &dyn SigningIdentity,
        tx: AccountTx,
    ) -> Result<Option<TxReceipt>> {
        let mut lifecycle = TransactionLifecycle::new_built(kind, self.now());
        debug!(
            "Running {} from {} to {} (nonce {}, gas {})",
            kind, tx.from, tx.to, tx.nonce, tx.gas_limit
        );

        let unsigned_hex = UnsignedTransaction::from(tx.clone()).unsigned_hex()?;
        if !self
            .hooks
            .before_signature(BeforeSignature { kind, unsigned_hex })
            .await
        {
            lifecycle.mark_vetoed(self.now());
            return Ok(None);
        }

        let tx_id = match SignerNegotiator::sign_and_submit(identity, &tx).await? {
            Some(tx_id) => tx_id,
            None => {
                let signed = SignerNegotiator::sign_account_tx(identity, &tx).await?;
                lifecycle.mark_signed(signed.tx_id);
                let signed_hex = signed.raw_hex();
                if !self
                    .hooks
                    .before_submission(BeforeSubmission {
                        kind,
                        tx_id: signed.tx_id,
                        signed_hex,
                    })
                    .await
                {
                    lifecycle.mark_vetoed(self.now());
                    return Ok(None);
                }
                self.client.broadcast_account_tx(signed.raw).await?
            }
        };
        lifecycle.mark_submitted(tx_id, self.now());
        self.hooks
            .after_submission(AfterSubmission { kind, tx_id })
            .await;

        lifecycle.mark_polling();
        let client = self.client;
        let outcome = self
            .poller
            .poll(kind.description(), || async move {
                client.account_receipt(tx_id).await.map_err(Error::from)
            })
            .await;

        match outcome {
            PollOutcome::Terminal(receipt) => self
                .finish(lifecycle, TxReceipt::Account(receipt))
                .await
                .map(Some),
            PollOutcome::TimedOut { .. } => {
                lifecycle.mark_timed_out(self.now());
                Err(Error::NotConfirmed(tx_id.to_string()))
            }
        }
    }

    /// Runs a U-ledger transaction, or an atomic one when `ledger` is the A-ledger
    pub async fn run_utxo(
        &self,
        kind: TxKind,
        identity: &dyn SigningIdentity,
        tx: UtxoTx,
        ledger: LedgerKind,
    ) -> Result<Option<TxReceipt>> {
        let mut lifecycle = TransactionLifecycle::new_built(kind, self.now());
        debug!(
            "Running {} on {} ({} inputs, {} signatures)",
            kind,
            ledger,
            tx.inputs.len(),
            tx.signature_count()
        );

        let unsigned = UnsignedTransaction::from(tx.clone());
        if unsigned.ledger_kind() != ledger {
            return Err(Error::InvalidParameter(format!(
                "{} transaction cannot be issued on the {}",
                unsigned.ledger_kind(),
                ledger
            )));
        }
        let unsigned_hex = unsigned.unsigned_hex()?;
        if !self
            .hooks
            .before_signature(BeforeSignature { kind, unsigned_hex })
            .await
        {
            lifecycle.mark_vetoed(self.now());
            return Ok(None);
        }

        let signed = SignerNegotiator::sign_utxo_tx(identity, &tx).await?;
        lifecycle.mark_signed(signed.tx_id);
        let signed_hex = signed.raw_hex();
        if !self
            .hooks
            .before_submission(BeforeSubmission {
                kind,
                tx_id: signed.tx_id,
                signed_hex,
            })
            .await
        {
            lifecycle.mark_vetoed(self.now());
            return Ok(None);
        }

        let tx_id = self.client.issue_utxo_tx(ledger, signed.raw).await?;
        lifecycle.mark_submitted(tx_id, self.now());
        self.hooks
            .after_submission(AfterSubmission { kind, tx_id })
            .await;

        lifecycle.mark_polling();
        let client = self.client;
        let outcome = self
            .poller
            .poll(kind.description(), || async move {
                let status = client.utxo_tx_status(ledger, tx_id).await?;
                Ok(status.is_terminal(ledger).then_some(status))
            })
            .await;

        match outcome {
            PollOutcome::Terminal(status) => self
                .finish(
                    lifecycle,
                    TxReceipt::Utxo {
                        tx_id,
                        ledger,
                        status,
                    },
                )
                .await
                .map(Some),
            PollOutcome::TimedOut { .. } => {
                lifecycle.mark_timed_out(self.now());
                Err(Error::NotConfirmed(tx_id.to_string()))
            }
        }
    }

    async fn finish(
        &self,
        mut lifecycle: TransactionLifecycle,
        receipt: TxReceipt,
    ) -> Result<TxReceipt> {
        let tx_id = receipt.tx_id();
        let success = receipt.is_successful();
        if success {
            lifecycle.mark_confirmed(self.now());
        } else {
            lifecycle.mark_rejected(self.now(), format!("{:?}", receipt));
        }
        self.hooks
            .after_confirmation(AfterConfirmation {
                kind: lifecycle.kind,
                tx_id,
                success,
                lifecycle,
            })
            .await;
        if success {
            Ok(receipt)
        } else {
            Err(Error::TransactionFailed(tx_id.to_string()))
        }
    }
}
