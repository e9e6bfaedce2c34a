//! Transaction lifecycle tracking and hooks
//!
//! Tracks a transaction from construction through signing and submission to
//! its terminal status, and carries the caller's lifecycle hooks. The two
//! "before" hooks can veto a run; the two "after" hooks only observe.

use crate::types::TxId;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Business operation a transaction belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxKind {
    TransferNative,
    TransferWrapped,
    TransferOnUtxo,
    Wrap,
    Unwrap,
    ClaimFlareDropReward,
    ClaimStakingReward,
    ClaimFtsoReward,
    ClaimRNatReward,
    WithdrawFromRNatAccount,
    DelegateFtso,
    UndelegateFtso,
    DelegateGovernance,
    UndelegateGovernance,
    ExportFromAccount,
    ImportToAccount,
    ExportFromUtxo,
    ImportToUtxo,
    AddDelegator,
    AddValidator,
    CustomContractCall,
    CreateGroupAccount,
}

impl TxKind {
    pub fn description(&self) -> &'static str {
        match self {
            TxKind::TransferNative => "native transfer",
            TxKind::TransferWrapped => "wrapped transfer",
            TxKind::TransferOnUtxo => "U-ledger transfer",
            TxKind::Wrap => "wrap",
            TxKind::Unwrap => "unwrap",
            TxKind::ClaimFlareDropReward => "FlareDrop reward claim",
            TxKind::ClaimStakingReward => "staking reward claim",
            TxKind::ClaimFtsoReward => "FTSO reward claim",
            TxKind::ClaimRNatReward => "RNat reward claim",
            TxKind::WithdrawFromRNatAccount => "RNat account withdrawal",
            TxKind::DelegateFtso => "FTSO delegation",
            TxKind::UndelegateFtso => "FTSO undelegation",
            TxKind::DelegateGovernance => "governance delegation",
            TxKind::UndelegateGovernance => "governance undelegation",
            TxKind::ExportFromAccount => "export from A-ledger",
            TxKind::ImportToAccount => "import to A-ledger",
            TxKind::ExportFromUtxo => "export from U-ledger",
            TxKind::ImportToUtxo => "import to U-ledger",
            TxKind::AddDelegator => "delegator stake",
            TxKind::AddValidator => "validator stake",
            TxKind::CustomContractCall => "contract call",
            TxKind::CreateGroupAccount => "group account creation",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Pipeline stage of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Built,
    Signed,
    Submitted,
    Polling,
    Confirmed,
    Rejected,
    TimedOut,
    /// A before-signature or before-submission hook declined the run
    Vetoed,
}

impl PipelineStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStage::Confirmed
                | PipelineStage::Rejected
                | PipelineStage::TimedOut
                | PipelineStage::Vetoed
        )
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, PipelineStage::Confirmed)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Built => write!(f, "Built"),
            PipelineStage::Signed => write!(f, "Signed"),
            PipelineStage::Submitted => write!(f, "Submitted"),
            PipelineStage::Polling => write!(f, "Polling"),
            PipelineStage::Confirmed => write!(f, "Confirmed"),
            PipelineStage::Rejected => write!(f, "Rejected"),
            PipelineStage::TimedOut => write!(f, "TimedOut"),
            PipelineStage::Vetoed => write!(f, "Vetoed"),
        }
    }
}

/// Lifecycle record of one pipeline run, handed to the after-confirmation hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionLifecycle {
    pub kind: TxKind,

    pub stage: PipelineStage,

    /// Known once signed
    pub tx_id: Option<TxId>,

    /// Build timestamp (Unix milliseconds)
    pub built_at: u64,

    pub submitted_at: Option<u64>,

    pub finalized_at: Option<u64>,

    pub error: Option<String>,
}

impl TransactionLifecycle {
    pub fn new_built(kind: TxKind, built_at: u64) -> Self {
        Self {
            kind,
            stage: PipelineStage::Built,
            tx_id: None,
            built_at,
            submitted_at: None,
            finalized_at: None,
            error: None,
        }
    }

    pub fn mark_signed(&mut self, tx_id: TxId) {
        self.stage = PipelineStage::Signed;
        self.tx_id = Some(tx_id);
        debug!("{} signed: {}", self.kind, tx_id);
    }

    pub fn mark_submitted(&mut self, tx_id: TxId, timestamp: u64) {
        self.stage = PipelineStage::Submitted;
        self.tx_id = Some(tx_id);
        self.submitted_at = Some(timestamp);
        info!("{} submitted: {}", self.kind, tx_id);
    }

    pub fn mark_polling(&mut self) {
        self.stage = PipelineStage::Polling;
    }

    pub fn mark_confirmed(&mut self, timestamp: u64) {
        self.stage = PipelineStage::Confirmed;
        self.finalized_at = Some(timestamp);
        info!(
            "{} confirmed: {} ({:?} ms)",
            self.kind,
            self.tx_id.unwrap_or_default(),
            self.total_time_ms()
        );
    }

    pub fn mark_rejected(&mut self, timestamp: u64, error: String) {
        self.stage = PipelineStage::Rejected;
        self.finalized_at = Some(timestamp);
        warn!("{} failed: {}", self.kind, error);
        self.error = Some(error);
    }

    pub fn mark_timed_out(&mut self, timestamp: u64) {
        self.stage = PipelineStage::TimedOut;
        self.finalized_at = Some(timestamp);
        warn!(
            "{} not confirmed in time: {}",
            self.kind,
            self.tx_id.unwrap_or_default()
        );
    }

    pub fn mark_vetoed(&mut self, timestamp: u64) {
        self.stage = PipelineStage::Vetoed;
        self.finalized_at = Some(timestamp);
        warn!("{} cancelled by lifecycle hook", self.kind);
    }

    /// Time from submission to a terminal status (milliseconds)
    pub fn total_time_ms(&self) -> Option<u64> {
        match (self.submitted_at, self.finalized_at) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }
}

/// Raised before the signer sees the transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeforeSignature {
    pub kind: TxKind,
    pub unsigned_hex: String,
}

/// Raised after signing, before broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeforeSubmission {
    pub kind: TxKind,
    /// Id the ledger will assign once the transaction is submitted
    pub tx_id: TxId,
    pub signed_hex: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfterSubmission {
    pub kind: TxKind,
    pub tx_id: TxId,
}

/// Raised once the transaction reached a terminal status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfterConfirmation {
    pub kind: TxKind,
    pub tx_id: TxId,
    pub success: bool,
    /// Stage and timings of the run
    pub lifecycle: TransactionLifecycle,
}

/// Hook that may return `false` to end the run
pub type VetoHook<E> = Arc<dyn Fn(E) -> BoxFuture<'static, bool> + Send + Sync>;

/// Hook that only observes
pub type NotifyHook<E> = Arc<dyn Fn(E) -> BoxFuture<'static, ()> + Send + Sync>;

/// The four hook registration points. Cloning snapshots the current set.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    before_signature: Option<VetoHook<BeforeSignature>>,
    before_submission: Option<VetoHook<BeforeSubmission>>,
    after_submission: Option<NotifyHook<AfterSubmission>>,
    after_confirmation: Option<NotifyHook<AfterConfirmation>>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_before_signature<F, Fut>(&mut self, hook: F)
    where
        F: Fn(BeforeSignature) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.before_signature = Some(Arc::new(move |event| -> BoxFuture<'static, bool> {
            Box::pin(hook(event))
        }));
    }

    pub fn set_before_submission<F, Fut>(&mut self, hook: F)
    where
        F: Fn(BeforeSubmission) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.before_submission = Some(Arc::new(move |event| -> BoxFuture<'static, bool> {
            Box::pin(hook(event))
        }));
    }

    pub fn set_after_submission<F, Fut>(&mut self, hook: F)
    where
        F: Fn(AfterSubmission) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.after_submission = Some(Arc::new(move |event| -> BoxFuture<'static, ()> {
            Box::pin(hook(event))
        }));
    }

    pub fn set_after_confirmation<F, Fut>(&mut self, hook: F)
    where
        F: Fn(AfterConfirmation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.after_confirmation = Some(Arc::new(move |event| -> BoxFuture<'static, ()> {
            Box::pin(hook(event))
        }));
    }

    pub fn clear_before_signature(&mut self) {
        self.before_signature = None;
    }

    pub fn clear_before_submission(&mut self) {
        self.before_submission = None;
    }

    pub fn clear_after_submission(&mut self) {
        self.after_submission = None;
    }

    pub fn clear_after_confirmation(&mut self) {
        self.after_confirmation = None;
    }

    /// `true` when the run may continue
    pub(crate) async fn before_signature(&self, event: BeforeSignature) -> bool {
        match &self.before_signature {
            Some(hook) => hook(event).await,
            None => true,
        }
    }

    pub(crate) async fn before_submission(&self, event: BeforeSubmission) -> bool {
        match &self.before_submission {
            Some(hook) => hook(event).await,
            None => true,
        }
    }

    pub(crate) async fn after_submission(&self, event: AfterSubmission) {
        if let Some(hook) = &self.after_submission {
            hook(event).await;
        }
    }

    pub(crate) async fn after_confirmation(&self, event: AfterConfirmation) {
        if let Some(hook) = &self.after_confirmation {
            hook(event).await;
        }
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("before_signature", &self.before_signature.is_some())
            .field("before_submission", &self.before_submission.is_some())
            .field("after_submission", &self.after_submission.is_some())
            .field("after_confirmation", &self.after_confirmation.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use std::sync::Mutex;

    #[test]
    fn test_lifecycle_transitions() {
        let mut lifecycle = TransactionLifecycle::new_built(TxKind::Wrap, 1_000);
        assert_eq!(lifecycle.stage, PipelineStage::Built);

        lifecycle.mark_signed(B256::repeat_byte(1));
        assert_eq!(lifecycle.stage, PipelineStage::Signed);
        assert!(!lifecycle.stage.is_terminal());

        lifecycle.mark_submitted(B256::repeat_byte(1), 1_200);
        lifecycle.mark_polling();
        lifecycle.mark_confirmed(3_200);
        assert!(lifecycle.stage.is_terminal());
        assert!(lifecycle.stage.is_successful());
        assert_eq!(lifecycle.total_time_ms(), Some(2_000));
    }

    #[test]
    fn test_failure_stages() {
        let mut lifecycle = TransactionLifecycle::new_built(TxKind::ImportToUtxo, 0);
        lifecycle.mark_submitted(B256::ZERO, 10);
        lifecycle.mark_rejected(20, "status Rejected".into());
        assert!(lifecycle.stage.is_terminal());
        assert!(!lifecycle.stage.is_successful());
        assert_eq!(lifecycle.error.as_deref(), Some("status Rejected"));

        let mut vetoed = TransactionLifecycle::new_built(TxKind::Wrap, 0);
        vetoed.mark_vetoed(5);
        assert_eq!(vetoed.stage.to_string(), "Vetoed");
        assert_eq!(vetoed.total_time_ms(), None);
    }

    #[tokio::test]
    async fn test_hooks_default_to_continue() {
        let hooks = LifecycleHooks::new();
        assert!(
            hooks
                .before_signature(BeforeSignature {
                    kind: TxKind::Wrap,
                    unsigned_hex: "0x".into(),
                })
                .await
        );
        assert!(
            hooks
                .before_submission(BeforeSubmission {
                    kind: TxKind::Wrap,
                    tx_id: B256::ZERO,
                    signed_hex: "0x".into(),
                })
                .await
        );
    }

    #[tokio::test]
    async fn test_set_and_clear() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = LifecycleHooks::new();
        hooks.set_before_signature(|event| async move { event.kind != TxKind::Unwrap });
        let sink = seen.clone();
        hooks.set_after_confirmation(move |event| {
            let sink = sink.clone();
            async move { sink.lock().unwrap().push(event.success) }
        });

        let event = |kind| BeforeSignature {
            kind,
            unsigned_hex: String::new(),
        };
        assert!(hooks.before_signature(event(TxKind::Wrap)).await);
        assert!(!hooks.before_signature(event(TxKind::Unwrap)).await);

        let snapshot = hooks.clone();
        hooks.clear_before_signature();
        assert!(hooks.before_signature(event(TxKind::Unwrap)).await);
        assert!(!snapshot.before_signature(event(TxKind::Unwrap)).await);

        snapshot
            .after_confirmation(AfterConfirmation {
                kind: TxKind::Wrap,
                tx_id: B256::ZERO,
                success: false,
                lifecycle: TransactionLifecycle::new_built(TxKind::Wrap, 0),
            })
            .await;
        assert_eq!(*seen.lock().unwrap(), vec![false]);
        assert_eq!(
            format!("{:?}", hooks),
            "LifecycleHooks { before_signature: false, before_submission: false, after_submission: false, after_confirmation: true }"
        );
    }
}
