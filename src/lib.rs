//! # Dual-ledger transaction coordinator
//!
//! Moves value and claims rewards across the two ledgers of one network: an
//! account-balance ledger (A-ledger) and an unspent-output ledger (U-ledger),
//! bridged by export and import transactions.
//!
//! This crate provides:
//! - Fee estimation and transaction construction for both ledgers
//! - Signer capability negotiation with recovered-identity checks
//! - The sign, submit and confirm pipeline with veto-capable lifecycle hooks
//! - Threshold group-account (multisig) coordination
//! - Cross-ledger transfers as an explicit export/import saga
//! - One entry point per business operation on [`Network`]

#![warn(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]
#![allow(missing_docs)] // Internal implementation details

mod builder;
mod chain;
mod config;
mod contracts;
mod coordinator;
mod error;
mod fee;
mod lifecycle;
mod multisig;
mod poller;
mod signer;
mod submission;
mod transfer;
mod types;
mod units;

#[cfg(test)]
mod test_utils;

pub use builder::{gas_ceiling, select_utxos, AccountTxBuilder, UtxoTxBuilder};
pub use chain::{
    Broadcaster, CallRequest, ChainError, ChainStateReader, ContractCallSimulator, FeeData,
    LedgerClient, LedgerIds, SimulationError,
};
pub use config::{CoordinatorConfig, SafeDeployment};
pub use contracts::{
    ContractRegistry, IDistributionToDelegators, IFlareContractRegistry, IGnosisSafe,
    IGovernanceVotePower, IPChainStakeMirrorVerifier, IRNat, IRewardManager, ISafeProxyFactory,
    IValidatorRewardManager, IWNat, NamedContract, StakeLimits,
};
pub use coordinator::{Balance, ClaimOptions, Network};
pub use error::{Error, Result};
pub use fee::{atomic_fee, atomic_gas_cost, AccountFees, FeeEstimator};
pub use lifecycle::{
    AfterConfirmation, AfterSubmission, BeforeSignature, BeforeSubmission, LifecycleHooks,
    NotifyHook, PipelineStage, TransactionLifecycle, TxKind, VetoHook,
};
pub use multisig::{
    created_address, execution_signatures, ApprovalStatus, GroupAccount, MultisigAction,
    MultisigCoordinator, MultisigProposal, OwnerApproval, TargetCall,
};
pub use poller::{ConfirmationPoller, PollOutcome};
pub use signer::{
    validate_tx_id, AccountTxSigner, DigestSigner, IdentityKey, LocalKeySigner, LocalSigningMode,
    PrefixedMessageSigner, RawSignature, SignedTransaction, SignerCapabilities, SignerNegotiator,
    SigningIdentity, SubmittingSigner, UtxoTxSigner,
};
pub use submission::{SubmissionPipeline, TimeFn};
pub use transfer::{
    CrossLedgerTransferCoordinator, CrossLedgerTransferPlan, TransferDirection, TransferReport,
    TransferStage,
};
pub use types::{
    account_address, AccountCredit, AccountDebit, AccountReceipt, AccountTx, AssetId, LedgerId,
    LedgerKind, NodeId, ReceiptLog, StakeParams, TxId, TxReceipt, UnsignedTransaction, Utxo,
    UtxoAddress, UtxoOutput, UtxoOwners, UtxoTx, UtxoTxKind, UtxoTxStatus,
};
pub use units::{to_nano, to_wei, WEI_PER_NANO};
