//! Chain collaborators
//!
//! How chain state is fetched is left to the implementor: RPC transports,
//! indexers or in-memory ledgers all fit behind these traits.

use crate::types::{
    AccountReceipt, AssetId, LedgerId, LedgerKind, NodeId, TxId, Utxo, UtxoAddress, UtxoTxStatus,
};
use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a chain collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected by node: {0}")]
    Rejected(String),
}

/// Outcome of a failed gas estimation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimulationError {
    /// Execution would revert, with the decoded reason
    #[error("reverted: {0}")]
    Reverted(String),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Fee market snapshot; absent values mean the node did not report them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeeData {
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}

/// Identifiers both ledgers agree on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerIds {
    pub network_id: u32,
    pub account_ledger: LedgerId,
    pub utxo_ledger: LedgerId,
    pub asset_id: AssetId,
}

impl LedgerIds {
    pub fn id_of(&self, ledger: LedgerKind) -> LedgerId {
        match ledger {
            LedgerKind::Account => self.account_ledger,
            LedgerKind::Utxo => self.utxo_ledger,
        }
    }
}

/// Read-only A-ledger call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainStateReader: Send + Sync {
    async fn chain_id(&self) -> Result<u64, ChainError>;

    async fn ledger_ids(&self) -> Result<LedgerIds, ChainError>;

    async fn fee_data(&self) -> Result<FeeData, ChainError>;

    async fn nonce(&self, address: Address) -> Result<u64, ChainError>;

    async fn account_balance(&self, address: Address) -> Result<U256, ChainError>;

    /// Unspent outputs held on `ledger` for `owner`. With `source` set, only the
    /// outputs exported from that ledger and waiting in atomic memory.
    async fn utxos(
        &self,
        ledger: LedgerKind,
        owner: UtxoAddress,
        source: Option<LedgerId>,
    ) -> Result<Vec<Utxo>, ChainError>;

    async fn staked_balance(&self, owner: UtxoAddress) -> Result<u64, ChainError>;

    /// End of the validator's staking period (unix seconds), `None` if unknown
    async fn validator_end_time(&self, node_id: NodeId) -> Result<Option<u64>, ChainError>;

    /// `None` while the transaction is not yet mined
    async fn account_receipt(&self, tx_id: TxId) -> Result<Option<AccountReceipt>, ChainError>;

    async fn utxo_tx_status(
        &self,
        ledger: LedgerKind,
        tx_id: TxId,
    ) -> Result<UtxoTxStatus, ChainError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContractCallSimulator: Send + Sync {
    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, SimulationError>;

    async fn call(&self, request: &CallRequest) -> Result<Bytes, ChainError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast_account_tx(&self, raw: Bytes) -> Result<TxId, ChainError>;

    /// Issues a U-ledger transaction, or an atomic one when `ledger` is the A-ledger
    async fn issue_utxo_tx(&self, ledger: LedgerKind, raw: Bytes) -> Result<TxId, ChainError>;
}

/// Everything the coordinator needs from the chain
pub trait LedgerClient: ChainStateReader + ContractCallSimulator + Broadcaster {}

impl<T> LedgerClient for T where T: ChainStateReader + ContractCallSimulator + Broadcaster {}
