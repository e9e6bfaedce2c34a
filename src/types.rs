//! Data model shared by both ledgers
//!
//! The A-ledger is account based and nonce ordered; its transactions are
//! EIP-1559 shaped and identified by the keccak hash of their signed encoding.
//! The U-ledger is output based; its transactions (and the atomic export and
//! import transactions issued on the A-ledger's atomic endpoint) are borsh
//! encoded behind a codec version and are identified by the SHA-256 hash of
//! their signed bytes.

use crate::{signer::RawSignature, Error, Result};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{Encodable, RlpEncodable};
use bitcoin::hashes::{hash160, Hash};
use borsh::{BorshDeserialize, BorshSerialize};
use secp256k1::PublicKey;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Identifier of one of the two ledgers of a network
pub type LedgerId = B256;

/// Identifier of the native asset
pub type AssetId = B256;

/// Transaction identifier on either ledger
pub type TxId = B256;

/// The two ledger models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerKind {
    /// Account-balance ledger (EVM style)
    Account,
    /// Unspent-output ledger
    Utxo,
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerKind::Account => write!(f, "A-ledger"),
            LedgerKind::Utxo => write!(f, "U-ledger"),
        }
    }
}

/// Short address owning outputs on the U-ledger: hash160 of the compressed public key
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
)]
pub struct UtxoAddress(pub [u8; 20]);

impl UtxoAddress {
    /// Address of a secp256k1 key
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self(hash160::Hash::hash(&public_key.serialize()).to_byte_array())
    }
}

impl fmt::Display for UtxoAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for UtxoAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let raw = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| Error::InvalidParameter(format!("U-ledger address {s}: {e}")))?;
        let bytes: [u8; 20] = raw
            .try_into()
            .map_err(|_| Error::InvalidParameter(format!("U-ledger address {s} is not 20 bytes")))?;
        Ok(Self(bytes))
    }
}

/// Account address derived from a secp256k1 public key
pub fn account_address(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    Address::from_slice(&keccak256(&uncompressed[1..])[12..])
}

/// Validator node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct NodeId(pub [u8; 20]);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeID-{}", hex::encode(self.0))
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let body = s.strip_prefix("NodeID-").unwrap_or(s);
        let raw = hex::decode(body.trim_start_matches("0x"))
            .map_err(|e| Error::InvalidParameter(format!("node id {s}: {e}")))?;
        let bytes: [u8; 20] = raw
            .try_into()
            .map_err(|_| Error::InvalidParameter(format!("node id {s} is not 20 bytes")))?;
        Ok(Self(bytes))
    }
}

/// Spend condition attached to an output
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct UtxoOwners {
    /// Addresses allowed to sign for the output
    pub addresses: Vec<UtxoAddress>,
    /// Number of those signatures required to spend
    pub threshold: u32,
    /// Unix seconds before which the output cannot be spent
    pub locktime: u64,
}

impl UtxoOwners {
    /// Single owner, threshold one, no lock
    pub fn single(address: UtxoAddress) -> Self {
        Self {
            addresses: vec![address],
            threshold: 1,
            locktime: 0,
        }
    }

    /// Whether `owner` alone can spend at time `now`
    pub fn spendable_by(&self, owner: &UtxoAddress, now: u64) -> bool {
        self.locktime <= now && self.threshold <= 1 && self.addresses.contains(owner)
    }
}

/// A consumable output
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Utxo {
    /// Transaction that created the output
    pub tx_id: TxId,
    /// Position among that transaction's outputs
    pub output_index: u32,
    /// Asset held
    pub asset_id: AssetId,
    /// Amount in nano units
    pub amount: u64,
    /// Spend condition
    pub owners: UtxoOwners,
}

impl Utxo {
    /// `(tx_id, output_index)`, unique per output
    pub fn outpoint(&self) -> (TxId, u32) {
        (self.tx_id, self.output_index)
    }
}

/// An output produced by a U-ledger transaction
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct UtxoOutput {
    /// Asset created
    pub asset_id: AssetId,
    /// Amount in nano units
    pub amount: u64,
    /// Spend condition
    pub owners: UtxoOwners,
}

/// A-ledger side input of an atomic export
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AccountDebit {
    /// Debited A-ledger account
    pub address: Address,
    /// Asset debited
    pub asset_id: AssetId,
    /// Nano units taken from the account, atomic fee included
    pub amount: u64,
    /// Account nonce the debit consumes
    pub nonce: u64,
}

/// A-ledger side output of an atomic import
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AccountCredit {
    /// Credited A-ledger account
    pub address: Address,
    /// Asset credited
    pub asset_id: AssetId,
    /// Nano units added to the account
    pub amount: u64,
}

/// Staking parameters shared by delegator and validator transactions
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct StakeParams {
    /// Validator node the stake goes to
    pub node_id: NodeId,
    /// Unix seconds
    pub start_time: u64,
    /// Unix seconds
    pub end_time: u64,
    /// Staked nano units
    pub weight: u64,
    /// Owners of the staking reward output
    pub reward_owners: UtxoOwners,
}

/// Kind-specific part of a U-ledger transaction
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum UtxoTxKind {
    /// Plain transfer between U-ledger outputs
    Base,
    /// U-ledger export into the A-ledger's atomic memory
    Export {
        destination: LedgerId,
        exported: Vec<UtxoOutput>,
    },
    /// U-ledger import of outputs the A-ledger exported
    Import {
        source: LedgerId,
        imported: Vec<Utxo>,
    },
    /// A-ledger export into the U-ledger's atomic memory
    AtomicExport {
        destination: LedgerId,
        debits: Vec<AccountDebit>,
        exported: Vec<UtxoOutput>,
    },
    /// A-ledger import of outputs the U-ledger exported
    AtomicImport {
        source: LedgerId,
        imported: Vec<Utxo>,
        credits: Vec<AccountCredit>,
    },
    /// Stake delegated to an existing validator
    AddDelegator {
        stake: StakeParams,
        staked: Vec<UtxoOutput>,
    },
    /// Stake registering a new validator
    AddValidator {
        stake: StakeParams,
        staked: Vec<UtxoOutput>,
        delegation_fee_bips: u32,
    },
}

impl UtxoTxKind {
    /// Whether the transaction is issued on the A-ledger's atomic endpoint
    pub fn is_atomic(&self) -> bool {
        matches!(
            self,
            UtxoTxKind::AtomicExport { .. } | UtxoTxKind::AtomicImport { .. }
        )
    }
}

/// Unsigned U-ledger (or atomic) transaction
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct UtxoTx {
    /// Network the transaction is valid on
    pub network_id: u32,
    /// Ledger the transaction executes on
    pub ledger: LedgerId,
    /// Outputs spent on the executing ledger
    pub inputs: Vec<Utxo>,
    /// Outputs created on the executing ledger
    pub outputs: Vec<UtxoOutput>,
    /// Kind-specific fields
    pub kind: UtxoTxKind,
    /// Free-form bytes carried with the transaction
    pub memo: Bytes,
}

const UTXO_CODEC_VERSION: u16 = 0;

impl UtxoTx {
    fn imported(&self) -> &[Utxo] {
        match &self.kind {
            UtxoTxKind::Import { imported, .. } | UtxoTxKind::AtomicImport { imported, .. } => {
                imported
            }
            _ => &[],
        }
    }

    /// Sum of everything the transaction spends
    pub fn consumed(&self) -> u128 {
        let debits: u128 = match &self.kind {
            UtxoTxKind::AtomicExport { debits, .. } => {
                debits.iter().map(|d| u128::from(d.amount)).sum()
            }
            _ => 0,
        };
        self.inputs
            .iter()
            .chain(self.imported())
            .map(|u| u128::from(u.amount))
            .sum::<u128>()
            + debits
    }

    /// Sum of everything the transaction creates
    pub fn produced(&self) -> u128 {
        let extra: u128 = match &self.kind {
            UtxoTxKind::Export { exported, .. } | UtxoTxKind::AtomicExport { exported, .. } => {
                exported.iter().map(|o| u128::from(o.amount)).sum()
            }
            UtxoTxKind::AddDelegator { staked, .. } | UtxoTxKind::AddValidator { staked, .. } => {
                staked.iter().map(|o| u128::from(o.amount)).sum()
            }
            UtxoTxKind::AtomicImport { credits, .. } => {
                credits.iter().map(|c| u128::from(c.amount)).sum()
            }
            UtxoTxKind::Base | UtxoTxKind::Import { .. } => 0,
        };
        self.outputs.iter().map(|o| u128::from(o.amount)).sum::<u128>() + extra
    }

    /// Implicit fee: consumed minus produced
    pub fn fee(&self) -> Result<u64> {
        let consumed = self.consumed();
        let produced = self.produced();
        let fee = consumed.checked_sub(produced).ok_or_else(|| {
            Error::InvalidParameter(format!(
                "transaction produces {produced} but only consumes {consumed}"
            ))
        })?;
        u64::try_from(fee).map_err(|_| Error::InvalidParameter(format!("fee {fee} overflows")))
    }

    /// One signature per spent output or account debit
    pub fn signature_count(&self) -> usize {
        let debits = match &self.kind {
            UtxoTxKind::AtomicExport { debits, .. } => debits.len(),
            _ => 0,
        };
        self.inputs.len() + self.imported().len() + debits
    }

    /// Structural checks: no outpoint spent twice, every amount in the native asset,
    /// produced never exceeds consumed
    pub fn validate(&self, asset_id: &AssetId) -> Result<()> {
        let mut seen = HashSet::new();
        for utxo in self.inputs.iter().chain(self.imported()) {
            if !seen.insert(utxo.outpoint()) {
                return Err(Error::InvalidParameter(format!(
                    "output {}:{} consumed twice",
                    utxo.tx_id, utxo.output_index
                )));
            }
            if &utxo.asset_id != asset_id {
                return Err(Error::InvalidParameter(format!(
                    "output {}:{} carries asset {}",
                    utxo.tx_id, utxo.output_index, utxo.asset_id
                )));
            }
        }
        if let Some(output) = self.outputs.iter().find(|o| &o.asset_id != asset_id) {
            return Err(Error::InvalidParameter(format!(
                "produced output carries asset {}",
                output.asset_id
            )));
        }
        self.fee().map(|_| ())
    }

    /// Canonical unsigned serialization: codec version, then the borsh
    /// encoding of the transaction
    pub fn unsigned_bytes(&self) -> Result<Bytes> {
        let mut out = Vec::new();
        UTXO_CODEC_VERSION.serialize(&mut out)?;
        self.serialize(&mut out)?;
        Ok(Bytes::from(out))
    }

    /// Digest every signer commits to
    pub fn signing_digest(&self) -> Result<B256> {
        Ok(B256::from_slice(&Sha256::digest(self.unsigned_bytes()?)))
    }

    /// Unsigned bytes followed by one credential per signature slot
    pub fn signed_bytes(&self, signatures: &[RawSignature]) -> Result<Bytes> {
        let mut out = self.unsigned_bytes()?.to_vec();
        let credentials: Vec<[u8; 65]> = signatures.iter().map(RawSignature::to_bytes).collect();
        credentials.serialize(&mut out)?;
        Ok(Bytes::from(out))
    }

    /// Identifier of a signed transaction
    pub fn tx_id(signed: &[u8]) -> TxId {
        B256::from_slice(&Sha256::digest(signed))
    }
}

const EIP1559_TX_TYPE: u8 = 0x02;

/// Unsigned A-ledger transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountTx {
    /// EIP-155 chain id
    pub chain_id: u64,
    /// Sender nonce
    pub nonce: u64,
    /// Sender, used for recovery checks and not encoded
    pub from: Address,
    /// Recipient or called contract
    pub to: Address,
    /// Value in wei
    pub value: U256,
    /// Call data, empty for plain transfers
    pub data: Bytes,
    /// Gas units
    pub gas_limit: u64,
    /// Wei per gas
    pub max_fee_per_gas: u128,
    /// Wei per gas
    pub max_priority_fee_per_gas: u128,
}

#[derive(RlpEncodable)]
struct Eip1559Fields {
    chain_id: u64,
    nonce: u64,
    max_priority_fee_per_gas: u128,
    max_fee_per_gas: u128,
    gas_limit: u64,
    to: Address,
    value: U256,
    data: Bytes,
    access_list: Vec<Address>,
}

#[derive(RlpEncodable)]
struct SignedEip1559Fields {
    chain_id: u64,
    nonce: u64,
    max_priority_fee_per_gas: u128,
    max_fee_per_gas: u128,
    gas_limit: u64,
    to: Address,
    value: U256,
    data: Bytes,
    access_list: Vec<Address>,
    y_parity: bool,
    r: U256,
    s: U256,
}

impl AccountTx {
    /// Typed unsigned encoding: `0x02 || rlp(fields)`
    pub fn unsigned_bytes(&self) -> Bytes {
        let fields = Eip1559Fields {
            chain_id: self.chain_id,
            nonce: self.nonce,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            max_fee_per_gas: self.max_fee_per_gas,
            gas_limit: self.gas_limit,
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            access_list: Vec::new(),
        };
        let mut out = vec![EIP1559_TX_TYPE];
        fields.encode(&mut out);
        Bytes::from(out)
    }

    /// Keccak-256 of the unsigned bytes
    pub fn signing_digest(&self) -> B256 {
        keccak256(self.unsigned_bytes())
    }

    /// Typed signed encoding, ready to broadcast
    pub fn signed_bytes(&self, signature: &RawSignature) -> Bytes {
        let fields = SignedEip1559Fields {
            chain_id: self.chain_id,
            nonce: self.nonce,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            max_fee_per_gas: self.max_fee_per_gas,
            gas_limit: self.gas_limit,
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            access_list: Vec::new(),
            y_parity: signature.v == 1,
            r: U256::from_be_bytes(signature.r.0),
            s: U256::from_be_bytes(signature.s.0),
        };
        let mut out = vec![EIP1559_TX_TYPE];
        fields.encode(&mut out);
        Bytes::from(out)
    }

    /// Id of a broadcast transaction: Keccak-256 of its signed bytes
    pub fn tx_id(signed: &[u8]) -> TxId {
        keccak256(signed)
    }

    /// Upper bound of what the sender pays: value plus gas at the max fee
    pub fn max_cost(&self) -> U256 {
        self.value + U256::from(self.gas_limit) * U256::from(self.max_fee_per_gas)
    }
}

/// Tagged union of the two transaction shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsignedTransaction {
    Account(AccountTx),
    Utxo(UtxoTx),
}

impl UnsignedTransaction {
    /// Ledger the transaction is submitted to. Atomic transactions go to
    /// the A-ledger.
    pub fn ledger_kind(&self) -> LedgerKind {
        match self {
            UnsignedTransaction::Account(_) => LedgerKind::Account,
            UnsignedTransaction::Utxo(tx) if tx.kind.is_atomic() => LedgerKind::Account,
            UnsignedTransaction::Utxo(_) => LedgerKind::Utxo,
        }
    }

    /// Canonical unsigned bytes of either shape
    pub fn unsigned_bytes(&self) -> Result<Bytes> {
        match self {
            UnsignedTransaction::Account(tx) => Ok(tx.unsigned_bytes()),
            UnsignedTransaction::Utxo(tx) => tx.unsigned_bytes(),
        }
    }

    /// 0x-prefixed hex of the unsigned bytes, as handed to hooks
    pub fn unsigned_hex(&self) -> Result<String> {
        Ok(format!("0x{}", hex::encode(self.unsigned_bytes()?)))
    }
}

impl From<AccountTx> for UnsignedTransaction {
    fn from(tx: AccountTx) -> Self {
        UnsignedTransaction::Account(tx)
    }
}

impl From<UtxoTx> for UnsignedTransaction {
    fn from(tx: UtxoTx) -> Self {
        UnsignedTransaction::Utxo(tx)
    }
}

/// Event log entry of an A-ledger receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptLog {
    /// Emitting contract
    pub address: Address,
    /// Indexed topics, event signature first
    pub topics: Vec<B256>,
    /// Non-indexed data
    pub data: Bytes,
}

/// A-ledger receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountReceipt {
    /// Id of the executed transaction
    pub tx_id: TxId,
    /// Whether execution succeeded
    pub success: bool,
    /// Block holding the transaction
    pub block_number: u64,
    /// Gas units consumed
    pub gas_used: u64,
    /// Events emitted, in order
    pub logs: Vec<ReceiptLog>,
}

/// Status of a U-ledger or atomic transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtxoTxStatus {
    /// Not seen by the node
    Unknown,
    Processing,
    /// Accepted into a block; final for atomic transactions
    Accepted,
    /// Committed; final on the U-ledger
    Committed,
    Rejected,
    /// Evicted before acceptance
    Dropped,
}

impl UtxoTxStatus {
    /// Final status on `ledger`: U-ledger transactions end committed, atomic
    /// transactions on the A-ledger end accepted
    pub fn is_terminal(&self, ledger: LedgerKind) -> bool {
        self.is_successful(ledger) || matches!(self, UtxoTxStatus::Rejected | UtxoTxStatus::Dropped)
    }

    /// Whether the status is the success state for `ledger`
    pub fn is_successful(&self, ledger: LedgerKind) -> bool {
        match ledger {
            LedgerKind::Utxo => *self == UtxoTxStatus::Committed,
            LedgerKind::Account => *self == UtxoTxStatus::Accepted,
        }
    }
}

/// Confirmation result of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxReceipt {
    Account(AccountReceipt),
    Utxo {
        tx_id: TxId,
        /// Ledger the transaction was issued on
        ledger: LedgerKind,
        status: UtxoTxStatus,
    },
}

impl TxReceipt {
    /// Id of the confirmed transaction
    pub fn tx_id(&self) -> TxId {
        match self {
            TxReceipt::Account(receipt) => receipt.tx_id,
            TxReceipt::Utxo { tx_id, .. } => *tx_id,
        }
    }

    /// Successful execution on the A-ledger, or the ledger's success status
    pub fn is_successful(&self) -> bool {
        match self {
            TxReceipt::Account(receipt) => receipt.success,
            TxReceipt::Utxo { ledger, status, .. } => status.is_successful(*ledger),
        }
    }

    /// Event logs. U-ledger receipts carry none.
    pub fn logs(&self) -> &[ReceiptLog] {
        match self {
            TxReceipt::Account(receipt) => &receipt.logs,
            TxReceipt::Utxo { .. } => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(byte: u8) -> UtxoAddress {
        UtxoAddress([byte; 20])
    }

    fn utxo(index: u32, amount: u64) -> Utxo {
        Utxo {
            tx_id: B256::repeat_byte(0xaa),
            output_index: index,
            asset_id: B256::repeat_byte(1),
            amount,
            owners: UtxoOwners::single(owner(7)),
        }
    }

    fn base_tx(inputs: Vec<Utxo>, outputs: Vec<u64>) -> UtxoTx {
        UtxoTx {
            network_id: 14,
            ledger: B256::repeat_byte(2),
            inputs,
            outputs: outputs
                .into_iter()
                .map(|amount| UtxoOutput {
                    asset_id: B256::repeat_byte(1),
                    amount,
                    owners: UtxoOwners::single(owner(8)),
                })
                .collect(),
            kind: UtxoTxKind::Base,
            memo: Bytes::new(),
        }
    }

    #[test]
    fn test_fee_is_consumed_minus_produced() {
        let tx = base_tx(vec![utxo(0, 700), utxo(1, 500)], vec![1_000, 150]);
        assert_eq!(tx.fee().unwrap(), 50);
        assert_eq!(tx.consumed() - tx.produced(), 50);
        assert!(tx.validate(&B256::repeat_byte(1)).is_ok());
    }

    #[test]
    fn test_validate_rejects_double_spend() {
        let tx = base_tx(vec![utxo(0, 700), utxo(0, 700)], vec![1_000]);
        let err = tx.validate(&B256::repeat_byte(1)).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn test_validate_rejects_foreign_asset() {
        let mut foreign = utxo(3, 900);
        foreign.asset_id = B256::repeat_byte(9);
        let tx = base_tx(vec![foreign], vec![100]);
        assert!(tx.validate(&B256::repeat_byte(1)).is_err());
    }

    #[test]
    fn test_overspending_tx_has_no_fee() {
        let tx = base_tx(vec![utxo(0, 100)], vec![101]);
        assert!(tx.fee().is_err());
    }

    #[test]
    fn test_atomic_export_accounting() {
        let tx = UtxoTx {
            network_id: 14,
            ledger: B256::repeat_byte(3),
            inputs: vec![],
            outputs: vec![],
            kind: UtxoTxKind::AtomicExport {
                destination: B256::repeat_byte(2),
                debits: vec![AccountDebit {
                    address: Address::repeat_byte(4),
                    asset_id: B256::repeat_byte(1),
                    amount: 1_000_350,
                    nonce: 3,
                }],
                exported: vec![UtxoOutput {
                    asset_id: B256::repeat_byte(1),
                    amount: 1_000_000,
                    owners: UtxoOwners::single(owner(7)),
                }],
            },
            memo: Bytes::new(),
        };
        assert_eq!(tx.fee().unwrap(), 350);
        assert_eq!(tx.signature_count(), 1);
        assert!(tx.kind.is_atomic());
    }

    #[test]
    fn test_digest_changes_with_content() {
        let a = base_tx(vec![utxo(0, 700)], vec![600]);
        let b = base_tx(vec![utxo(0, 700)], vec![601]);
        assert_ne!(a.signing_digest().unwrap(), b.signing_digest().unwrap());
        assert_eq!(a.signing_digest().unwrap(), a.clone().signing_digest().unwrap());
    }

    #[test]
    fn test_unsigned_bytes_carry_version_and_decode() {
        let tx = base_tx(vec![utxo(0, 700)], vec![600]);
        let bytes = tx.unsigned_bytes().unwrap();
        assert_eq!(&bytes[..2], &UTXO_CODEC_VERSION.to_le_bytes());
        assert_eq!(UtxoTx::try_from_slice(&bytes[2..]).unwrap(), tx);
        // no credentials, only the empty length prefix
        let signed = tx.signed_bytes(&[]).unwrap();
        assert_eq!(&signed[bytes.len()..], &[0u8; 4]);
    }

    #[test]
    fn test_account_tx_encoding_is_typed() {
        let tx = AccountTx {
            chain_id: 14,
            nonce: 0,
            from: Address::repeat_byte(1),
            to: Address::repeat_byte(2),
            value: U256::from(1u64),
            data: Bytes::new(),
            gas_limit: 21_000,
            max_fee_per_gas: 50_000_000_000,
            max_priority_fee_per_gas: 0,
        };
        let unsigned = tx.unsigned_bytes();
        assert_eq!(unsigned[0], 0x02);
        assert_eq!(tx.signing_digest(), keccak256(&unsigned));
        assert_eq!(
            tx.max_cost(),
            U256::from(1u64) + U256::from(21_000u64 * 50_000_000_000u64)
        );
    }

    #[test]
    fn test_status_success_depends_on_ledger() {
        assert!(UtxoTxStatus::Committed.is_successful(LedgerKind::Utxo));
        assert!(!UtxoTxStatus::Accepted.is_successful(LedgerKind::Utxo));
        assert!(!UtxoTxStatus::Accepted.is_terminal(LedgerKind::Utxo));
        assert!(UtxoTxStatus::Accepted.is_successful(LedgerKind::Account));
        assert!(!UtxoTxStatus::Committed.is_terminal(LedgerKind::Account));
        for ledger in [LedgerKind::Utxo, LedgerKind::Account] {
            assert!(UtxoTxStatus::Rejected.is_terminal(ledger));
            assert!(!UtxoTxStatus::Rejected.is_successful(ledger));
            assert!(!UtxoTxStatus::Processing.is_terminal(ledger));
        }
    }

    #[test]
    fn test_node_id_parsing() {
        let id: NodeId = "NodeID-0101010101010101010101010101010101010101".parse().unwrap();
        assert_eq!(id, NodeId([1; 20]));
        assert!("NodeID-01".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_utxo_owner_spendability() {
        let mut owners = UtxoOwners::single(owner(7));
        assert!(owners.spendable_by(&owner(7), 0));
        assert!(!owners.spendable_by(&owner(8), 0));
        owners.locktime = 100;
        assert!(!owners.spendable_by(&owner(7), 99));
        assert!(owners.spendable_by(&owner(7), 100));
    }
}
