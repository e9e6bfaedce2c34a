//! Error types for the transaction coordinator

use crate::chain::ChainError;
use alloy_primitives::U256;
use thiserror::Error;

/// Coordinator error type
#[derive(Error, Debug)]
pub enum Error {
    /// Gas simulation reported that the transaction would revert
    #[error("The transaction is expected to fail: {0}")]
    SimulationFailure(String),

    /// The identity recovered from a signature is not the expected one
    #[error("Signature mismatch: expected {expected}, recovered {recovered}")]
    SignatureMismatch { expected: String, recovered: String },

    /// Polling ended before the transaction reached a terminal status
    #[error("Transaction {0} was not confirmed in time")]
    NotConfirmed(String),

    /// The transaction reached a terminal status other than success
    #[error("Transaction {0} failed")]
    TransactionFailed(String),

    /// Not enough spendable funds on the ledger the transaction debits
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: U256, available: U256 },

    /// Exported funds waiting for import do not cover the requested amount
    #[error("Insufficient exported balance: required {required}, available {available}")]
    InsufficientExportedBalance { required: u64, available: u64 },

    /// Amount is not a whole number of U-ledger units
    #[error("Amount {0} is not an integer multiple of 10^9")]
    InvalidUnitAlignment(U256),

    /// The signing identity offers no capability usable on this ledger
    #[error("No signing capability available: {0}")]
    NoSigningCapability(String),

    /// A sign-and-submit signer returned something that is not a 32 byte hash
    #[error("Invalid transaction id: {0}")]
    InvalidTransactionId(String),

    /// Malformed signature bytes
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Caller supplied argument rejected before any network call
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Contract name could not be resolved through the registry
    #[error("Unknown contract: {0}")]
    UnknownContract(String),

    /// Chain collaborator failure
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// ABI encoding or decoding failure
    #[error("ABI error: {0}")]
    Abi(#[from] alloy_sol_types::Error),

    /// Binary encoding of a U-ledger transaction failed
    #[error("Codec error: {0}")]
    Codec(#[from] std::io::Error),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
