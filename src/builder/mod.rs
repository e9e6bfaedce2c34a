//! Unsigned transaction construction for both ledgers

mod account;
mod utxo;

pub use account::{gas_ceiling, AccountTxBuilder};
pub use utxo::{select_utxos, UtxoTxBuilder};
