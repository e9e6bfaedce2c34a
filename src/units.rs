//! Unit conversion between the two ledgers
//!
//! The A-ledger counts in wei, the U-ledger in nano units; one nano unit is
//! 10^9 wei. Amounts crossing the ledgers must be exact multiples.

use crate::{Error, Result};
use alloy_primitives::U256;

/// Wei per U-ledger unit (one gwei)
pub const WEI_PER_NANO: u64 = 1_000_000_000;

/// Converts a wei amount into nano units, rejecting amounts with a sub-gwei remainder
pub fn to_nano(wei: U256) -> Result<u64> {
    let factor = U256::from(WEI_PER_NANO);
    if !(wei % factor).is_zero() {
        return Err(Error::InvalidUnitAlignment(wei));
    }
    u64::try_from(wei / factor)
        .map_err(|_| Error::InvalidParameter(format!("amount {wei} exceeds the U-ledger range")))
}

pub fn to_wei(nano: u64) -> U256 {
    U256::from(nano) * U256::from(WEI_PER_NANO)
}

pub fn floor_to_gwei(wei: u128) -> u128 {
    let factor = u128::from(WEI_PER_NANO);
    wei / factor * factor
}

pub fn ceil_to_gwei(wei: u128) -> u128 {
    let factor = u128::from(WEI_PER_NANO);
    wei.div_ceil(factor) * factor
}
