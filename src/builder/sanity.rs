//! Consensus-level structural checks run before broadcast.
//!
//! Reasons use the reject strings nodes return for the same failures.

use bitcoin::Transaction;
use std::collections::HashSet;

/// Largest base (non-witness) size a transaction may have.
pub const MAX_BLOCK_SIZE: usize = 1_000_000;
/// 21M BTC in satoshis.
pub const MAX_MONEY: u64 = 21_000_000 * 100_000_000;

pub fn check_sanity(tx: &Transaction) -> Result<(), &'static str> {
    if tx.input.is_empty() {
        return Err("bad-txns-vin-empty");
    }
    if tx.output.is_empty() {
        return Err("bad-txns-vout-empty");
    }
    if tx.base_size() > MAX_BLOCK_SIZE {
        return Err("bad-txns-oversize");
    }

    let mut total: u64 = 0;
    for output in &tx.output {
        let value = output.value.to_sat();
        if value > MAX_MONEY {
            return Err("bad-txns-vout-toolarge");
        }
        total = total.saturating_add(value);
        if total > MAX_MONEY {
            return Err("bad-txns-txouttotal-toolarge");
        }
    }

    let mut seen = HashSet::with_capacity(tx.input.len());
    for input in &tx.input {
        if !seen.insert(input.previous_output) {
            return Err("bad-txns-inputs-duplicate");
        }
    }

    if tx.is_coinbase() {
        let len = tx.input[0].script_sig.len();
        if !(2..=100).contains(&len) {
            return Err("bad-cb-length");
        }
    } else if tx.input.iter().any(|input| input.previous_output.is_null()) {
        return Err("bad-txns-prevout-null");
    }
    Ok(())
}

/// Inputs must cover outputs. Returns the fee.
pub fn check_inputs(tx: &Transaction, input_value: u64) -> Result<u64, &'static str> {
    if input_value > MAX_MONEY {
        return Err("bad-txns-inputvalues-outofrange");
    }
    let output_value = tx
        .output
        .iter()
        .try_fold(0u64, |acc, o| acc.checked_add(o.value.to_sat()))
        .ok_or("bad-txns-txouttotal-toolarge")?;
    input_value.checked_sub(output_value).ok_or("bad-txns-in-belowout")
}
