//! Funding - pick inputs, compute the fee, add change

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use std::cmp::Ordering;
use std::str::FromStr;

use crate::error::{StoreError, StoreResult};
use crate::service::Coin;

/// A coin together with the script that locks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spendable {
    pub coin: Coin,
    pub script_pubkey: ScriptBuf,
}

impl Spendable {
    pub fn outpoint(&self) -> StoreResult<OutPoint> {
        let txid = Txid::from_str(&self.coin.txid).map_err(|e| StoreError::Decode(format!("txid {}: {}", self.coin.txid, e)))?;
        Ok(OutPoint { txid, vout: self.coin.index })
    }

    pub fn txout(&self) -> TxOut {
        TxOut { value: Amount::from_sat(self.coin.value), script_pubkey: self.script_pubkey.clone() }
    }
}

#[derive(Debug, Clone)]
pub struct FundingRequest<'a> {
    /// Candidate coins, already filtered for locks.
    pub coins: &'a [Spendable],
    /// Coins that must be spent no matter what.
    pub forced: &'a [Spendable],
    pub outputs: &'a [TxOut],
    pub change_script: ScriptBuf,
    /// Satoshis per 1000 virtual bytes.
    pub fee_rate: u64,
    pub max_fee: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Funding {
    pub inputs: Vec<Spendable>,
    pub change: Option<TxOut>,
    pub fee: u64,
}

impl Funding {
    pub fn input_value(&self) -> u64 {
        self.inputs.iter().map(|s| s.coin.value).sum()
    }
}

fn overflow(what: &str) -> StoreError {
    StoreError::InvalidOption(format!("{} overflows the satoshi range", what))
}

fn checked_sum(values: impl IntoIterator<Item = u64>, what: &str) -> StoreResult<u64> {
    values.into_iter().try_fold(0u64, |acc, v| acc.checked_add(v)).ok_or_else(|| overflow(what))
}

/// Largest-first selection. Forced coins go in first; further coins are
/// added until outputs plus fee are covered. Change below the dust limit is
/// left to the fee.
pub fn fund(req: &FundingRequest<'_>) -> StoreResult<Funding> {
    let out_total = checked_sum(req.outputs.iter().map(|o| o.value.to_sat()), "output total")?;

    let mut inputs: Vec<Spendable> = req.forced.to_vec();
    let mut candidates: Vec<&Spendable> = req.coins.iter().filter(|c| !req.forced.contains(c)).collect();
    candidates.sort_by(|a, b| {
        b.coin.value.cmp(&a.coin.value).then_with(|| a.coin.txid.cmp(&b.coin.txid)).then_with(|| a.coin.index.cmp(&b.coin.index))
    });
    let mut candidates = candidates.into_iter();
    let dust = req.change_script.minimal_non_dust().to_sat();

    loop {
        if !inputs.is_empty() {
            let total = checked_sum(inputs.iter().map(|s| s.coin.value), "input total")?;

            let change_out = TxOut { value: Amount::ZERO, script_pubkey: req.change_script.clone() };
            let fee_with_change = fee_for(&inputs, req.outputs, Some(&change_out), req.fee_rate, req.max_fee)?;
            let needed = checked_sum([out_total, fee_with_change, dust], "outputs plus fee")?;
            if total >= needed {
                let change = TxOut { value: Amount::from_sat(total - out_total - fee_with_change), ..change_out };
                return Ok(Funding { inputs, change: Some(change), fee: fee_with_change });
            }

            let fee_without_change = fee_for(&inputs, req.outputs, None, req.fee_rate, req.max_fee)?;
            if total >= checked_sum([out_total, fee_without_change], "outputs plus fee")? {
                return Ok(Funding { inputs, change: None, fee: total - out_total });
            }
        }

        match candidates.next() {
            Some(next) => inputs.push(next.clone()),
            None => {
                let available = checked_sum(inputs.iter().map(|s| s.coin.value), "input total")?;
                return Err(StoreError::InsufficientFunds(format!(
                    "available {} sat, outputs need {} sat plus fee",
                    available, out_total
                )));
            }
        }
    }
}

/// `ceil(rate * vsize / 1000)`, capped at `max_fee`.
pub fn fee_for(inputs: &[Spendable], outputs: &[TxOut], change: Option<&TxOut>, fee_rate: u64, max_fee: Option<u64>) -> StoreResult<u64> {
    let vsize = estimate_vsize(inputs, outputs, change)? as u64;
    let fee = fee_rate.checked_mul(vsize).ok_or_else(|| overflow("fee rate"))?.div_ceil(1_000);
    Ok(max_fee.map_or(fee, |cap| fee.min(cap)))
}

/// Virtual size of the transaction once signed, using worst-case signature sizes.
pub fn estimate_vsize(inputs: &[Spendable], outputs: &[TxOut], change: Option<&TxOut>) -> StoreResult<usize> {
    let input = inputs
        .iter()
        .map(|s| {
            let mut txin = TxIn { previous_output: s.outpoint()?, script_sig: ScriptBuf::new(), sequence: Sequence::MAX, witness: Witness::new() };
            if s.script_pubkey.is_p2wpkh() {
                txin.witness = Witness::from_slice(&[vec![0u8; 72], vec![0u8; 33]]);
            } else {
                // <sig> <pubkey> pushes
                txin.script_sig = ScriptBuf::from_bytes(vec![0u8; 1 + 72 + 1 + 33]);
            }
            Ok(txin)
        })
        .collect::<StoreResult<Vec<_>>>()?;
    let output = outputs.iter().cloned().chain(change.cloned()).collect();
    let tx = Transaction { version: Version::TWO, lock_time: LockTime::ZERO, input, output };
    Ok(tx.vsize())
}

/// Inputs by (txid, vout); data outputs first in emission order, then value
/// outputs by (value, script). Repeated builds of the same set serialize identically.
pub fn canonicalize(inputs: &mut [Spendable], outputs: &mut [TxOut]) {
    inputs.sort_by(|a, b| a.coin.txid.cmp(&b.coin.txid).then(a.coin.index.cmp(&b.coin.index)));
    outputs.sort_by(|a, b| match (a.script_pubkey.is_op_return(), b.script_pubkey.is_op_return()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.value.cmp(&b.value).then_with(|| a.script_pubkey.as_bytes().cmp(b.script_pubkey.as_bytes())),
    });
}
