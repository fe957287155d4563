//! HistoryDecoder - wallet history → decoded payload and value records
//!
//! # Scope resolution
//!
//! ```text
//! src/dst address given, wallet+account not ──► KeyPathResolver
//!         │ owned by no wallet
//!         ▼
//! watch-only bootstrap: create wallet, account named after the address,
//! import the address, rescan from genesis
//! ```

use bitcoin::{Address, Script, Transaction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{Network, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::payload::nulldata;
use crate::resolver::KeyPathResolver;
use crate::service::{AccountOptions, LedgerService, TxPart, WalletOptions, WalletService, WalletTx};

/// Filters for [`HistoryDecoder::read`]. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOptions {
    /// Keep only transactions with an input from this address.
    pub src_addr: Option<String>,
    /// Keep only transactions with an output to this address.
    pub dst_addr: Option<String>,
    pub wallet: Option<String>,
    pub account: Option<String>,
    /// Range query bounds. A missing start means the epoch, a missing end means now.
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl ReadOptions {
    pub fn from_src(address: impl Into<String>) -> Self { Self { src_addr: Some(address.into()), ..Default::default() } }
    pub fn from_dst(address: impl Into<String>) -> Self { Self { dst_addr: Some(address.into()), ..Default::default() } }
    pub fn in_account(wallet: impl Into<String>, account: impl Into<String>) -> Self {
        Self { wallet: Some(wallet.into()), account: Some(account.into()), ..Default::default() }
    }
    pub fn with_src(mut self, address: impl Into<String>) -> Self { self.src_addr = Some(address.into()); self }
    pub fn with_dst(mut self, address: impl Into<String>) -> Self { self.dst_addr = Some(address.into()); self }
    pub fn between(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }
}

/// Standard script template names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    NullData,
    PubkeyHash,
    ScriptHash,
    WitnessPubkeyHash,
    WitnessScriptHash,
    WitnessTaproot,
    Pubkey,
    Nonstandard,
}

impl OutputType {
    pub fn of(script: &Script) -> Self {
        if script.is_op_return() {
            OutputType::NullData
        } else if script.is_p2pkh() {
            OutputType::PubkeyHash
        } else if script.is_p2sh() {
            OutputType::ScriptHash
        } else if script.is_p2wpkh() {
            OutputType::WitnessPubkeyHash
        } else if script.is_p2wsh() {
            OutputType::WitnessScriptHash
        } else if script.is_p2tr() {
            OutputType::WitnessTaproot
        } else if script.is_p2pk() {
            OutputType::Pubkey
        } else {
            OutputType::Nonstandard
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputType::NullData => "nulldata",
            OutputType::PubkeyHash => "pubkeyhash",
            OutputType::ScriptHash => "scripthash",
            OutputType::WitnessPubkeyHash => "witnesspubkeyhash",
            OutputType::WitnessScriptHash => "witnessscripthash",
            OutputType::WitnessTaproot => "witnesstaproot",
            OutputType::Pubkey => "pubkey",
            OutputType::Nonstandard => "nonstandard",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub value: u64,
    pub address: Option<String>,
    /// Transaction whose output this input spends.
    pub txid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputRecord {
    Data {
        #[serde(rename = "type")]
        kind: OutputType,
        #[serde(with = "hex::serde")]
        data: Vec<u8>,
    },
    Value {
        #[serde(rename = "type")]
        kind: OutputType,
        value: u64,
        address: Option<String>,
    },
}

impl OutputRecord {
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            OutputRecord::Data { data, .. } => Some(data),
            OutputRecord::Value { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Block height, `None` while unconfirmed.
    pub block: Option<u32>,
    pub txid: String,
    pub time: i64,
    pub confirmations: u32,
    pub srcs: Vec<SourceRecord>,
    pub dsts: Vec<OutputRecord>,
}

impl HistoryRecord {
    /// Concatenated bytes of every data output, in output order.
    pub fn payload(&self) -> Vec<u8> {
        self.dsts.iter().filter_map(OutputRecord::data).flatten().copied().collect()
    }
}

/// Decode one wallet transaction. Wallet annotations supply input values and
/// addresses; output addresses fall back to the script when not annotated.
pub fn decode_wallet_tx(wtx: &WalletTx, network: Network) -> StoreResult<HistoryRecord> {
    let raw = hex::decode(&wtx.tx).map_err(|e| StoreError::Decode(format!("tx {}: {}", wtx.hash, e)))?;
    let tx: Transaction = bitcoin::consensus::deserialize(&raw).map_err(|e| StoreError::Decode(format!("tx {}: {}", wtx.hash, e)))?;

    let srcs = tx
        .input
        .iter()
        .enumerate()
        .map(|(i, input)| {
            let part = wtx.inputs.get(i);
            SourceRecord {
                value: part.map_or(0, |p| p.value),
                address: part.and_then(|p| p.address.clone()),
                txid: input.previous_output.txid.to_string(),
            }
        })
        .collect();

    let dsts = tx
        .output
        .iter()
        .enumerate()
        .map(|(i, out)| {
            let kind = OutputType::of(&out.script_pubkey);
            match nulldata(&out.script_pubkey) {
                Some(data) => OutputRecord::Data { kind, data },
                None => {
                    let address = wtx
                        .outputs
                        .get(i)
                        .and_then(|p| p.address.clone())
                        .or_else(|| Address::from_script(&out.script_pubkey, network.to_bitcoin()).ok().map(|a| a.to_string()));
                    OutputRecord::Value { kind, value: out.value.to_sat(), address }
                }
            }
        })
        .collect();

    Ok(HistoryRecord {
        block: u32::try_from(wtx.height).ok(),
        txid: wtx.hash.clone(),
        time: wtx.time,
        confirmations: wtx.confirmations,
        srcs,
        dsts,
    })
}

fn mentions(parts: &[TxPart], address: &str) -> bool {
    parts.iter().any(|p| p.address.as_deref() == Some(address))
}

pub struct HistoryDecoder {
    ledger: Arc<dyn LedgerService>,
    wallet: Arc<dyn WalletService>,
    resolver: Arc<KeyPathResolver>,
    config: Arc<StoreConfig>,
}

impl HistoryDecoder {
    pub fn new(ledger: Arc<dyn LedgerService>, wallet: Arc<dyn WalletService>, resolver: Arc<KeyPathResolver>, config: Arc<StoreConfig>) -> Self {
        Self { ledger, wallet, resolver, config }
    }

    pub async fn read(&self, opts: &ReadOptions) -> StoreResult<Vec<HistoryRecord>> {
        let (wallet, account) = self.scope(opts).await?;

        let txs = if opts.start_date.is_some() || opts.end_date.is_some() {
            let start = opts.start_date.map_or(0, |d| d.timestamp());
            let end = opts.end_date.unwrap_or_else(Utc::now).timestamp();
            self.wallet.history_range(&wallet, &account, start, end).await?
        } else {
            self.wallet.history(&wallet, &account).await?
        };
        let total = txs.len();

        let mut records = Vec::new();
        for tx in &txs {
            if opts.src_addr.as_deref().is_some_and(|src| !mentions(&tx.inputs, src)) {
                continue;
            }
            if opts.dst_addr.as_deref().is_some_and(|dst| !mentions(&tx.outputs, dst)) {
                continue;
            }
            records.push(decode_wallet_tx(tx, self.config.network)?);
        }
        debug!(wallet = %wallet, account = %account, total, kept = records.len(), "read history");
        Ok(records)
    }

    /// Wallet and account whose history is read.
    async fn scope(&self, opts: &ReadOptions) -> StoreResult<(String, String)> {
        let either = opts.src_addr.as_deref().or(opts.dst_addr.as_deref());

        match (either, &opts.wallet, &opts.account) {
            (_, Some(wallet), Some(account)) => Ok((wallet.clone(), account.clone())),
            (Some(address), _, _) => {
                for candidate in [opts.src_addr.as_deref(), opts.dst_addr.as_deref()].into_iter().flatten() {
                    if let Some(path) = self.resolver.resolve(candidate).await? {
                        return Ok((path.wallet, path.account));
                    }
                }
                self.bootstrap(address).await
            }
            (None, Some(wallet), None) => Ok((wallet.clone(), "default".to_string())),
            (None, None, _) => Err(StoreError::InvalidOption("read needs a wallet or an address".into())),
        }
    }

    /// Follow an address no wallet owns through the watch-only wallet.
    async fn bootstrap(&self, address: &str) -> StoreResult<(String, String)> {
        let wallet = self.config.watch_only_wallet.clone();
        if let Err(e) = self.wallet.create_wallet(&wallet, &WalletOptions { witness: true, watch_only: true }).await {
            debug!(wallet = %wallet, error = %e, "watch-only wallet not created");
        }
        self.wallet.create_account(&wallet, address, &AccountOptions { witness: true }).await?;
        self.wallet.import_address(&wallet, address, address).await?;
        self.ledger.reset_scan(0).await?;
        info!(wallet = %wallet, address, "watching address, rescanning from genesis");
        Ok((wallet, address.to_string()))
    }
}
