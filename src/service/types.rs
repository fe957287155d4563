use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference to one transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outpoint {
    pub txid: String,
    pub index: u32,
}

impl Outpoint {
    pub fn new(txid: impl Into<String>, index: u32) -> Self {
        Self { txid: txid.into(), index }
    }
}

/// Spendable output owned by a wallet. Unique by `(txid, index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub txid: String,
    pub index: u32,
    pub address: String,
    pub value: u64,
    #[serde(default)]
    pub locked: bool,
}

impl Coin {
    pub fn outpoint(&self) -> Outpoint {
        Outpoint::new(self.txid.clone(), self.index)
    }
}

/// Derivation info the wallet reports for one of its addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// Account name.
    pub account: String,
    pub account_index: u32,
    pub branch: u32,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub network: String,
    pub height: u32,
}

/// Address/value pair of a wallet-annotated input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPart {
    pub address: Option<String>,
    pub value: u64,
}

/// Wallet view of a transaction: raw bytes plus the wallet's input and
/// output annotations, index-aligned with the raw transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTx {
    pub hash: String,
    /// Block height, `-1` while unconfirmed.
    pub height: i64,
    pub time: i64,
    pub confirmations: u32,
    /// Hex-encoded raw transaction.
    pub tx: String,
    pub inputs: Vec<TxPart>,
    pub outputs: Vec<TxPart>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletOptions {
    pub witness: bool,
    pub watch_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOptions {
    pub witness: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletEvent {
    pub wallet_id: String,
    pub data: Value,
}
