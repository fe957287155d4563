//! Service - Ledger node and wallet collaborators
//!
//! The store never talks to the network directly. Everything it needs from
//! the node (network, broadcast, rescan) and from the wallet (keys, coins,
//! locks, history, watch-only import, events) goes through these traits.
//!
//! ```text
//! ChainStore
//!     │
//!     ├── LedgerService  → network info, broadcast, rescan
//!     │
//!     └── WalletService  → wallets, coins, locks, master keys, key info, history
//!             │
//!             └── EventChannel → bind/unbind by event name
//! ```
//!
//! [`memory`] provides in-process implementations for tests and simulation.

pub mod memory;
mod types;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::StoreResult;
use crate::keys::MasterKey;

pub use types::{
    AccountOptions, Coin, KeyInfo, NetworkInfo, Outpoint, TxPart, WalletEvent, WalletOptions,
    WalletTx,
};

#[async_trait]
pub trait LedgerService: Send + Sync {
    async fn network_info(&self) -> StoreResult<NetworkInfo>;
    async fn broadcast(&self, raw_tx_hex: &str) -> StoreResult<()>;
    /// Rewind the wallet's chain scan cursor to `height`.
    async fn reset_scan(&self, height: u32) -> StoreResult<()>;
}

#[async_trait]
pub trait WalletService: Send + Sync {
    async fn list_wallets(&self) -> StoreResult<Vec<String>>;
    /// Unspent coins of a wallet, optionally restricted to one account.
    async fn coins(&self, wallet: &str, account: Option<&str>) -> StoreResult<Vec<Coin>>;
    async fn locked_coins(&self, wallet: &str) -> StoreResult<Vec<Outpoint>>;
    async fn lock_coin(&self, wallet: &str, txid: &str, index: u32) -> StoreResult<()>;
    async fn master_key(&self, wallet: &str) -> StoreResult<MasterKey>;
    async fn key_info(&self, wallet: &str, address: &str) -> StoreResult<Option<KeyInfo>>;
    async fn transaction(&self, wallet: &str, txid: &str) -> StoreResult<Option<WalletTx>>;
    async fn history(&self, wallet: &str, account: &str) -> StoreResult<Vec<WalletTx>>;
    /// History with `start <= time <= end`, both unix seconds.
    async fn history_range(&self, wallet: &str, account: &str, start: i64, end: i64) -> StoreResult<Vec<WalletTx>>;
    async fn create_wallet(&self, id: &str, opts: &WalletOptions) -> StoreResult<()>;
    async fn create_account(&self, wallet: &str, name: &str, opts: &AccountOptions) -> StoreResult<()>;
    async fn import_address(&self, wallet: &str, account: &str, address: &str) -> StoreResult<()>;

    fn events(&self) -> Arc<dyn EventChannel>;
    /// How long an event wait may last before it fails with a timeout.
    fn timeout(&self) -> Duration;
}

/// Wallet event socket. Each `bind` returns a subscription id that must be
/// passed back to `unbind` exactly once.
pub trait EventChannel: Send + Sync {
    fn bind(&self, event: &str) -> (u64, mpsc::UnboundedReceiver<WalletEvent>);
    fn unbind(&self, event: &str, id: u64);
}
