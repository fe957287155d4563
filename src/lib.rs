//! Chainstore: embed application payloads in Bitcoin transactions and read them back.
//!
//! # Architecture
//!
//! ```text
//! ChainStore (entry point)
//!   │
//!   ├── write ──► KeyPathResolver ─► CoinSelector ─► payload ─► TransactionBuilder ─► Broadcaster
//!   │
//!   ├── read ───► KeyPathResolver (watch-only bootstrap) ─► HistoryDecoder
//!   │
//!   ├── sync ───► ConfirmationWaiter (polls the wallet)
//!   │
//!   └── accounts ► BalanceAggregator
//!
//! LedgerService / WalletService (traits) ── implemented by the host, or service::memory
//! ```
//!
//! # Operations
//!
//! | Operation | Method | Description |
//! |------|--------|-------------|
//! | write | `store.write(addr, data, &opts)` | Fund, sign and broadcast a payload transaction |
//! | read | `store.read(&opts)` | Decoded history, filtered by source/destination |
//! | sync | `store.sync(addr, txid, 3)` | Wait for confirmation depth |
//! | accounts | `store.accounts()` | Balance per address with wallet labels |
//! | lookup | `store.lookup(addr)` | Owning wallet/account/derivation path |
//!
//! # Features
//!
//! - `native` - installs the `tracing-subscriber` logger (`logging::init_logging`)
//!
//! # Usage
//!
//! ```ignore
//! use chainstore::{ChainStore, StoreConfig, Network, WriteOptions, ReadOptions};
//!
//! let store = ChainStore::new(ledger, wallet, StoreConfig::new(Network::Testnet).with_passphrase("secret"));
//!
//! let receipt = store.write(&address, b"hello", &WriteOptions::default()).await?;
//! store.sync(&address, &receipt.txid, 3).await?;
//!
//! for record in store.read(&ReadOptions::from_src(&address)).await? {
//!     println!("{} {:?}", record.txid, record.payload());
//! }
//! ```

// =============================================================================
// Core
// =============================================================================
pub mod config;
pub mod error;
pub mod keys;
pub mod payload;
pub mod service;

// =============================================================================
// Components
// =============================================================================
pub mod balance;
pub mod broadcast;
pub mod builder;
pub mod coins;
pub mod confirm;
pub mod events;
pub mod history;
pub mod resolver;
pub mod store;

#[cfg(feature = "native")]
pub mod logging;

// =============================================================================
// Re-exports
// =============================================================================
pub use balance::{AddressBalance, BalanceAggregator};
pub use broadcast::Broadcaster;
pub use builder::{TransactionBuilder, ValueOutput, WriteOptions, WriteReceipt};
pub use coins::CoinSelector;
pub use config::{Network, StoreConfig};
pub use confirm::ConfirmationWaiter;
pub use error::{StoreError, StoreResult};
pub use events::{events_until, Subscription};
pub use history::{HistoryDecoder, HistoryRecord, OutputRecord, OutputType, ReadOptions, SourceRecord};
pub use keys::MasterKey;
pub use resolver::{KeyPathResolver, WalletKeyPath};
pub use service::{Coin, EventChannel, LedgerService, WalletService};
pub use store::{ChainStore, DEFAULT_CONFIRMATIONS};
