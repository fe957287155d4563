//! ChainStore - the facade hosts talk to
//!
//! Owns the collaborator handles, the shared [`KeyPathResolver`] and the
//! configuration. Every component gets the same resolver, so an address is
//! looked up in the wallet registries at most once per store.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::balance::{AddressBalance, BalanceAggregator};
use crate::builder::{TransactionBuilder, WriteOptions, WriteReceipt};
use crate::confirm::ConfirmationWaiter;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::events;
use crate::history::{HistoryDecoder, HistoryRecord, ReadOptions};
use crate::resolver::{KeyPathResolver, WalletKeyPath};
use crate::service::{LedgerService, WalletService, WalletTx};

/// Confirmations `sync` waits for unless told otherwise.
pub const DEFAULT_CONFIRMATIONS: u32 = 3;

pub struct ChainStore {
    wallet: Arc<dyn WalletService>,
    config: Arc<StoreConfig>,
    resolver: Arc<KeyPathResolver>,
    builder: TransactionBuilder,
    history: HistoryDecoder,
    balances: BalanceAggregator,
    confirmations: ConfirmationWaiter,
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ChainStore {
    pub fn new(ledger: Arc<dyn LedgerService>, wallet: Arc<dyn WalletService>, config: StoreConfig) -> Self {
        let config = Arc::new(config);
        let resolver = Arc::new(KeyPathResolver::new(wallet.clone()));
        Self {
            builder: TransactionBuilder::new(ledger.clone(), wallet.clone(), resolver.clone(), config.clone()),
            history: HistoryDecoder::new(ledger, wallet.clone(), resolver.clone(), config.clone()),
            balances: BalanceAggregator::new(wallet.clone(), resolver.clone()),
            confirmations: ConfirmationWaiter::new(wallet.clone(), resolver.clone(), config.network, config.poll_interval),
            write_locks: Mutex::new(HashMap::new()),
            wallet,
            config,
            resolver,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<KeyPathResolver> {
        &self.resolver
    }

    /// Owning wallet path of `address`, `None` when no wallet owns it.
    pub async fn lookup(&self, address: &str) -> StoreResult<Option<WalletKeyPath>> {
        self.resolver.resolve(address).await
    }

    /// Balance per address across every wallet.
    pub async fn accounts(&self) -> StoreResult<Vec<AddressBalance>> {
        self.balances.accounts().await
    }

    /// Embed `data` in a transaction funded by `address`.
    ///
    /// With `serialize_writes` on, writes from the same address run one at a
    /// time from coin selection until the spent coins are locked. The lock
    /// entry is dropped once no writer for the address remains.
    pub async fn write(&self, address: &str, data: impl AsRef<[u8]>, opts: &WriteOptions) -> StoreResult<WriteReceipt> {
        let data = data.as_ref();
        if !self.config.serialize_writes {
            return self.builder.build(address, data, opts).await;
        }
        let lock = self.write_lock(address).await;
        let result = {
            let _guard = lock.lock().await;
            self.builder.build(address, data, opts).await
        };
        self.release_write_lock(address, lock).await;
        result
    }

    /// Wait until `txid` has `confirmations` confirmations.
    pub async fn sync(&self, address: &str, txid: &str, confirmations: u32) -> StoreResult<HistoryRecord> {
        self.confirmations.wait(address, txid, confirmations).await
    }

    pub async fn read(&self, opts: &ReadOptions) -> StoreResult<Vec<HistoryRecord>> {
        self.history.read(opts).await
    }

    /// Wait for a wallet event accepted by `handler`, bounded by the wallet's timeout.
    pub async fn events_until<F>(&self, event: &str, handler: F, initial: Option<Value>) -> StoreResult<()>
    where
        F: FnMut(&str, &Value) -> bool,
    {
        let initial = initial.map(|value| std::future::ready(Ok::<_, StoreError>(Some(value))));
        events::events_until(self.wallet.events(), event, self.wallet.timeout(), handler, initial).await
    }

    /// Resolve once the wallet owning `address` knows `txid`, either already
    /// or through a `tx` event.
    pub async fn wait_for_transaction(&self, address: &str, txid: &str) -> StoreResult<()> {
        let path = self
            .resolver
            .resolve(address)
            .await?
            .ok_or_else(|| StoreError::AddressNotFollowed(address.to_string()))?;
        let wallet = self.wallet.clone();
        let known = async move {
            let tx: StoreResult<Option<WalletTx>> = wallet.transaction(&path.wallet, txid).await;
            tx.and_then(|tx| tx.map(serde_json::to_value).transpose().map_err(|e| StoreError::Decode(e.to_string())))
        };
        events::events_until(
            self.wallet.events(),
            "tx",
            self.wallet.timeout(),
            |_, data| data.get("hash").and_then(Value::as_str) == Some(txid),
            Some(known),
        )
        .await
    }

    async fn write_lock(&self, address: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().await;
        if !locks.contains_key(address) {
            debug!(address, "new write lock");
        }
        locks.entry(address.to_string()).or_default().clone()
    }

    async fn release_write_lock(&self, address: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.write_locks.lock().await;
        // map entry plus ours: nobody else is waiting
        if Arc::strong_count(&lock) == 2 {
            locks.remove(address);
        }
    }

    #[cfg(test)]
    async fn write_lock_count(&self) -> usize {
        self.write_locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;
    use crate::keys::MasterKey;
    use crate::service::memory::{MemoryLedger, MemoryWallet};
    use crate::service::Coin;
    use bitcoin::bip32::Xpriv;

    fn store() -> (ChainStore, String) {
        let xprv = Xpriv::new_master(bitcoin::Network::Regtest, &[9u8; 64]).unwrap();
        let wallet = Arc::new(MemoryWallet::new());
        wallet.add_wallet("w", MasterKey::plain(&xprv));
        let address = wallet.add_derived_key("w", &xprv, Network::Regtest, "default", 0, 0, 0).unwrap();
        for n in 0..4u8 {
            let txid = format!("{:02x}", n + 1).repeat(32);
            wallet.add_coin("w", "default", Coin { txid, index: 0, address: address.clone(), value: 50_000, locked: false });
        }
        let ledger = Arc::new(MemoryLedger::new(Network::Regtest));
        (ChainStore::new(ledger, wallet, StoreConfig::new(Network::Regtest)), address)
    }

    #[tokio::test]
    async fn test_write_locks_are_released() {
        let (store, address) = store();
        store.write(&address, b"one", &WriteOptions::default()).await.unwrap();
        assert_eq!(store.write_lock_count().await, 0);

        let err = store.write("bcrt1qnobody", b"two", &WriteOptions::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::AddressNotFollowed(_)));
        assert_eq!(store.write_lock_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_writers_share_then_release_lock() {
        let (store, address) = store();
        let opts = WriteOptions::default();
        let (a, b, c) = tokio::join!(store.write(&address, b"a", &opts), store.write(&address, b"b", &opts), store.write(&address, b"c", &opts));
        a.unwrap();
        b.unwrap();
        c.unwrap();
        assert_eq!(store.write_lock_count().await, 0);
    }
}
