//! In-process ledger and wallet services.
//!
//! Backed by plain maps behind a mutex. Used by the test suites and by hosts
//! that want to dry-run writes without a node.

use async_trait::async_trait;
use bitcoin::bip32::Xpriv;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

use super::{
    AccountOptions, Coin, EventChannel, KeyInfo, LedgerService, NetworkInfo, Outpoint, WalletEvent,
    WalletOptions, WalletService, WalletTx,
};
use crate::config::Network;
use crate::error::{StoreError, StoreResult};
use crate::keys::{derive_address, MasterKey};

fn guard<T>(m: &Mutex<T>) -> StoreResult<MutexGuard<'_, T>> {
    m.lock().map_err(|_| StoreError::Network("lock".into()))
}

// =============================================================================
// Ledger
// =============================================================================

pub struct MemoryLedger {
    network: Network,
    height: AtomicU64,
    broadcasts: Mutex<Vec<String>>,
    resets: Mutex<Vec<u32>>,
    reject: AtomicBool,
}

impl MemoryLedger {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            height: AtomicU64::new(0),
            broadcasts: Mutex::new(Vec::new()),
            resets: Mutex::new(Vec::new()),
            reject: AtomicBool::new(false),
        }
    }

    /// Make every following broadcast fail.
    pub fn reject_broadcasts(&self, reject: bool) { self.reject.store(reject, Ordering::SeqCst); }
    pub fn set_height(&self, height: u32) { self.height.store(height as u64, Ordering::SeqCst); }
    pub fn broadcasts(&self) -> Vec<String> { self.broadcasts.lock().map(|b| b.clone()).unwrap_or_default() }
    pub fn resets(&self) -> Vec<u32> { self.resets.lock().map(|r| r.clone()).unwrap_or_default() }
}

#[async_trait]
impl LedgerService for MemoryLedger {
    async fn network_info(&self) -> StoreResult<NetworkInfo> {
        Ok(NetworkInfo { network: self.network.as_str().into(), height: self.height.load(Ordering::SeqCst) as u32 })
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> StoreResult<()> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(StoreError::Network("broadcast rejected".into()));
        }
        guard(&self.broadcasts)?.push(raw_tx_hex.to_string());
        Ok(())
    }

    async fn reset_scan(&self, height: u32) -> StoreResult<()> {
        guard(&self.resets)?.push(height);
        Ok(())
    }
}

// =============================================================================
// Events
// =============================================================================

#[derive(Default)]
pub struct MemoryEvents {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<String, Vec<(u64, mpsc::UnboundedSender<WalletEvent>)>>>,
}

impl MemoryEvents {
    pub fn new() -> Self { Self::default() }

    /// Deliver an event to every handler bound to `event`. Returns how many received it.
    pub fn emit(&self, event: &str, wallet_id: &str, data: serde_json::Value) -> usize {
        let Ok(subs) = self.subscribers.lock() else { return 0 };
        subs.get(event)
            .map(|list| {
                list.iter()
                    .filter(|(_, tx)| tx.send(WalletEvent { wallet_id: wallet_id.into(), data: data.clone() }).is_ok())
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn bound(&self, event: &str) -> usize {
        self.subscribers.lock().map(|s| s.get(event).map_or(0, Vec::len)).unwrap_or(0)
    }
}

impl EventChannel for MemoryEvents {
    fn bind(&self, event: &str) -> (u64, mpsc::UnboundedReceiver<WalletEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.entry(event.to_string()).or_default().push((id, tx));
        }
        (id, rx)
    }

    fn unbind(&self, event: &str, id: u64) {
        if let Ok(mut subs) = self.subscribers.lock() {
            if let Some(list) = subs.get_mut(event) {
                list.retain(|(sub, _)| *sub != id);
                if list.is_empty() {
                    subs.remove(event);
                }
            }
        }
    }
}

// =============================================================================
// Wallet
// =============================================================================

#[derive(Default)]
struct WalletState {
    master: Option<MasterKey>,
    watch_only: bool,
    accounts: BTreeSet<String>,
    keys: HashMap<String, KeyInfo>,
    coins: Vec<(String, Coin)>,
    locked: BTreeSet<Outpoint>,
}

pub struct MemoryWallet {
    wallets: Mutex<BTreeMap<String, WalletState>>,
    history: Mutex<Vec<(String, String, WalletTx)>>,
    events: Arc<MemoryEvents>,
    timeout: Duration,
    key_info_calls: AtomicUsize,
    failing: AtomicBool,
}

impl Default for MemoryWallet {
    fn default() -> Self { Self::new() }
}

impl MemoryWallet {
    pub fn new() -> Self {
        Self {
            wallets: Mutex::new(BTreeMap::new()),
            history: Mutex::new(Vec::new()),
            events: Arc::new(MemoryEvents::new()),
            timeout: Duration::from_secs(90),
            key_info_calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self { self.timeout = timeout; self }

    pub fn add_wallet(&self, id: &str, master: MasterKey) {
        if let Ok(mut wallets) = self.wallets.lock() {
            let state = wallets.entry(id.to_string()).or_default();
            state.master = Some(master);
            state.accounts.insert("default".into());
        }
    }

    pub fn add_key(&self, wallet: &str, address: &str, info: KeyInfo) {
        if let Ok(mut wallets) = self.wallets.lock() {
            let state = wallets.entry(wallet.to_string()).or_default();
            state.accounts.insert(info.account.clone());
            state.keys.insert(address.to_string(), info);
        }
    }

    /// Derive the segwit address at `account_index/branch/index` and register it.
    pub fn add_derived_key(
        &self,
        wallet: &str,
        master: &Xpriv,
        network: Network,
        account: &str,
        account_index: u32,
        branch: u32,
        index: u32,
    ) -> StoreResult<String> {
        let address = derive_address(master, network, account_index, branch, index)?;
        self.add_key(wallet, &address, KeyInfo { account: account.into(), account_index, branch, index });
        Ok(address)
    }

    pub fn add_coin(&self, wallet: &str, account: &str, coin: Coin) {
        if let Ok(mut wallets) = self.wallets.lock() {
            wallets.entry(wallet.to_string()).or_default().coins.push((account.to_string(), coin));
        }
    }

    pub fn add_tx(&self, wallet: &str, account: &str, tx: WalletTx) {
        if let Ok(mut history) = self.history.lock() {
            history.push((wallet.to_string(), account.to_string(), tx));
        }
    }

    pub fn set_confirmations(&self, txid: &str, confirmations: u32) {
        if let Ok(mut history) = self.history.lock() {
            for (_, _, tx) in history.iter_mut().filter(|(_, _, tx)| tx.hash == txid) {
                tx.confirmations = confirmations;
            }
        }
    }

    pub fn locked(&self, wallet: &str) -> Vec<Outpoint> {
        self.wallets
            .lock()
            .map(|w| w.get(wallet).map(|s| s.locked.iter().cloned().collect()).unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn is_watch_only(&self, wallet: &str) -> bool {
        self.wallets.lock().map(|w| w.get(wallet).is_some_and(|s| s.watch_only)).unwrap_or(false)
    }

    pub fn has_account(&self, wallet: &str, account: &str) -> bool {
        self.wallets.lock().map(|w| w.get(wallet).is_some_and(|s| s.accounts.contains(account))).unwrap_or(false)
    }

    pub fn key_info_calls(&self) -> usize { self.key_info_calls.load(Ordering::SeqCst) }

    /// Make every following call fail with a network error.
    pub fn set_failing(&self, failing: bool) { self.failing.store(failing, Ordering::SeqCst); }

    pub fn memory_events(&self) -> Arc<MemoryEvents> { self.events.clone() }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Network("wallet unavailable".into()));
        }
        Ok(())
    }

    fn select_history(&self, wallet: &str, account: &str, keep: impl Fn(&WalletTx) -> bool) -> StoreResult<Vec<WalletTx>> {
        self.check()?;
        Ok(guard(&self.history)?
            .iter()
            .filter(|(w, a, tx)| w == wallet && a == account && keep(tx))
            .map(|(_, _, tx)| tx.clone())
            .collect())
    }
}

#[async_trait]
impl WalletService for MemoryWallet {
    async fn list_wallets(&self) -> StoreResult<Vec<String>> {
        self.check()?;
        Ok(guard(&self.wallets)?.keys().cloned().collect())
    }

    async fn coins(&self, wallet: &str, account: Option<&str>) -> StoreResult<Vec<Coin>> {
        self.check()?;
        let wallets = guard(&self.wallets)?;
        let Some(state) = wallets.get(wallet) else { return Ok(Vec::new()) };
        Ok(state
            .coins
            .iter()
            .filter(|(acct, _)| account.map_or(true, |a| a == acct))
            .map(|(_, coin)| Coin { locked: state.locked.contains(&coin.outpoint()), ..coin.clone() })
            .collect())
    }

    async fn locked_coins(&self, wallet: &str) -> StoreResult<Vec<Outpoint>> {
        self.check()?;
        Ok(self.locked(wallet))
    }

    async fn lock_coin(&self, wallet: &str, txid: &str, index: u32) -> StoreResult<()> {
        self.check()?;
        guard(&self.wallets)?.entry(wallet.to_string()).or_default().locked.insert(Outpoint::new(txid, index));
        Ok(())
    }

    async fn master_key(&self, wallet: &str) -> StoreResult<MasterKey> {
        self.check()?;
        guard(&self.wallets)?
            .get(wallet)
            .and_then(|s| s.master.clone())
            .ok_or_else(|| StoreError::Network(format!("no master key for wallet {}", wallet)))
    }

    async fn key_info(&self, wallet: &str, address: &str) -> StoreResult<Option<KeyInfo>> {
        self.check()?;
        self.key_info_calls.fetch_add(1, Ordering::SeqCst);
        Ok(guard(&self.wallets)?.get(wallet).and_then(|s| s.keys.get(address).cloned()))
    }

    async fn transaction(&self, wallet: &str, txid: &str) -> StoreResult<Option<WalletTx>> {
        self.check()?;
        Ok(guard(&self.history)?
            .iter()
            .find(|(w, _, tx)| w == wallet && tx.hash == txid)
            .map(|(_, _, tx)| tx.clone()))
    }

    async fn history(&self, wallet: &str, account: &str) -> StoreResult<Vec<WalletTx>> {
        self.select_history(wallet, account, |_| true)
    }

    async fn history_range(&self, wallet: &str, account: &str, start: i64, end: i64) -> StoreResult<Vec<WalletTx>> {
        self.select_history(wallet, account, |tx| tx.time >= start && tx.time <= end)
    }

    async fn create_wallet(&self, id: &str, opts: &WalletOptions) -> StoreResult<()> {
        self.check()?;
        let mut wallets = guard(&self.wallets)?;
        if wallets.contains_key(id) {
            return Err(StoreError::Network(format!("wallet {} already exists", id)));
        }
        let mut state = WalletState { watch_only: opts.watch_only, ..Default::default() };
        state.accounts.insert("default".into());
        wallets.insert(id.to_string(), state);
        Ok(())
    }

    async fn create_account(&self, wallet: &str, name: &str, _opts: &AccountOptions) -> StoreResult<()> {
        self.check()?;
        let mut wallets = guard(&self.wallets)?;
        let state = wallets.get_mut(wallet).ok_or_else(|| StoreError::Network(format!("no wallet {}", wallet)))?;
        state.accounts.insert(name.to_string());
        Ok(())
    }

    async fn import_address(&self, wallet: &str, account: &str, address: &str) -> StoreResult<()> {
        self.check()?;
        let mut wallets = guard(&self.wallets)?;
        let state = wallets.get_mut(wallet).ok_or_else(|| StoreError::Network(format!("no wallet {}", wallet)))?;
        if !state.accounts.contains(account) {
            return Err(StoreError::Network(format!("no account {} in wallet {}", account, wallet)));
        }
        let account_index = state.accounts.iter().position(|a| a == account).unwrap_or(0) as u32;
        state.keys.insert(address.to_string(), KeyInfo { account: account.into(), account_index, branch: 0, index: 0 });
        Ok(())
    }

    fn events(&self) -> Arc<dyn EventChannel> {
        self.events.clone()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
