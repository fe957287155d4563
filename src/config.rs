//! Store configuration - passed from the host application

use std::fmt;
use std::time::Duration;
use zeroize::Zeroizing;

/// Default fee rate in satoshis per 1000 virtual bytes.
pub const DEFAULT_FEE_RATE: u64 = 1_000;
/// Delay between confirmation checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
/// Wallet that receives imported watch-only addresses.
pub const WATCH_ONLY_WALLET: &str = "_watchonly_witness";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network { Main, #[default] Testnet, Regtest, Signet }

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self { Network::Main => "main", Network::Testnet => "testnet", Network::Regtest => "regtest", Network::Signet => "signet" }
    }

    /// Accepts the names the ledger node reports (`main`, `testnet`, ...) and `bitcoin` for mainnet.
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "main" | "mainnet" | "bitcoin" => Some(Network::Main),
            "testnet" | "test" | "testnet3" => Some(Network::Testnet),
            "regtest" => Some(Network::Regtest),
            "signet" => Some(Network::Signet),
            _ => None,
        }
    }

    /// BIP44 coin type used in the hardened account path.
    pub fn coin_type(&self) -> u32 {
        match self { Network::Main => 0, _ => 1 }
    }

    pub fn to_bitcoin(&self) -> bitcoin::Network {
        match self { Network::Main => bitcoin::Network::Bitcoin, Network::Testnet => bitcoin::Network::Testnet, Network::Regtest => bitcoin::Network::Regtest, Network::Signet => bitcoin::Network::Signet }
    }
}

/// Store configuration. Host applications construct this.
#[derive(Clone)]
pub struct StoreConfig {
    pub network: Network,
    pub passphrase: Option<Zeroizing<String>>,
    pub fee_rate: u64,
    pub poll_interval: Duration,
    /// Hold a per-address lock from coin selection until consumed coins are locked.
    pub serialize_writes: bool,
    pub watch_only_wallet: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            passphrase: None,
            fee_rate: DEFAULT_FEE_RATE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            serialize_writes: true,
            watch_only_wallet: WATCH_ONLY_WALLET.into(),
        }
    }
}

impl StoreConfig {
    pub fn new(network: Network) -> Self { Self { network, ..Default::default() } }
    pub fn with_passphrase(mut self, p: impl Into<String>) -> Self { self.passphrase = Some(Zeroizing::new(p.into())); self }
    pub fn with_fee_rate(mut self, rate: u64) -> Self { self.fee_rate = rate; self }
    pub fn with_poll_interval(mut self, interval: Duration) -> Self { self.poll_interval = interval; self }
    pub fn with_serialized_writes(mut self, on: bool) -> Self { self.serialize_writes = on; self }
    pub fn with_watch_only_wallet(mut self, id: impl Into<String>) -> Self { self.watch_only_wallet = id.into(); self }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("network", &self.network)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("fee_rate", &self.fee_rate)
            .field("poll_interval", &self.poll_interval)
            .field("serialize_writes", &self.serialize_writes)
            .field("watch_only_wallet", &self.watch_only_wallet)
            .finish()
    }
}
