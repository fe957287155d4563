//! Builder - payload → funded, signed, validated transaction
//!
//! # Pipeline
//!
//! ```text
//! address ──► KeyPathResolver ──► CoinSelector ──► payload::encode
//!                                                       │
//!                                                       ▼
//!                           fund (fee rate, max fee, change to address)
//!                                                       │
//!                                                       ▼
//!                           canonicalize ──► derive key ──► sign
//!                                                       │
//!                                                       ▼
//!                           size limit ──► sanity ──► Broadcaster (unless simulate)
//! ```

pub mod fund;
pub mod sanity;
pub mod sign;

use bitcoin::absolute::LockTime;
use bitcoin::address::NetworkUnchecked;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::broadcast::Broadcaster;
use crate::coins::CoinSelector;
use crate::config::{Network, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::keys::derive_signing_key;
use crate::payload::{self, DEFAULT_STRIDE};
use crate::resolver::KeyPathResolver;
use crate::service::{Coin, LedgerService, WalletService};
use fund::{canonicalize, fund, FundingRequest, Spendable};
use sanity::{check_inputs, check_sanity, MAX_BLOCK_SIZE};

/// Extra value-bearing output appended after the data outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueOutput {
    pub address: String,
    pub value: u64,
}

/// Options for one write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    /// Bytes per data output.
    pub stride: usize,
    pub extra_outputs: Vec<ValueOutput>,
    /// Coins that must not be reused from the wallet and are spent as inputs.
    pub reserved_coins: Vec<Coin>,
    /// Overrides the configured fee rate (sat/kvB).
    pub fee_rate: Option<u64>,
    pub max_fee: Option<u64>,
    /// Build and sign only. No broadcast, no locks.
    pub simulate: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { stride: DEFAULT_STRIDE, extra_outputs: Vec::new(), reserved_coins: Vec::new(), fee_rate: None, max_fee: None, simulate: false }
    }
}

impl WriteOptions {
    pub fn simulate() -> Self { Self { simulate: true, ..Default::default() } }
    pub fn with_stride(mut self, stride: usize) -> Self { self.stride = stride; self }
    pub fn with_output(mut self, address: impl Into<String>, value: u64) -> Self { self.extra_outputs.push(ValueOutput { address: address.into(), value }); self }
    pub fn with_reserved(mut self, coins: Vec<Coin>) -> Self { self.reserved_coins.extend(coins); self }
    pub fn with_fee_rate(mut self, rate: u64) -> Self { self.fee_rate = Some(rate); self }
    pub fn with_max_fee(mut self, fee: u64) -> Self { self.max_fee = Some(fee); self }
}

/// Signed transaction ready for broadcast.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub tx: Transaction,
    pub txid: String,
    pub fee: u64,
    /// Serialized size without witness data.
    pub base_size: usize,
    /// Wallet that owns the spent coins.
    pub wallet: String,
}

/// Outcome of a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    pub txid: String,
    /// Outputs that pay an address, usable as reserved coins of a following write.
    pub outs: Vec<Coin>,
    pub fee: u64,
    pub size: usize,
}

impl SignedTransaction {
    pub fn receipt(&self, network: Network) -> WriteReceipt {
        let outs = self
            .tx
            .output
            .iter()
            .enumerate()
            .filter_map(|(index, out)| {
                let address = Address::from_script(&out.script_pubkey, network.to_bitcoin()).ok()?;
                Some(Coin { txid: self.txid.clone(), index: index as u32, address: address.to_string(), value: out.value.to_sat(), locked: false })
            })
            .collect();
        WriteReceipt { txid: self.txid.clone(), outs, fee: self.fee, size: self.base_size }
    }
}

pub struct TransactionBuilder {
    ledger: Arc<dyn LedgerService>,
    wallet: Arc<dyn WalletService>,
    resolver: Arc<KeyPathResolver>,
    coins: CoinSelector,
    broadcaster: Broadcaster,
    config: Arc<StoreConfig>,
}

impl TransactionBuilder {
    pub fn new(ledger: Arc<dyn LedgerService>, wallet: Arc<dyn WalletService>, resolver: Arc<KeyPathResolver>, config: Arc<StoreConfig>) -> Self {
        Self {
            coins: CoinSelector::new(wallet.clone()),
            broadcaster: Broadcaster::new(ledger.clone(), wallet.clone()),
            ledger,
            wallet,
            resolver,
            config,
        }
    }

    /// Build, sign and (unless simulating) broadcast a transaction carrying `payload`.
    pub async fn build(&self, address: &str, payload: &[u8], opts: &WriteOptions) -> StoreResult<WriteReceipt> {
        let signed = self.prepare(address, payload, opts).await?;
        if opts.simulate {
            debug!(txid = %signed.txid, fee = signed.fee, size = signed.base_size, "simulated write");
        } else {
            self.broadcaster.submit(&signed.wallet, &signed.tx).await?;
        }
        Ok(signed.receipt(self.config.network))
    }

    /// Everything up to, but excluding, broadcast.
    pub async fn prepare(&self, address: &str, payload: &[u8], opts: &WriteOptions) -> StoreResult<SignedTransaction> {
        let path = self
            .resolver
            .resolve(address)
            .await?
            .ok_or_else(|| StoreError::AddressNotFollowed(address.to_string()))?;
        let network = self.network().await?;

        let selectable = self.coins.selectable(address, &path.wallet, &path.account, &opts.reserved_coins).await?;
        let coins = selectable.iter().map(|c| spendable(c, network)).collect::<StoreResult<Vec<_>>>()?;
        let forced = opts.reserved_coins.iter().map(|c| spendable(c, network)).collect::<StoreResult<Vec<_>>>()?;

        let mut outputs = payload::encode(payload, opts.stride)?;
        for extra in &opts.extra_outputs {
            outputs.push(TxOut { value: Amount::from_sat(extra.value), script_pubkey: parse_address(&extra.address, network)?.script_pubkey() });
        }

        let funding = fund(&FundingRequest {
            coins: &coins,
            forced: &forced,
            outputs: &outputs,
            change_script: parse_address(address, network)?.script_pubkey(),
            fee_rate: opts.fee_rate.unwrap_or(self.config.fee_rate),
            max_fee: opts.max_fee,
        })?;
        let input_value = funding.input_value();
        let mut inputs = funding.inputs;
        outputs.extend(funding.change);
        canonicalize(&mut inputs, &mut outputs);

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: inputs
                .iter()
                .map(|s| Ok(TxIn { previous_output: s.outpoint()?, script_sig: ScriptBuf::new(), sequence: Sequence::MAX, witness: Witness::new() }))
                .collect::<StoreResult<Vec<_>>>()?,
            output: outputs,
        };
        let spent: Vec<TxOut> = inputs.iter().map(Spendable::txout).collect();

        let secp = Secp256k1::new();
        let master = self
            .wallet
            .master_key(&path.wallet)
            .await?
            .unlock(self.config.passphrase.as_ref().map(|p| p.as_str()))?;
        let key = derive_signing_key(&secp, &master, network, path.account_index, path.branch, path.index)?;
        sign::sign_inputs(&secp, &mut tx, &spent, &key)?;

        let base_size = tx.base_size();
        if base_size > MAX_BLOCK_SIZE {
            let excess_bytes = base_size - MAX_BLOCK_SIZE;
            return Err(StoreError::PayloadTooLarge { excess_bytes, max_payload_len: payload.len().saturating_sub(excess_bytes) });
        }
        check_sanity(&tx).map_err(|reason| StoreError::SanityCheckFailed(reason.into()))?;
        let fee = check_inputs(&tx, input_value).map_err(|reason| StoreError::SanityCheckFailed(reason.into()))?;

        let txid = tx.compute_txid().to_string();
        info!(%txid, address, label = %path.label(), inputs = tx.input.len(), outputs = tx.output.len(), fee, size = base_size, "built transaction");
        Ok(SignedTransaction { tx, txid, fee, base_size, wallet: path.wallet })
    }

    /// Node network, which must match the configured one.
    async fn network(&self) -> StoreResult<Network> {
        let info = self.ledger.network_info().await?;
        let network = Network::from_str(&info.network).ok_or_else(|| StoreError::Network(format!("unknown network {}", info.network)))?;
        if network != self.config.network {
            return Err(StoreError::Network(format!("node is on {}, store configured for {}", network.as_str(), self.config.network.as_str())));
        }
        Ok(network)
    }
}

pub fn parse_address(address: &str, network: Network) -> StoreResult<Address> {
    address
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|e| StoreError::InvalidAddress(format!("{}: {}", address, e)))?
        .require_network(network.to_bitcoin())
        .map_err(|e| StoreError::InvalidAddress(format!("{}: {}", address, e)))
}

fn spendable(coin: &Coin, network: Network) -> StoreResult<Spendable> {
    Ok(Spendable { coin: coin.clone(), script_pubkey: parse_address(&coin.address, network)?.script_pubkey() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::MasterKey;
    use crate::service::memory::{MemoryLedger, MemoryWallet};
    use bitcoin::bip32::Xpriv;

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        wallet: Arc<MemoryWallet>,
        builder: TransactionBuilder,
        address: String,
    }

    fn fixture(config: StoreConfig, ledger_network: Network) -> Fixture {
        let xprv = Xpriv::new_master(bitcoin::Network::Regtest, &[7u8; 64]).unwrap();
        let ledger = Arc::new(MemoryLedger::new(ledger_network));
        let wallet = Arc::new(MemoryWallet::new());
        wallet.add_wallet("w", MasterKey::plain(&xprv));
        let address = wallet.add_derived_key("w", &xprv, Network::Regtest, "default", 0, 0, 0).unwrap();
        wallet.add_coin("w", "default", Coin { txid: "11".repeat(32), index: 0, address: address.clone(), value: 100_000, locked: false });
        let resolver = Arc::new(KeyPathResolver::new(wallet.clone()));
        let builder = TransactionBuilder::new(ledger.clone(), wallet.clone(), resolver, Arc::new(config));
        Fixture { ledger, wallet, builder, address }
    }

    #[tokio::test]
    async fn test_builds_and_broadcasts() {
        let f = fixture(StoreConfig::new(Network::Regtest), Network::Regtest);
        let receipt = f.builder.build(&f.address, b"hello", &WriteOptions::default()).await.unwrap();

        assert_eq!(f.ledger.broadcasts().len(), 1);
        assert_eq!(f.wallet.locked("w").len(), 1);
        assert_eq!(receipt.outs.len(), 1);
        assert_eq!(receipt.outs[0].address, f.address);
        assert_eq!(receipt.outs[0].value + receipt.fee, 100_000);
    }

    #[tokio::test]
    async fn test_unknown_address_not_followed() {
        let f = fixture(StoreConfig::new(Network::Regtest), Network::Regtest);
        let err = f.builder.build("bcrt1qunknown", b"x", &WriteOptions::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::AddressNotFollowed(_)));
    }

    #[tokio::test]
    async fn test_network_mismatch_rejected() {
        let f = fixture(StoreConfig::new(Network::Regtest), Network::Main);
        let err = f.builder.build(&f.address, b"x", &WriteOptions::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::Network(_)));
        assert!(f.ledger.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn test_zero_stride_rejected() {
        let f = fixture(StoreConfig::new(Network::Regtest), Network::Regtest);
        let err = f.builder.build(&f.address, b"x", &WriteOptions::default().with_stride(0)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidOption(_)));
    }

    #[tokio::test]
    async fn test_extra_output_on_wrong_network() {
        let f = fixture(StoreConfig::new(Network::Regtest), Network::Regtest);
        let opts = WriteOptions::default().with_output("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4", 1_000);
        let err = f.builder.build(&f.address, b"x", &opts).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidAddress(_)));
    }
}
