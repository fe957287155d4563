//! Store tests - write, read, sync and accounts against in-process services
//!
//! These tests verify:
//! 1. Payloads land in OP_RETURN outputs in order and read back byte-exact
//! 2. Oversized payloads report the exact excess
//! 3. Simulated and real writes agree; only real writes broadcast and lock
//! 4. Encrypted master keys need the right passphrase
//! 5. Locked coins are never reused; outputs can be chained
//! 6. History filters, watch-only bootstrap, confirmation polling, balances

use bip39::Mnemonic;
use bitcoin::bip32::Xpriv;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::Transaction;
use chainstore::keys::{compressed_public_key, derive_signing_key};
use chainstore::payload;
use chainstore::service::memory::{MemoryLedger, MemoryWallet};
use chainstore::service::{TxPart, WalletTx};
use chainstore::{
    ChainStore, Coin, MasterKey, Network, ReadOptions, StoreConfig, StoreError, WriteOptions, WriteReceipt,
    DEFAULT_CONFIRMATIONS,
};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

// "abandon" x11 + "about" - well-known test vector
const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const WALLET: &str = "primary";

fn master() -> Xpriv {
    let seed = Mnemonic::from_str(TEST_MNEMONIC).expect("valid mnemonic").to_seed("");
    Xpriv::new_master(bitcoin::Network::Regtest, &seed).expect("master key")
}

fn txid(n: u64) -> String {
    format!("{:064x}", n)
}

struct Harness {
    ledger: Arc<MemoryLedger>,
    wallet: Arc<MemoryWallet>,
    store: Arc<ChainStore>,
    address: String,
}

impl Harness {
    fn new() -> Self {
        Self::with(StoreConfig::new(Network::Regtest), MemoryWallet::new(), MasterKey::plain(&master()))
    }

    fn with(config: StoreConfig, wallet: MemoryWallet, key: MasterKey) -> Self {
        let ledger = Arc::new(MemoryLedger::new(Network::Regtest));
        let wallet = Arc::new(wallet);
        wallet.add_wallet(WALLET, key);
        let address = wallet.add_derived_key(WALLET, &master(), Network::Regtest, "default", 0, 0, 0).expect("address");
        let store = Arc::new(ChainStore::new(ledger.clone(), wallet.clone(), config));
        Self { ledger, wallet, store, address }
    }

    fn fund(&self, n: u64, value: u64) {
        self.wallet.add_coin(WALLET, "default", Coin { txid: txid(n), index: 0, address: self.address.clone(), value, locked: false });
    }

    fn broadcast(&self, i: usize) -> Transaction {
        let raw = hex::decode(&self.ledger.broadcasts()[i]).expect("hex");
        bitcoin::consensus::deserialize(&raw).expect("transaction")
    }

    /// Record a broadcast transaction in the wallet history, spent from our address.
    fn record(&self, i: usize, receipt: &WriteReceipt, confirmations: u32) {
        let tx = self.broadcast(i);
        let outputs = tx
            .output
            .iter()
            .map(|out| TxPart {
                address: receipt.outs.iter().find(|c| c.value == out.value.to_sat() && out.value.to_sat() > 0).map(|c| c.address.clone()),
                value: out.value.to_sat(),
            })
            .collect();
        self.wallet.add_tx(
            WALLET,
            "default",
            WalletTx {
                hash: receipt.txid.clone(),
                height: -1,
                time: 1_700_000_000,
                confirmations,
                tx: self.ledger.broadcasts()[i].clone(),
                inputs: vec![TxPart { address: Some(self.address.clone()), value: 0 }; tx.input.len()],
                outputs,
            },
        );
    }
}

#[test]
fn bip44_derivation_matches_known_vector() {
    let secp = Secp256k1::new();
    let key = derive_signing_key(&secp, &master(), Network::Main, 0, 0, 0).unwrap();
    let pubkey = bitcoin::PublicKey::from(compressed_public_key(&secp, &key));
    let legacy = bitcoin::Address::p2pkh(pubkey.pubkey_hash(), bitcoin::Network::Bitcoin);
    assert_eq!(legacy.to_string(), "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA");
}

#[tokio::test]
async fn write_single_byte_payload() {
    let h = Harness::new();
    h.fund(1, 100_000);

    let receipt = h.store.write(&h.address, "1", &WriteOptions::default()).await.unwrap();

    let tx = h.broadcast(0);
    assert_eq!(tx.compute_txid().to_string(), receipt.txid);
    let data: Vec<_> = tx.output.iter().filter_map(|o| payload::nulldata(&o.script_pubkey)).collect();
    assert_eq!(data, vec![vec![0x31]]);
    assert!(tx.output[0].script_pubkey.is_op_return());
    assert_eq!(receipt.size, tx.base_size());
}

#[tokio::test]
async fn multi_chunk_payload_keeps_order() {
    let h = Harness::new();
    h.fund(1, 100_000);
    let payload: Vec<u8> = (0..=255u8).cycle().take(1_000).collect();

    h.store.write(&h.address, &payload, &WriteOptions::default()).await.unwrap();

    let tx = h.broadcast(0);
    assert_eq!(tx.output.iter().filter(|o| o.script_pubkey.is_op_return()).count(), 5);
    assert_eq!(payload::decode(&tx.output), payload);
}

#[tokio::test]
async fn oversized_payload_reports_excess() {
    let h = Harness::new();
    h.fund(1, 50_000_000);
    let payload = vec![0xab; 1_000_000];

    let err = h.store.write(&h.address, &payload, &WriteOptions::simulate()).await.unwrap_err();
    assert!(err.is_recoverable());
    let (excess_bytes, max_payload_len) = match err {
        StoreError::PayloadTooLarge { excess_bytes, max_payload_len } => (excess_bytes, max_payload_len),
        other => panic!("expected PayloadTooLarge, got {:?}", other),
    };
    assert!(excess_bytes > 0);
    assert_eq!(max_payload_len, payload.len() - excess_bytes);

    let fitted = h.store.write(&h.address, &payload[..max_payload_len], &WriteOptions::simulate()).await.unwrap();
    assert!(fitted.size <= 1_000_000);
    assert!(h.ledger.broadcasts().is_empty());
}

#[tokio::test]
async fn simulate_matches_real_write_without_side_effects() {
    let h = Harness::new();
    h.fund(1, 80_000);
    h.fund(2, 30_000);

    let simulated = h.store.write(&h.address, b"same bytes", &WriteOptions::simulate()).await.unwrap();
    assert!(h.ledger.broadcasts().is_empty());
    assert!(h.wallet.locked(WALLET).is_empty());

    let real = h.store.write(&h.address, b"same bytes", &WriteOptions::default()).await.unwrap();
    assert_eq!(simulated, real);
    assert_eq!(h.ledger.broadcasts().len(), 1);
    assert_eq!(h.wallet.locked(WALLET).len(), 1);
}

#[tokio::test]
async fn failed_broadcast_locks_nothing() {
    let h = Harness::new();
    h.fund(1, 80_000);
    h.ledger.reject_broadcasts(true);

    assert!(h.store.write(&h.address, b"x", &WriteOptions::default()).await.is_err());
    assert!(h.wallet.locked(WALLET).is_empty());

    h.ledger.reject_broadcasts(false);
    h.store.write(&h.address, b"x", &WriteOptions::default()).await.unwrap();
    assert_eq!(h.wallet.locked(WALLET).len(), 1);
}

#[tokio::test]
async fn encrypted_master_key_needs_passphrase() {
    let key = MasterKey::encrypt(&master(), "correct horse", 1_000).unwrap();
    let good = Harness::with(StoreConfig::new(Network::Regtest).with_passphrase("correct horse"), MemoryWallet::new(), key.clone());
    good.fund(1, 50_000);
    good.store.write(&good.address, b"secret", &WriteOptions::default()).await.unwrap();

    let bad = Harness::with(StoreConfig::new(Network::Regtest).with_passphrase("wrong"), MemoryWallet::new(), key);
    bad.fund(1, 50_000);
    let err = bad.store.write(&bad.address, b"secret", &WriteOptions::default()).await.unwrap_err();
    assert!(matches!(err, StoreError::DecryptionFailed));
    assert!(bad.ledger.broadcasts().is_empty());
}

#[tokio::test]
async fn locked_coins_are_not_reused() {
    let h = Harness::new();
    h.fund(1, 60_000);
    h.fund(2, 40_000);

    h.store.write(&h.address, b"a", &WriteOptions::default()).await.unwrap();
    h.store.write(&h.address, b"b", &WriteOptions::default()).await.unwrap();

    let first = h.broadcast(0).input[0].previous_output.txid.to_string();
    let second = h.broadcast(1).input[0].previous_output.txid.to_string();
    assert_ne!(first, second);

    let err = h.store.write(&h.address, b"c", &WriteOptions::default()).await.unwrap_err();
    assert!(matches!(err, StoreError::InsufficientFunds(_)));
}

#[tokio::test]
async fn outputs_chain_into_next_write() {
    let h = Harness::new();
    h.fund(1, 60_000);

    let first = h.store.write(&h.address, b"one", &WriteOptions::default()).await.unwrap();
    assert_eq!(first.outs.len(), 1);
    assert_eq!(first.outs[0].address, h.address);

    let opts = WriteOptions::default().with_reserved(first.outs.clone());
    let second = h.store.write(&h.address, b"two", &opts).await.unwrap();

    let tx = h.broadcast(1);
    assert_eq!(tx.input.len(), 1);
    assert_eq!(tx.input[0].previous_output.txid.to_string(), first.txid);
    assert_eq!(second.outs[0].value + second.fee, first.outs[0].value);
}

#[tokio::test]
async fn extra_outputs_are_paid() {
    let h = Harness::new();
    h.fund(1, 60_000);
    let other = h.wallet.add_derived_key(WALLET, &master(), Network::Regtest, "default", 0, 0, 1).unwrap();

    let receipt = h.store.write(&h.address, b"pay", &WriteOptions::default().with_output(&other, 5_000)).await.unwrap();

    let paid = receipt.outs.iter().find(|c| c.address == other).expect("payment output");
    assert_eq!(paid.value, 5_000);
    let change = receipt.outs.iter().find(|c| c.address == h.address).expect("change output");
    assert_eq!(change.value + paid.value + receipt.fee, 60_000);
}

#[tokio::test]
async fn max_fee_caps_fee() {
    let h = Harness::new();
    h.fund(1, 60_000);
    let opts = WriteOptions::simulate().with_fee_rate(50_000).with_max_fee(500);
    let receipt = h.store.write(&h.address, b"cheap", &opts).await.unwrap();
    assert_eq!(receipt.fee, 500);
}

#[tokio::test]
async fn out_of_range_amounts_are_rejected() {
    let h = Harness::new();
    h.fund(1, 60_000);
    let other = h.wallet.add_derived_key(WALLET, &master(), Network::Regtest, "default", 0, 0, 1).unwrap();

    let huge = u64::MAX / 2 + 1;
    let opts = WriteOptions::default().with_output(&other, huge).with_output(&other, huge);
    let err = h.store.write(&h.address, b"x", &opts).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidOption(_)));

    let err = h.store.write(&h.address, b"x", &WriteOptions::simulate().with_fee_rate(u64::MAX / 10)).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidOption(_)));

    assert!(h.ledger.broadcasts().is_empty());
    assert!(h.wallet.locked(WALLET).is_empty());
}

#[tokio::test]
async fn write_from_unfollowed_address() {
    let h = Harness::new();
    let err = h.store.write("bcrt1qnotours", b"x", &WriteOptions::default()).await.unwrap_err();
    assert!(matches!(err, StoreError::AddressNotFollowed(_)));
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn concurrent_writes_use_distinct_coins() {
    let h = Harness::new();
    h.fund(1, 60_000);
    h.fund(2, 40_000);

    let opts_left = WriteOptions::default();
    let opts_right = WriteOptions::default();
    let (a, b) = tokio::join!(
        h.store.write(&h.address, b"left", &opts_left),
        h.store.write(&h.address, b"right", &opts_right),
    );
    a.unwrap();
    b.unwrap();

    assert_ne!(h.broadcast(0).input[0].previous_output, h.broadcast(1).input[0].previous_output);
    assert_eq!(h.wallet.locked(WALLET).len(), 2);
}

#[tokio::test]
async fn read_back_written_payload() {
    let h = Harness::new();
    h.fund(1, 60_000);
    let receipt = h.store.write(&h.address, b"hello world", &WriteOptions::default()).await.unwrap();
    h.record(0, &receipt, 0);

    let records = h.store.read(&ReadOptions::from_src(&h.address)).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].txid, receipt.txid);
    assert_eq!(records[0].payload(), b"hello world");
    assert_eq!(records[0].block, None);
    assert_eq!(records[0].srcs[0].txid, txid(1));

    let none = h.store.read(&ReadOptions::from_src(&h.address).with_dst("elsewhere")).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn read_unowned_address_bootstraps_watch_only() {
    let h = Harness::new();
    let stranger = "bcrt1qstranger";

    let records = h.store.read(&ReadOptions::from_dst(stranger)).await.unwrap();
    assert!(records.is_empty());
    assert!(h.wallet.is_watch_only("_watchonly_witness"));
    assert_eq!(h.ledger.resets(), vec![0]);
    assert_eq!(h.store.lookup(stranger).await.unwrap().map(|p| p.wallet), Some("_watchonly_witness".to_string()));
}

#[tokio::test(start_paused = true)]
async fn sync_waits_for_confirmations() {
    let h = Harness::new();
    h.fund(1, 60_000);
    let receipt = h.store.write(&h.address, b"sync me", &WriteOptions::default()).await.unwrap();
    h.record(0, &receipt, 0);

    let store = h.store.clone();
    let address = h.address.clone();
    let txid = receipt.txid.clone();
    let task = tokio::spawn(async move { store.sync(&address, &txid, DEFAULT_CONFIRMATIONS).await });

    tokio::time::sleep(Duration::from_secs(90)).await;
    assert!(!task.is_finished());
    h.wallet.set_confirmations(&receipt.txid, 3);

    let record = task.await.unwrap().unwrap();
    assert_eq!(record.confirmations, 3);
    assert_eq!(record.payload(), b"sync me");
}

#[tokio::test]
async fn accounts_sum_per_address() {
    let h = Harness::new();
    h.fund(1, 1_000);
    h.fund(2, 2_000);

    let accounts = h.store.accounts().await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].address, h.address);
    assert_eq!(accounts[0].value, 3_000);
    assert_eq!(accounts[0].label.as_deref(), Some("primary-0-0"));
}

#[tokio::test]
async fn lookup_unknown_address() {
    let h = Harness::new();
    assert_eq!(h.store.lookup("bcrt1qunknown").await.unwrap(), None);
    let path = h.store.lookup(&h.address).await.unwrap().unwrap();
    assert_eq!((path.wallet.as_str(), path.branch, path.index), (WALLET, 0, 0));
}

#[tokio::test]
async fn wait_for_transaction_via_event() {
    let h = Harness::new();
    let events = h.wallet.memory_events();
    let store = h.store.clone();
    let address = h.address.clone();
    let task = tokio::spawn(async move { store.wait_for_transaction(&address, &txid(9)).await });

    while events.bound("tx") == 0 {
        tokio::task::yield_now().await;
    }
    events.emit("tx", WALLET, json!({"hash": txid(8)}));
    events.emit("tx", WALLET, json!({"hash": txid(9)}));

    task.await.unwrap().unwrap();
    assert_eq!(events.bound("tx"), 0);
}

#[tokio::test]
async fn wait_for_known_transaction_returns_immediately() {
    let h = Harness::new();
    h.fund(1, 60_000);
    let receipt = h.store.write(&h.address, b"known", &WriteOptions::default()).await.unwrap();
    h.record(0, &receipt, 1);

    h.store.wait_for_transaction(&h.address, &receipt.txid).await.unwrap();
    assert_eq!(h.wallet.memory_events().bound("tx"), 0);
}

#[tokio::test(start_paused = true)]
async fn events_until_times_out() {
    let h = Harness::with(
        StoreConfig::new(Network::Regtest),
        MemoryWallet::new().with_timeout(Duration::from_secs(5)),
        MasterKey::plain(&master()),
    );
    let err = h.store.events_until("balance", |_, _| true, None).await.unwrap_err();
    assert!(matches!(err, StoreError::Timeout(_)));
    assert_eq!(h.wallet.memory_events().bound("balance"), 0);
}

#[tokio::test]
async fn node_on_other_network_is_rejected() {
    let h = Harness::with(StoreConfig::new(Network::Testnet), MemoryWallet::new(), MasterKey::plain(&master()));
    h.fund(1, 60_000);
    let err = h.store.write(&h.address, b"x", &WriteOptions::default()).await.unwrap_err();
    assert!(matches!(err, StoreError::Network(_)));
}

#[tokio::test]
async fn unserialized_writes_behave_the_same() {
    let h = Harness::with(StoreConfig::new(Network::Regtest).with_serialized_writes(false), MemoryWallet::new(), MasterKey::plain(&master()));
    h.fund(1, 60_000);
    let receipt = h.store.write(&h.address, b"solo", &WriteOptions::default()).await.unwrap();
    assert_eq!(h.broadcast(0).compute_txid().to_string(), receipt.txid);
    assert!(!h.store.config().serialize_writes);
}
