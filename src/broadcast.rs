//! Broadcaster - submit, then lock what was spent
//!
//! Coins are locked only once the node accepted the transaction. A rejected
//! broadcast leaves every coin selectable.

use bitcoin::consensus::encode::serialize_hex;
use bitcoin::Transaction;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::StoreResult;
use crate::service::{LedgerService, WalletService};

pub struct Broadcaster {
    ledger: Arc<dyn LedgerService>,
    wallet: Arc<dyn WalletService>,
}

impl Broadcaster {
    pub fn new(ledger: Arc<dyn LedgerService>, wallet: Arc<dyn WalletService>) -> Self {
        Self { ledger, wallet }
    }

    pub async fn submit(&self, wallet: &str, tx: &Transaction) -> StoreResult<()> {
        let txid = tx.compute_txid();
        if let Err(e) = self.ledger.broadcast(&serialize_hex(tx)).await {
            warn!(%txid, error = %e, "broadcast failed");
            return Err(e);
        }
        info!(%txid, inputs = tx.input.len(), outputs = tx.output.len(), "broadcast transaction");

        for input in &tx.input {
            let prev = input.previous_output;
            self.wallet.lock_coin(wallet, &prev.txid.to_string(), prev.vout).await?;
        }
        Ok(())
    }
}
