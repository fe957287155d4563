//! ConfirmationWaiter - poll until a transaction is buried deep enough
//!
//! No internal timeout. Drop the future (or wrap it in `tokio::time::timeout`)
//! to stop waiting. Wallet errors end the wait immediately.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::Network;
use crate::error::{StoreError, StoreResult};
use crate::history::{decode_wallet_tx, HistoryRecord};
use crate::resolver::KeyPathResolver;
use crate::service::WalletService;

pub struct ConfirmationWaiter {
    wallet: Arc<dyn WalletService>,
    resolver: Arc<KeyPathResolver>,
    network: Network,
    interval: Duration,
}

impl ConfirmationWaiter {
    pub fn new(wallet: Arc<dyn WalletService>, resolver: Arc<KeyPathResolver>, network: Network, interval: Duration) -> Self {
        Self { wallet, resolver, network, interval }
    }

    /// Resolve once `txid` has at least `required` confirmations in the
    /// wallet that owns `address`. A transaction the wallet has not seen yet
    /// counts as unconfirmed.
    pub async fn wait(&self, address: &str, txid: &str, required: u32) -> StoreResult<HistoryRecord> {
        let path = self
            .resolver
            .resolve(address)
            .await?
            .ok_or_else(|| StoreError::AddressNotFollowed(address.to_string()))?;

        let mut polls = 0u32;
        loop {
            polls += 1;
            match self.wallet.transaction(&path.wallet, txid).await? {
                Some(tx) if tx.confirmations >= required => {
                    debug!(txid, confirmations = tx.confirmations, polls, "confirmed");
                    return decode_wallet_tx(&tx, self.network);
                }
                Some(tx) => debug!(txid, confirmations = tx.confirmations, required, "waiting for confirmations"),
                None => debug!(txid, "not yet seen by wallet"),
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
