//! CoinSelector - spendable coins of one address
//!
//! Excludes every coin the wallet has locked and every coin the caller
//! reserved. Reserved coins are then appended as-is: they are inputs the
//! caller pinned (e.g. outputs of a previous write not yet seen by the wallet).

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::service::{Coin, Outpoint, WalletService};

pub struct CoinSelector {
    wallet: Arc<dyn WalletService>,
}

impl CoinSelector {
    pub fn new(wallet: Arc<dyn WalletService>) -> Self {
        Self { wallet }
    }

    pub async fn selectable(&self, address: &str, wallet: &str, account: &str, reserved: &[Coin]) -> StoreResult<Vec<Coin>> {
        let mut excluded: HashSet<Outpoint> = self.wallet.locked_coins(wallet).await?.into_iter().collect();
        excluded.extend(reserved.iter().map(Coin::outpoint));

        let owned = self.wallet.coins(wallet, Some(account)).await?;
        let total = owned.len();
        let mut coins: Vec<Coin> = owned
            .into_iter()
            .filter(|coin| coin.address == address && !coin.locked && !excluded.contains(&coin.outpoint()))
            .collect();
        debug!(address, wallet, account, owned = total, usable = coins.len(), reserved = reserved.len(), "selected coins");
        coins.extend(reserved.iter().cloned());

        if coins.is_empty() {
            return Err(StoreError::InsufficientFunds(format!("no spendable coins for {}", address)));
        }
        Ok(coins)
    }
}
