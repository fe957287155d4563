//! BalanceAggregator - coin values summed per address across all wallets

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::StoreResult;
use crate::resolver::KeyPathResolver;
use crate::service::WalletService;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBalance {
    pub address: String,
    pub value: u64,
    /// `wallet[.account]-branch-index`, `None` when no wallet owns the address.
    pub label: Option<String>,
}

pub struct BalanceAggregator {
    wallet: Arc<dyn WalletService>,
    resolver: Arc<KeyPathResolver>,
}

impl BalanceAggregator {
    pub fn new(wallet: Arc<dyn WalletService>, resolver: Arc<KeyPathResolver>) -> Self {
        Self { wallet, resolver }
    }

    /// One entry per address holding a nonzero total, ordered by address.
    pub async fn accounts(&self) -> StoreResult<Vec<AddressBalance>> {
        let mut totals: BTreeMap<String, u64> = BTreeMap::new();
        for wallet in self.wallet.list_wallets().await? {
            for coin in self.wallet.coins(&wallet, None).await? {
                *totals.entry(coin.address).or_default() += coin.value;
            }
        }

        let mut balances = Vec::with_capacity(totals.len());
        for (address, value) in totals.into_iter().filter(|(_, value)| *value > 0) {
            let label = self.resolver.resolve(&address).await?.map(|path| path.label());
            balances.push(AddressBalance { address, value, label });
        }
        debug!(addresses = balances.len(), "aggregated balances");
        Ok(balances)
    }
}
