//! KeyPathResolver - address → owning wallet/account/derivation path
//!
//! Results are cached for the lifetime of the resolver. Nothing in the crate
//! evicts an entry; `forget` exists for hosts that know a registry changed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreResult;
use crate::service::WalletService;

/// Uniquely determines the signing key of one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletKeyPath {
    pub wallet: String,
    pub account: String,
    pub account_index: u32,
    pub branch: u32,
    pub index: u32,
}

impl WalletKeyPath {
    /// `wallet[.account]-branch-index`, account omitted when it is `default`.
    pub fn label(&self) -> String {
        let owner = if self.account != "default" {
            format!("{}.{}", self.wallet, self.account)
        } else {
            self.wallet.clone()
        };
        format!("{}-{}-{}", owner, self.branch, self.index)
    }
}

pub struct KeyPathResolver {
    wallet: Arc<dyn WalletService>,
    cache: RwLock<HashMap<String, WalletKeyPath>>,
}

impl KeyPathResolver {
    pub fn new(wallet: Arc<dyn WalletService>) -> Self {
        Self { wallet, cache: RwLock::new(HashMap::new()) }
    }

    /// Find the wallet that owns `address`. `Ok(None)` when no wallet does.
    pub async fn resolve(&self, address: &str) -> StoreResult<Option<WalletKeyPath>> {
        if address.is_empty() {
            return Ok(None);
        }
        if let Some(path) = self.cache.read().await.get(address) {
            return Ok(Some(path.clone()));
        }

        for wallet in self.wallet.list_wallets().await? {
            if let Some(info) = self.wallet.key_info(&wallet, address).await? {
                let path = WalletKeyPath {
                    wallet,
                    account: info.account,
                    account_index: info.account_index,
                    branch: info.branch,
                    index: info.index,
                };
                debug!(address, label = %path.label(), "resolved key path");
                self.cache.write().await.insert(address.to_string(), path.clone());
                return Ok(Some(path));
            }
        }
        debug!(address, "address not owned by any wallet");
        Ok(None)
    }

    /// Drop a cached entry. The next `resolve` rescans the wallets.
    pub async fn forget(&self, address: &str) -> Option<WalletKeyPath> {
        self.cache.write().await.remove(address)
    }

    pub async fn cached(&self) -> usize {
        self.cache.read().await.len()
    }
}
