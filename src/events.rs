//! Event waits on the wallet event channel
//!
//! A [`Subscription`] unbinds itself when dropped, so every exit from
//! [`events_until`] (match, timeout, error, cancellation) releases it once.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::service::{EventChannel, WalletEvent};

pub struct Subscription {
    channel: Arc<dyn EventChannel>,
    event: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<WalletEvent>,
}

impl Subscription {
    pub fn bind(channel: Arc<dyn EventChannel>, event: &str) -> Self {
        let (id, rx) = channel.bind(event);
        debug!(event, id, "bound");
        Self { channel, event: event.to_string(), id, rx }
    }

    /// Next event, `None` once the channel side hung up.
    pub async fn recv(&mut self) -> Option<WalletEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.channel.unbind(&self.event, self.id);
        debug!(event = %self.event, id = self.id, "unbound");
    }
}

/// Wait until `handler` accepts an event named `event`.
///
/// `initial`, when given, is awaited first and its value offered to the
/// handler with an empty wallet id. Null payloads are skipped. Fails with
/// [`StoreError::Timeout`] once `timeout` elapses.
pub async fn events_until<F, Fut>(
    channel: Arc<dyn EventChannel>,
    event: &str,
    timeout: Duration,
    mut handler: F,
    initial: Option<Fut>,
) -> StoreResult<()>
where
    F: FnMut(&str, &Value) -> bool,
    Fut: Future<Output = StoreResult<Option<Value>>>,
{
    let mut sub = Subscription::bind(channel, event);

    let wait = async {
        if let Some(initial) = initial {
            if let Some(value) = initial.await? {
                if !value.is_null() && handler("", &value) {
                    return Ok(());
                }
            }
        }
        while let Some(WalletEvent { wallet_id, data }) = sub.recv().await {
            if !data.is_null() && handler(&wallet_id, &data) {
                return Ok(());
            }
        }
        Err(StoreError::Network(format!("event channel closed while waiting for {}", event)))
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(format!("no matching {} event within {:?}", event, timeout))),
    }
}
