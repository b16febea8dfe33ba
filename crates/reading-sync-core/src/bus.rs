//! Cross-tab event bus: broadcast channel + storage-event fallback.
//!
//! Delivery is best-effort and at-least-once. The two transports are merged
//! into one stream and may deliver the same notification twice in either
//! order, so every consumer must treat a message as "re-read everything".

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{Arc, Mutex},
};

use futures::{StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{SharedStorage, StorageEvent, SyncConfig, TabId, TaskHandle};

/// Channel capacity per topic.
const CHANNEL_CAPACITY: usize = 256;

/// Notification carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusMessage {
    /// Some tab changed the session; re-fetch it.
    #[serde(rename = "REFRESH_SESSION")]
    RefreshSession,
}

impl BusMessage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RefreshSession => "REFRESH_SESSION",
        }
    }
}

impl fmt::Display for BusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    origin: TabId,
    message: BusMessage,
    /// Makes repeated signals distinct values so storage always reports a change.
    #[serde(default)]
    nonce: Option<Uuid>,
}

/// Named broadcast channels shared by every tab of one origin.
///
/// Cloning the hub shares the same channels.
#[derive(Clone, Default)]
pub struct BroadcastHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Envelope>>>>,
}

impl BroadcastHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, name: &str) -> broadcast::Sender<Envelope> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

/// One tab's view of the bus.
pub struct EventBus {
    tab_id: TabId,
    channel: broadcast::Sender<Envelope>,
    storage: Arc<dyn SharedStorage>,
    signal_key: String,
    lock_key: String,
}

impl EventBus {
    /// Join the topic named in `config` on behalf of `tab_id`.
    #[must_use]
    pub fn new(
        tab_id: TabId,
        hub: &BroadcastHub,
        storage: Arc<dyn SharedStorage>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            tab_id,
            channel: hub.channel(&config.channel_name),
            storage,
            signal_key: format!("{}_signal", config.channel_name),
            lock_key: config.lock_key.clone(),
        }
    }

    /// Broadcast `message` to every other tab.
    ///
    /// Sends on the channel and writes the signal key so tabs that only see
    /// storage events are notified too. Failures are logged, never returned.
    pub fn publish(&self, message: BusMessage) {
        let envelope = Envelope {
            origin: self.tab_id.clone(),
            message,
            nonce: Some(Uuid::new_v4()),
        };

        // Err only means nobody is listening right now.
        let receivers = self.channel.send(envelope.clone()).unwrap_or(0);
        debug!(tab = %self.tab_id, %message, receivers, "published bus message");

        match serde_json::to_string(&envelope) {
            Ok(raw) => {
                if let Err(e) = self.storage.set(&self.signal_key, &raw) {
                    warn!(tab = %self.tab_id, "bus storage signal failed: {e}");
                }
            }
            Err(e) => warn!(tab = %self.tab_id, "failed to encode bus signal: {e}"),
        }
    }

    /// Stream of messages from other tabs, merged across both transports.
    #[must_use]
    pub fn subscribe(&self) -> BoxStream<'static, BusMessage> {
        let own = self.tab_id.clone();
        let primary = BroadcastStream::new(self.channel.subscribe()).filter_map(move |res| {
            let own = own.clone();
            async move {
                match res {
                    Ok(envelope) if envelope.origin != own => Some(envelope.message),
                    Ok(_) => None,
                    // Lagged: something was missed, a full refresh covers it.
                    Err(_) => Some(BusMessage::RefreshSession),
                }
            }
        });

        let own = self.tab_id.clone();
        let lock_key = self.lock_key.clone();
        let signal_key = self.signal_key.clone();
        let fallback = BroadcastStream::new(self.storage.subscribe()).filter_map(move |res| {
            let msg = match res {
                Ok(event) => classify_storage_event(&event, &own, &lock_key, &signal_key),
                Err(_) => Some(BusMessage::RefreshSession),
            };
            async move { msg }
        });

        futures::stream::select(primary, fallback).boxed()
    }

    /// Run `handler` for every received message until the handle is dropped.
    pub fn spawn_listener<F, Fut>(&self, handler: F) -> TaskHandle
    where
        F: Fn(BusMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut stream = self.subscribe();
        TaskHandle::spawn("bus-listener", async move {
            while let Some(message) = stream.next().await {
                handler(message).await;
            }
        })
    }
}

/// Map a raw storage change onto a bus message.
///
/// Lock-key writes happen on every heartbeat and are dropped so they do not
/// flood subscribers. Anything this tab wrote itself is dropped too, whether
/// the backend attributes the write or the signal envelope names its origin.
fn classify_storage_event(
    event: &StorageEvent,
    own: &TabId,
    lock_key: &str,
    signal_key: &str,
) -> Option<BusMessage> {
    if event.key == lock_key || event.writer.as_ref() == Some(own) {
        return None;
    }
    if event.key == signal_key {
        let raw = event.new_value.as_deref()?;
        return match serde_json::from_str::<Envelope>(raw) {
            Ok(envelope) if &envelope.origin == own => None,
            Ok(envelope) => Some(envelope.message),
            Err(_) => Some(BusMessage::RefreshSession),
        };
    }
    Some(BusMessage::RefreshSession)
}
