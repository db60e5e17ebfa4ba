//! Connection-and-cache manager
//!
//! [`MqttManager`] ties the pieces together and is the only type the rest of the
//! process talks to. It is constructed once by the composition root and handed
//! to consumers (usually behind an `Arc`).
//!
//! ```text
//!                ┌──────────────── MqttManager ─────────────────┐
//! broker ──► Supervisor ──► MessageStore ──► MessageCache ──► SnapshotReader ──► callers
//!                │ watch<LinkSlot>                                 │
//!                └──────────────► Publisher ◄───────────────────────┘
//! ```

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::config::MqttConfig;
use super::message_cache::{MessageCache, Snapshot, SnapshotReader};
use super::message_manager::{LinkStats, MessageStore};
use super::mqtt_handler::{ConnectionState, LinkSlot, Supervisor};
use super::publisher::{PublishError, Publisher};
use super::transport::{RumqttTransport, Transport};

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("MQTT manager has already been started")]
    AlreadyStarted,
}

/// Point-in-time view of the manager for status endpoints and logs.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub state: ConnectionState,
    pub client_id: String,
    pub broker: String,
    pub cached_keys: usize,
    pub messages_received: u64,
    pub messages_published: u64,
    pub last_message_at: Option<DateTime<Local>>,
}

enum Lifecycle {
    Idle,
    Running(JoinHandle<()>),
    Finished,
}

pub struct MqttManager {
    client_id: String,
    broker: String,
    topics: Vec<String>,
    reconnect_interval: Duration,
    transport: Arc<dyn Transport>,
    cache: Arc<MessageCache>,
    stats: Arc<LinkStats>,
    slot: Arc<watch::Sender<LinkSlot>>,
    publisher: Publisher,
    shutdown: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
    exited: watch::Sender<bool>,
}

impl MqttManager {
    /// Creates a manager talking to the broker named in `config`.
    pub fn new(config: &MqttConfig) -> Self {
        Self::with_transport(config, Arc::new(RumqttTransport::new(config)))
    }

    /// Creates a manager on top of a custom transport.
    ///
    /// The client id is fixed here, from the construction time, and reused by
    /// every reconnect of this instance.
    pub fn with_transport(config: &MqttConfig, transport: Arc<dyn Transport>) -> Self {
        let client_id = format!(
            "{}-{}",
            config.client_id_prefix,
            Utc::now().timestamp_millis()
        );
        let cache = Arc::new(MessageCache::new());
        let stats = Arc::new(LinkStats::default());
        let (slot, slot_rx) = watch::channel(LinkSlot::default());
        let publisher = Publisher::new(slot_rx, Arc::clone(&stats));

        Self {
            client_id,
            broker: config.broker_addr(),
            topics: config.subscription_set(),
            reconnect_interval: config.reconnect_interval(),
            transport,
            cache,
            stats,
            slot: Arc::new(slot),
            publisher,
            shutdown: CancellationToken::new(),
            lifecycle: Mutex::new(Lifecycle::Idle),
            exited: watch::Sender::new(false),
        }
    }

    /// Spawns the connection supervisor onto the current tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ManagerError::AlreadyStarted`] on every call after the first.
    pub fn start(&self) -> Result<(), ManagerError> {
        let mut lifecycle = self
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !matches!(*lifecycle, Lifecycle::Idle) {
            return Err(ManagerError::AlreadyStarted);
        }

        let supervisor = Supervisor::create(
            Arc::clone(&self.transport),
            self.client_id.clone(),
            self.topics.clone(),
            self.reconnect_interval,
            MessageStore::new(Arc::clone(&self.cache), Arc::clone(&self.stats)),
            Arc::clone(&self.slot),
            self.shutdown.clone(),
        );

        info!("Starting MQTT manager for broker {}", self.broker);
        let handle = tokio::spawn(async move {
            let stopped = supervisor.run().await;
            info!("MQTT manager '{}' stopped", stopped.client_id());
        });
        *lifecycle = Lifecycle::Running(handle);
        Ok(())
    }

    /// Stops the supervisor and waits for it to exit. Safe to call repeatedly,
    /// concurrently and before [`start`](Self::start); every caller returns
    /// only once the supervisor task is gone.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let previous = {
            let mut lifecycle = self
                .lifecycle
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *lifecycle, Lifecycle::Finished)
        };

        match previous {
            Lifecycle::Running(handle) => {
                if let Err(e) = handle.await {
                    warn!("MQTT supervisor task failed: {}", e);
                }
                self.exited.send_replace(true);
            }
            Lifecycle::Idle => {
                self.slot
                    .send_replace(LinkSlot::without_link(ConnectionState::Stopped));
                self.exited.send_replace(true);
            }
            Lifecycle::Finished => {
                let mut exited = self.exited.subscribe();
                let _ = exited.wait_for(|exited| *exited).await;
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.cache.snapshot()
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader::new(Arc::clone(&self.cache))
    }

    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.slot.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Resolves once the supervisor reports `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) {
        let mut rx = self.slot.subscribe();
        loop {
            let current = rx.borrow_and_update().state;
            if current == target || rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub async fn publish(&self, topic: &str, value: &Value) -> Result<(), PublishError> {
        self.publisher.publish(topic, value).await
    }

    pub async fn publish_many<'a, I>(&self, messages: I) -> Result<(), PublishError>
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        self.publisher.publish_many(messages).await
    }

    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            state: self.state(),
            client_id: self.client_id.clone(),
            broker: self.broker.clone(),
            cached_keys: self.cache.len(),
            messages_received: self.stats.messages_received(),
            messages_published: self.stats.messages_published(),
            last_message_at: self.stats.last_message_at(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }
}
