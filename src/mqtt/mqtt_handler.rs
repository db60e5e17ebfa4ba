//! Connection supervisor with statum state machine
//!
//! Owns the broker connection for the whole process lifetime. Transitions are
//! checked at compile time; the runtime [`ConnectionState`] is mirrored into a
//! watch channel so that other components can observe it.
//!
//! # State Machine
//!
//! ```text
//!                ┌──────── connect failed ─────────┐
//!                ▼                                 │
//! start ──► Connecting ──► Connected ──► Disconnected ──(backoff)──┐
//!                ▲                                                  │
//!                └──────────────────────────────────────────────────┘
//!
//!           any state ──(stop)──► Stopped
//! ```
//!
//! Every `Connecting → Connected` transition opens a fresh session and issues
//! SUBSCRIBE for the whole subscription set again. Cached values are untouched
//! by any transition.

use statum::{machine, state};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::message_manager::MessageStore;
use super::transport::{BusLink, Session, Transport};

/// Upper bound for the graceful DISCONNECT on shutdown
const CLOSE_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, serde::Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Stopped,
}

/// What the supervisor publishes to the rest of the process.
///
/// The link is only present while `Connected`.
#[derive(Clone, Default)]
pub struct LinkSlot {
    pub state: ConnectionState,
    pub link: Option<Arc<dyn BusLink>>,
}

impl LinkSlot {
    pub(crate) fn without_link(state: ConnectionState) -> Self {
        Self { state, link: None }
    }
}

// Supervisor phases
#[state]
#[derive(Debug, Clone)]
pub enum LinkPhase {
    Disconnected,
    Connecting,
    Connected,
    Stopped,
}

#[machine]
pub struct Supervisor<S: LinkPhase> {
    transport: Arc<dyn Transport>,
    client_id: String,
    topics: Arc<[String]>,
    reconnect_interval: Duration,
    store: MessageStore,
    slot: Arc<watch::Sender<LinkSlot>>,
    shutdown: CancellationToken,
    session: Option<Box<dyn Session>>,
}

enum ConnectOutcome {
    Connected(Supervisor<Connected>),
    Failed(Supervisor<Disconnected>),
    Stopped(Supervisor<Stopped>),
}

enum ServeOutcome {
    Lost(Supervisor<Disconnected>),
    Stopped(Supervisor<Stopped>),
}

impl<S: LinkPhase> Supervisor<S> {
    fn publish_state(&self, state: ConnectionState) {
        self.slot.send_replace(LinkSlot::without_link(state));
    }

    /// Terminal transition, valid from every phase.
    fn halt(mut self) -> Supervisor<Stopped> {
        self.session = None;
        self.publish_state(ConnectionState::Stopped);
        self.transition()
    }
}

impl Supervisor<Disconnected> {
    pub fn create(
        transport: Arc<dyn Transport>,
        client_id: String,
        topics: Vec<String>,
        reconnect_interval: Duration,
        store: MessageStore,
        slot: Arc<watch::Sender<LinkSlot>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self::new(
            transport,
            client_id,
            topics.into(),
            reconnect_interval,
            store,
            slot,
            shutdown,
            None, // session
        )
    }

    /// Runs connect/serve/backoff cycles until shutdown is requested.
    pub async fn run(self) -> Supervisor<Stopped> {
        info!(
            "Connection supervisor started as '{}' with {} topic(s)",
            self.client_id,
            self.topics.len()
        );

        let mut disconnected = self;
        loop {
            let outcome = disconnected.begin_connect().connect().await;
            disconnected = match outcome {
                ConnectOutcome::Connected(connected) => match connected.serve().await {
                    ServeOutcome::Lost(lost) => lost,
                    ServeOutcome::Stopped(stopped) => return stopped,
                },
                ConnectOutcome::Failed(failed) => failed,
                ConnectOutcome::Stopped(stopped) => return stopped,
            };

            disconnected = match disconnected.backoff().await {
                Ok(ready) => ready,
                Err(stopped) => return stopped,
            };
        }
    }

    fn begin_connect(self) -> Supervisor<Connecting> {
        self.publish_state(ConnectionState::Connecting);
        self.transition()
    }

    /// Waits the fixed reconnect interval unless shutdown comes first.
    async fn backoff(self) -> Result<Self, Supervisor<Stopped>> {
        info!("Reconnecting in {:?}", self.reconnect_interval);
        let shutdown = self.shutdown.clone();
        let cancelled = tokio::select! {
            _ = shutdown.cancelled() => true,
            _ = tokio::time::sleep(self.reconnect_interval) => false,
        };
        if cancelled {
            Err(self.halt())
        } else {
            Ok(self)
        }
    }
}

impl Supervisor<Connecting> {
    async fn connect(mut self) -> ConnectOutcome {
        if self.shutdown.is_cancelled() {
            return ConnectOutcome::Stopped(self.halt());
        }

        info!("Connecting to MQTT broker as '{}'", self.client_id);
        let shutdown = self.shutdown.clone();
        let attempt = tokio::select! {
            _ = shutdown.cancelled() => None,
            result = self.transport.connect(&self.client_id) => Some(result),
        };

        match attempt {
            None => ConnectOutcome::Stopped(self.halt()),
            Some(Ok(session)) => {
                let link = session.link();
                self.session = Some(session);
                let connected: Supervisor<Connected> = self.transition();
                connected.announce(link);
                ConnectOutcome::Connected(connected)
            }
            Some(Err(e)) => {
                error!("MQTT connect error: {}", e);
                self.publish_state(ConnectionState::Disconnected);
                ConnectOutcome::Failed(self.transition())
            }
        }
    }
}

impl Supervisor<Connected> {
    /// Makes the live link visible to publishers.
    fn announce(&self, link: Arc<dyn BusLink>) {
        self.slot.send_replace(LinkSlot {
            state: ConnectionState::Connected,
            link: Some(link),
        });
        info!("Connected to MQTT broker");
    }

    /// Subscribes the whole topic set, then feeds inbound messages into the
    /// store until the connection drops or shutdown is requested.
    ///
    /// The session is polled while SUBSCRIBE requests are queued, so a topic
    /// set larger than the client's request capacity still goes out in full.
    async fn serve(mut self) -> ServeOutcome {
        let Some(mut session) = self.session.take() else {
            error!("Connected without a session");
            self.publish_state(ConnectionState::Disconnected);
            return ServeOutcome::Lost(self.transition());
        };

        let topics = Arc::clone(&self.topics);
        let subscribing = subscribe_topics(session.link(), Arc::clone(&topics));
        tokio::pin!(subscribing);
        let mut subscribed = false;

        let shutdown = self.shutdown.clone();
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => None,
                count = &mut subscribing, if !subscribed => {
                    subscribed = true;
                    info!("Subscribed to {}/{} topic(s)", count, topics.len());
                    continue;
                }
                next = session.next_message() => Some(next),
            };

            match next {
                Some(Ok(message)) => self.store.handle_message(message),
                Some(Err(e)) => {
                    warn!("MQTT connection lost: {}", e);
                    drop(session);
                    self.publish_state(ConnectionState::Disconnected);
                    return ServeOutcome::Lost(self.transition());
                }
                None => {
                    // Withdraw the link before closing so publishers fail fast.
                    self.publish_state(ConnectionState::Stopped);
                    match tokio::time::timeout(CLOSE_TIMEOUT, session.close()).await {
                        Ok(Ok(())) => debug!("Sent DISCONNECT"),
                        Ok(Err(e)) => debug!("Disconnect failed: {}", e),
                        Err(_) => debug!("Disconnect timed out after {:?}", CLOSE_TIMEOUT),
                    }
                    return ServeOutcome::Stopped(self.halt());
                }
            }
        }
    }
}

/// Subscribes every topic in order at QoS 0.
///
/// A failed SUBSCRIBE is logged and skipped; a partial subscription set is a
/// valid outcome.
async fn subscribe_topics(link: Arc<dyn BusLink>, topics: Arc<[String]>) -> usize {
    let mut subscribed = 0;
    for topic in topics.iter() {
        match link.subscribe(topic).await {
            Ok(()) => {
                subscribed += 1;
                debug!("Subscribed to {}", topic);
            }
            Err(e) => warn!("Subscribe failed for {}: {}", topic, e),
        }
    }
    subscribed
}

impl Supervisor<Stopped> {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}
