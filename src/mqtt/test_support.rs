//! Scripted in-memory transport used by the unit tests.

use async_trait::async_trait;
use rumqttc::ConnectReturnCode;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::message_manager::InboundMessage;
use super::transport::{BusLink, Session, Transport, TransportError};

pub type Inbox = mpsc::UnboundedSender<Result<InboundMessage, TransportError>>;

/// Link that records every request it accepts.
///
/// With a request queue installed, SUBSCRIBE goes through a bounded channel
/// that only the session drains, like a real client's request channel.
#[derive(Default)]
pub struct RecordingLink {
    subscriptions: Mutex<Vec<String>>,
    publishes: Mutex<Vec<(String, Vec<u8>)>>,
    rejected_filters: Mutex<HashSet<String>>,
    fail_publishes: AtomicBool,
    request_queue: Mutex<Option<mpsc::Sender<String>>>,
}

impl RecordingLink {
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn publishes(&self) -> Vec<(String, Vec<u8>)> {
        self.publishes.lock().unwrap().clone()
    }

    pub fn reject_filter(&self, filter: &str) {
        self.rejected_filters
            .lock()
            .unwrap()
            .insert(filter.to_string());
    }

    pub fn fail_publishes(&self) {
        self.fail_publishes.store(true, Ordering::SeqCst);
    }

    fn record_subscription(&self, filter: String) {
        self.subscriptions.lock().unwrap().push(filter);
    }
}

#[async_trait]
impl BusLink for RecordingLink {
    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        let queue = self.request_queue.lock().unwrap().clone();
        if let Some(queue) = queue {
            return queue
                .send(filter.to_string())
                .await
                .map_err(|_| TransportError::Closed);
        }
        self.record_subscription(filter.to_string());
        if self.rejected_filters.lock().unwrap().contains(filter) {
            return Err(TransportError::Lost(format!("subscribe to {filter} rejected")));
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.publishes
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

enum Plan {
    Refuse,
    Hang,
    Accept(mpsc::UnboundedReceiver<Result<InboundMessage, TransportError>>),
}

/// Transport whose connect attempts follow a script.
///
/// Attempts beyond the script are refused. All sessions share one
/// [`RecordingLink`].
#[derive(Default)]
pub struct ScriptedTransport {
    plans: Mutex<VecDeque<Plan>>,
    attempts: Mutex<Vec<Instant>>,
    link: Arc<RecordingLink>,
    closed: Arc<AtomicUsize>,
    request_capacity: Mutex<Option<usize>>,
    close_delay: Mutex<Option<Duration>>,
}

impl ScriptedTransport {
    pub fn refuse_next(&self) {
        self.plans.lock().unwrap().push_back(Plan::Refuse);
    }

    /// The next attempt never completes.
    pub fn hang_next(&self) {
        self.plans.lock().unwrap().push_back(Plan::Hang);
    }

    /// Sessions accepted from now on queue SUBSCRIBE requests in a channel of
    /// `capacity` slots, drained only while the session is polled.
    pub fn limit_requests(&self, capacity: usize) {
        *self.request_capacity.lock().unwrap() = Some(capacity);
    }

    /// Sessions take `delay` to acknowledge `close`.
    pub fn delay_close(&self, delay: Duration) {
        *self.close_delay.lock().unwrap() = Some(delay);
    }

    /// Accepts the next attempt; the returned sender feeds the session.
    ///
    /// Sending an `Err` drops the connection. Dropping the sender leaves the
    /// session idle.
    pub fn accept_next(&self) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        self.plans.lock().unwrap().push_back(Plan::Accept(rx));
        tx
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn link(&self) -> Arc<RecordingLink> {
        Arc::clone(&self.link)
    }

    pub fn closed_sessions(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, _client_id: &str) -> Result<Box<dyn Session>, TransportError> {
        self.attempts.lock().unwrap().push(Instant::now());
        let plan = self.plans.lock().unwrap().pop_front().unwrap_or(Plan::Refuse);
        match plan {
            Plan::Refuse => Err(TransportError::Refused(ConnectReturnCode::ServiceUnavailable)),
            Plan::Hang => std::future::pending().await,
            Plan::Accept(inbox) => {
                let capacity = *self.request_capacity.lock().unwrap();
                let requests = capacity.map(|capacity| {
                    let (tx, rx) = mpsc::channel(capacity);
                    *self.link.request_queue.lock().unwrap() = Some(tx);
                    rx
                });
                Ok(Box::new(ScriptedSession {
                    inbox,
                    requests,
                    link: Arc::clone(&self.link),
                    closed: Arc::clone(&self.closed),
                    close_delay: *self.close_delay.lock().unwrap(),
                }))
            }
        }
    }
}

struct ScriptedSession {
    inbox: mpsc::UnboundedReceiver<Result<InboundMessage, TransportError>>,
    requests: Option<mpsc::Receiver<String>>,
    link: Arc<RecordingLink>,
    closed: Arc<AtomicUsize>,
    close_delay: Option<Duration>,
}

#[async_trait]
impl Session for ScriptedSession {
    fn link(&self) -> Arc<dyn BusLink> {
        self.link.clone()
    }

    async fn next_message(&mut self) -> Result<InboundMessage, TransportError> {
        let mut inbox_open = true;
        loop {
            let requests = &mut self.requests;
            let next_request = async move {
                match requests {
                    Some(requests) => requests.recv().await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                Some(filter) = next_request => self.link.record_subscription(filter),
                next = self.inbox.recv(), if inbox_open => match next {
                    Some(next) => return next,
                    None => inbox_open = false,
                },
                else => return std::future::pending().await,
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
