//! Inbound message representation and the decode-and-store step
//!
//! Every PUBLISH delivered by the broker ends up in [`MessageStore::handle_message`]:
//!
//! ```text
//! InboundMessage ──► decode_payload ──► cache_key(topic) ──► MessageCache::put
//! ```
//!
//! The step never touches the network and never fails. Payloads that are not
//! valid JSON are kept as plain strings.

use chrono::{DateTime, Local};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use super::message_cache::MessageCache;
use super::topic_key::cache_key;

const PREVIEW_CHARS: usize = 32;

/// A message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Local>,
}

impl InboundMessage {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Local::now(),
        }
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let content = String::from_utf8_lossy(&self.payload);
        let preview: String = content.chars().take(PREVIEW_CHARS).collect();
        let ellipsis = if content.chars().count() > PREVIEW_CHARS {
            "..."
        } else {
            ""
        };
        write!(
            f,
            "{} - {}: {}{}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            preview,
            ellipsis
        )
    }
}

/// Decodes a payload as JSON, falling back to its (lossy UTF-8) text.
pub fn decode_payload(payload: &[u8]) -> Value {
    match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(_) => Value::String(String::from_utf8_lossy(payload).into_owned()),
    }
}

/// Traffic counters shared by the store and the publisher.
#[derive(Debug, Default)]
pub struct LinkStats {
    messages_received: AtomicU64,
    messages_published: AtomicU64,
    last_message_at: Mutex<Option<DateTime<Local>>>,
}

impl LinkStats {
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    pub fn last_message_at(&self) -> Option<DateTime<Local>> {
        *self
            .last_message_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record_received(&self, at: DateTime<Local>) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        *self
            .last_message_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    pub(crate) fn record_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }
}

/// Write side of the cache, owned by the connection task.
#[derive(Debug, Clone)]
pub struct MessageStore {
    cache: Arc<MessageCache>,
    stats: Arc<LinkStats>,
}

impl MessageStore {
    pub fn new(cache: Arc<MessageCache>, stats: Arc<LinkStats>) -> Self {
        Self { cache, stats }
    }

    /// Decodes the payload and stores it under the normalized topic key.
    pub fn handle_message(&self, message: InboundMessage) {
        debug!("Received {}", message);
        let key = cache_key(&message.topic);
        let value = decode_payload(&message.payload);
        self.cache.put(key, value);
        self.stats.record_received(message.received_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (MessageStore, Arc<MessageCache>, Arc<LinkStats>) {
        let cache = Arc::new(MessageCache::new());
        let stats = Arc::new(LinkStats::default());
        (
            MessageStore::new(Arc::clone(&cache), Arc::clone(&stats)),
            cache,
            stats,
        )
    }

    #[test]
    fn json_payloads_are_decoded() {
        assert_eq!(decode_payload(b"[1,2,3]"), json!([1, 2, 3]));
        assert_eq!(decode_payload(b"42"), json!(42));
        assert_eq!(decode_payload(b" {\"a\": true} "), json!({ "a": true }));
        assert_eq!(decode_payload(b"null"), Value::Null);
    }

    #[test]
    fn invalid_json_falls_back_to_text() {
        assert_eq!(decode_payload(b"not-json"), json!("not-json"));
        assert_eq!(decode_payload(b""), json!(""));
        assert_eq!(decode_payload(&[0x66, 0x6f, 0xff]), json!("fo\u{fffd}"));
    }

    #[test]
    fn charger_array_lands_under_short_key() {
        let (store, cache, _) = store();
        store.handle_message(InboundMessage::from_topic("go-eCharger/254959/nrg", "[1,2,3]"));
        assert_eq!(cache.snapshot().get("nrg"), Some(&json!([1, 2, 3])));
    }

    #[test]
    fn nested_inverter_topic_joins_remaining_segments() {
        let (store, cache, _) = store();
        store.handle_message(InboundMessage::from_topic("goodwe/254959/battery/soc", "42"));
        assert_eq!(cache.snapshot().get("battery_soc"), Some(&json!(42)));
    }

    #[test]
    fn non_json_payload_is_stored_verbatim() {
        let (store, cache, _) = store();
        store.handle_message(InboundMessage::from_topic("go-eCharger/254959/car", "not-json"));
        assert_eq!(cache.snapshot().get("car"), Some(&json!("not-json")));
    }

    #[test]
    fn handling_updates_stats() {
        let (store, _, stats) = store();
        assert!(stats.last_message_at().is_none());

        let message = InboundMessage::from_topic("a/b/c", "1");
        let at = message.received_at;
        store.handle_message(message);
        store.handle_message(InboundMessage::from_topic("a/b/d", "2"));

        assert_eq!(stats.messages_received(), 2);
        assert!(stats.last_message_at().unwrap() >= at);
    }

    #[test]
    fn display_truncates_long_payloads() {
        let message = InboundMessage::from_topic("t", "x".repeat(100));
        let rendered = message.to_string();
        assert!(rendered.ends_with("..."));
        assert!(rendered.contains(&"x".repeat(PREVIEW_CHARS)));
        assert!(!rendered.contains(&"x".repeat(PREVIEW_CHARS + 1)));

        let short = InboundMessage::from_topic("t", "ok").to_string();
        assert!(short.ends_with("t: ok"));
    }
}
