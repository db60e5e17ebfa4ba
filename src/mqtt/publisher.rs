use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use super::message_manager::LinkStats;
use super::mqtt_handler::{ConnectionState, LinkSlot};
use super::transport::{BusLink, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("MQTT client is not connected")]
    NotConnected,

    #[error("Failed to encode payload for {topic}: {source}")]
    Encode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Transport(#[from] TransportError),
}

/// Sends values onto the bus over the supervisor's live link.
///
/// There is no queue behind it: a publish while the link is down fails right
/// away and is never retried.
#[derive(Clone)]
pub struct Publisher {
    slot: watch::Receiver<LinkSlot>,
    stats: Arc<LinkStats>,
}

impl Publisher {
    pub fn new(slot: watch::Receiver<LinkSlot>, stats: Arc<LinkStats>) -> Self {
        Self { slot, stats }
    }

    fn live_link(&self) -> Option<Arc<dyn BusLink>> {
        let slot = self.slot.borrow();
        match slot.state {
            ConnectionState::Connected => slot.link.clone(),
            _ => None,
        }
    }

    /// Serializes `value` to JSON and publishes it at QoS 0 without retain.
    ///
    /// Returns once the client has queued the PUBLISH for the live connection.
    /// This is not a delivery receipt: the packet reaches the socket on the
    /// supervisor's next poll, and a connection that drops first loses it.
    pub async fn publish<T>(&self, topic: &str, value: &T) -> Result<(), PublishError>
    where
        T: Serialize + ?Sized,
    {
        let link = self.live_link().ok_or(PublishError::NotConnected)?;
        let payload = serde_json::to_vec(value).map_err(|source| PublishError::Encode {
            topic: topic.to_string(),
            source,
        })?;

        debug!("Publishing {} byte(s) to {}", payload.len(), topic);
        link.publish(topic, payload).await?;
        self.stats.record_published();
        info!("Published to {}", topic);
        Ok(())
    }

    /// Publishes `(topic, value)` pairs in order, stopping at the first failure.
    pub async fn publish_many<'a, T, I>(&self, messages: I) -> Result<(), PublishError>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = (&'a str, &'a T)>,
    {
        for (topic, value) in messages {
            self.publish(topic, value).await?;
        }
        Ok(())
    }
}
