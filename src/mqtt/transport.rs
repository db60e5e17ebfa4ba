//! Transport boundary between the connection supervisor and the MQTT client
//!
//! The supervisor only speaks to three small traits:
//!
//! - [`Transport`] opens a fresh broker session per connect attempt
//! - [`Session`] is the connection itself; driving it yields inbound messages
//!   until the connection is gone
//! - [`BusLink`] is the cloneable request side used for SUBSCRIBE and PUBLISH
//!
//! [`RumqttTransport`] implements them on top of `rumqttc`. Each connect creates
//! a new `AsyncClient`/`EventLoop` pair, so no subscription or session state
//! survives a reconnect.

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Outgoing, Packet, QoS, SubscribeReasonCode,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::config::MqttConfig;
use super::message_manager::InboundMessage;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("broker refused connection: {0:?}")]
    Refused(ConnectReturnCode),

    #[error("no CONNACK within {0:?}")]
    ConnectTimeout(Duration),

    #[error("connection lost: {0}")]
    Lost(String),

    #[error("connection closed")]
    Closed,
}

/// Opens broker sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connects and returns once the broker has accepted the session.
    async fn connect(&self, client_id: &str) -> Result<Box<dyn Session>, TransportError>;
}

/// A live broker connection.
#[async_trait]
pub trait Session: Send {
    /// Request handle bound to this connection.
    fn link(&self) -> Arc<dyn BusLink>;

    /// Drives the connection until the next inbound PUBLISH.
    ///
    /// An error means the connection is gone and the session must be dropped.
    async fn next_message(&mut self) -> Result<InboundMessage, TransportError>;

    /// Sends DISCONNECT and waits until it has been written.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Request side of a session. Every operation is fire-and-forget at QoS 0.
///
/// `Ok` means the request was handed to the session's outgoing queue. It is
/// written to the socket the next time the session is polled, and QoS 0 has
/// no broker acknowledgement.
#[async_trait]
pub trait BusLink: Send + Sync {
    async fn subscribe(&self, filter: &str) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// [`Transport`] backed by `rumqttc`.
#[derive(Debug, Clone)]
pub struct RumqttTransport {
    host: String,
    port: u16,
    keep_alive: Duration,
    connect_timeout: Duration,
    request_capacity: usize,
}

impl RumqttTransport {
    pub fn new(config: &MqttConfig) -> Self {
        Self {
            host: config.broker_ip.clone(),
            port: config.port,
            keep_alive: config.keep_alive(),
            connect_timeout: config.connect_timeout(),
            request_capacity: config.request_capacity,
        }
    }

    fn options(&self, client_id: &str) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options
            .set_keep_alive(self.keep_alive)
            .set_clean_session(true);
        options
    }

    async fn await_connack(event_loop: &mut EventLoop) -> Result<(), TransportError> {
        loop {
            match event_loop.poll().await? {
                Event::Incoming(Packet::ConnAck(ack)) => {
                    if ack.code == ConnectReturnCode::Success {
                        return Ok(());
                    }
                    return Err(TransportError::Refused(ack.code));
                }
                notification => {
                    debug!("Connect phase notification: {:?}", notification);
                }
            }
        }
    }
}

#[async_trait]
impl Transport for RumqttTransport {
    async fn connect(&self, client_id: &str) -> Result<Box<dyn Session>, TransportError> {
        let (client, mut event_loop) = AsyncClient::new(self.options(client_id), self.request_capacity);

        tokio::time::timeout(self.connect_timeout, Self::await_connack(&mut event_loop))
            .await
            .map_err(|_| TransportError::ConnectTimeout(self.connect_timeout))??;

        Ok(Box::new(RumqttSession {
            link: Arc::new(RumqttLink { client }),
            event_loop,
        }))
    }
}

struct RumqttSession {
    link: Arc<RumqttLink>,
    event_loop: EventLoop,
}

#[async_trait]
impl Session for RumqttSession {
    fn link(&self) -> Arc<dyn BusLink> {
        self.link.clone()
    }

    async fn next_message(&mut self) -> Result<InboundMessage, TransportError> {
        loop {
            match self.event_loop.poll().await? {
                Event::Incoming(Packet::Publish(publish)) => {
                    return Ok(InboundMessage::from_topic(publish.topic, publish.payload.to_vec()));
                }
                Event::Incoming(Packet::SubAck(ack)) => {
                    if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        warn!("Broker rejected subscription (pkid {})", ack.pkid);
                    }
                }
                Event::Incoming(Packet::Disconnect) => {
                    return Err(TransportError::Lost("broker sent DISCONNECT".to_string()));
                }
                Event::Outgoing(Outgoing::Disconnect) => return Err(TransportError::Closed),
                notification => {
                    debug!("MQTT notification: {:?}", notification);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.link.client.disconnect().await?;
        loop {
            if let Event::Outgoing(Outgoing::Disconnect) = self.event_loop.poll().await? {
                return Ok(());
            }
        }
    }
}

struct RumqttLink {
    client: AsyncClient,
}

#[async_trait]
impl BusLink for RumqttLink {
    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        // Waits for room in the request channel; the session drains it.
        self.client.subscribe(filter, QoS::AtMostOnce).await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await?;
        Ok(())
    }
}
