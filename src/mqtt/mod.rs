//! # MQTT Connection-and-Cache Module
//!
//! Keeps one broker connection alive for the lifetime of the process, records
//! the latest value seen on every subscribed topic and writes values back onto
//! the bus on request.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings and topic groups
//! ├── topic_key.rs        - Topic → cache key normalization
//! ├── message_cache.rs    - Latest-value cache and snapshots
//! ├── message_manager.rs  - Inbound messages, decode-and-store, traffic stats
//! ├── transport.rs        - Transport traits and the rumqttc implementation
//! ├── mqtt_handler.rs     - Connection supervisor state machine
//! ├── publisher.rs        - Outbound publishes over the live link
//! └── manager.rs          - MqttManager, the public entry point
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! broker ─► Session ─► MessageStore ─► MessageCache ─► Snapshot ─► request handlers
//! request handlers ─► Publisher ─► BusLink ─► broker
//! ```
//!
//! ## Failure Model
//!
//! - Connection problems never leave this module. The supervisor retries every
//!   `reconnect_interval_secs` for as long as the process runs.
//! - A publish while disconnected fails immediately with
//!   [`PublishError::NotConnected`]; nothing is queued.
//! - Payloads that are not JSON are stored as strings.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mqtt_gateway::mqtt::{MqttConfig, MqttManager};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = Arc::new(MqttManager::new(&MqttConfig::default()));
//! manager.start()?;
//!
//! let snapshot = manager.snapshot();
//! if let Some(nrg) = snapshot.get("nrg") {
//!     println!("charger energy: {nrg}");
//! }
//! manager.publish("go-eCharger/254959/amp/set", &json!(16)).await?;
//!
//! manager.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod manager;
pub mod message_cache;
pub mod message_manager;
pub mod mqtt_handler;
pub mod publisher;
pub mod topic_key;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::MqttConfig;
pub use manager::{ManagerError, ManagerStatus, MqttManager};
pub use message_cache::{MessageCache, Snapshot, SnapshotReader};
pub use message_manager::{decode_payload, InboundMessage};
pub use mqtt_handler::ConnectionState;
pub use publisher::{PublishError, Publisher};
pub use topic_key::cache_key;
pub use transport::{BusLink, RumqttTransport, Session, Transport, TransportError};
