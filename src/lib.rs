//! MQTT gateway: keeps the latest value of every subscribed topic in memory
//! and publishes values back onto the bus.
//!
//! - [`config`] - locating and parsing the broker configuration file
//! - [`mqtt`] - connection supervisor, message cache and publisher

pub mod config;
pub mod mqtt;
