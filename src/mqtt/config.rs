use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Broker connection settings and the topic groups to subscribe to.
///
/// Field names follow the `broker_config` file layout, so an existing
/// `{"broker_ip": ..., "port": ..., "topics": {"goE": [...]}}` file loads
/// unchanged. Every field has a default; an empty file is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    #[serde(alias = "broker")]
    pub broker_ip: String,
    pub port: u16,
    /// Named groups of topic filters, e.g. one group per device.
    pub topics: BTreeMap<String, Vec<String>>,
    pub client_id_prefix: String,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    pub reconnect_interval_secs: u64,
    /// Capacity of the client request channel (subscribes and publishes in flight)
    pub request_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_ip: "localhost".to_string(),
            port: 1883,
            topics: BTreeMap::new(),
            client_id_prefix: "webgui-api".to_string(),
            keep_alive_secs: 5,
            connect_timeout_secs: 10,
            reconnect_interval_secs: 5,
            request_capacity: 100,
        }
    }
}

impl MqttConfig {
    /// Flattens the topic groups into the ordered subscription set.
    ///
    /// Groups are visited in name order, filters keep their order within a group.
    pub fn subscription_set(&self) -> Vec<String> {
        self.topics.values().flatten().cloned().collect()
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    /// Broker address in `host:port` form, for log output.
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.broker_ip, self.port)
    }

    /// Checks values the connection loop cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.broker_ip.trim().is_empty() {
            return Err("broker_ip must not be empty".to_string());
        }
        if self.reconnect_interval_secs == 0 {
            return Err("reconnect_interval_secs must be greater than 0".to_string());
        }
        if self.connect_timeout_secs == 0 {
            return Err("connect_timeout_secs must be greater than 0".to_string());
        }
        if self.request_capacity == 0 {
            return Err("request_capacity must be greater than 0".to_string());
        }
        Ok(())
    }
}
