/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

use crate::error::{Result, StreamError};
use crate::subscription::manager::ServiceSubscriptionManagerDetails;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONNECT_RETRY_DELAY: Duration = Duration::from_millis(2500);
pub const MIN_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

fn default_connect_retry_delay_ms() -> u64 {
    DEFAULT_CONNECT_RETRY_DELAY.as_millis() as u64
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

/// Tunables shared by members and subscriptions.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StreamlinkConfig {
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Receive limit applied to pipe subscriptions that do not set their own.
    #[serde(default)]
    pub pipe_max_recv_packets: Option<usize>,
}

impl Default for StreamlinkConfig {
    fn default() -> Self {
        Self {
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
            event_capacity: default_event_capacity(),
            pipe_max_recv_packets: None,
        }
    }
}

impl StreamlinkConfig {
    /// Retry delay, clamped to [`MIN_CONNECT_RETRY_DELAY`].
    pub fn connect_retry_delay(&self) -> Duration {
        clamp_retry_delay(Duration::from_millis(self.connect_retry_delay_ms))
    }

    pub fn with_connect_retry_delay(mut self, delay: Duration) -> Self {
        self.connect_retry_delay_ms = clamp_retry_delay(delay).as_millis() as u64;
        self
    }

    pub fn from_json5_str(contents: &str) -> Result<Self> {
        parse_json5(contents)
    }
}

pub(crate) fn clamp_retry_delay(delay: Duration) -> Duration {
    delay.max(MIN_CONNECT_RETRY_DELAY)
}

/// File form of a subscription manager: runtime tunables plus named
/// subscriptions.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ManagerConfig {
    #[serde(default)]
    pub runtime: StreamlinkConfig,
    #[serde(default)]
    pub subscriptions: Vec<ServiceSubscriptionManagerDetails>,
}

impl ManagerConfig {
    pub fn from_json5_str(contents: &str) -> Result<Self> {
        parse_json5(contents)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StreamError::invalid_argument(format!("unable to read {}: {e}", path.display()))
        })?;
        Self::from_json5_str(&contents)
    }
}

fn parse_json5<T: serde::de::DeserializeOwned>(contents: &str) -> Result<T> {
    json5::from_str(contents)
        .map_err(|e| StreamError::invalid_argument(format!("invalid configuration: {e}")))
}

#[cfg(test)]
mod tests {
    use super::{ManagerConfig, StreamlinkConfig, DEFAULT_CONNECT_RETRY_DELAY};
    use std::time::Duration;

    #[test]
    fn defaults_apply_to_empty_object() {
        let config = StreamlinkConfig::from_json5_str("{}").unwrap();
        assert_eq!(config, StreamlinkConfig::default());
        assert_eq!(config.connect_retry_delay(), DEFAULT_CONNECT_RETRY_DELAY);
    }

    #[test]
    fn retry_delay_never_drops_below_one_second() {
        let config = StreamlinkConfig::from_json5_str("{ connect_retry_delay_ms: 10 }").unwrap();
        assert_eq!(config.connect_retry_delay(), Duration::from_secs(1));

        let config = StreamlinkConfig::default().with_connect_retry_delay(Duration::ZERO);
        assert_eq!(config.connect_retry_delay_ms, 1000);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(StreamlinkConfig::from_json5_str("{ retry: 3 }").is_err());
    }

    #[test]
    fn manager_config_parses_named_subscriptions() {
        let config = ManagerConfig::from_json5_str(
            r#"{
                // comments are fine in json5
                runtime: { connect_retry_delay_ms: 1500 },
                subscriptions: [
                    { name: "reporter", urls: ["loopback://node-a/?service=reporter"] },
                    {
                        name: "sensors",
                        service_types: ["demo.Sensor"],
                        filter: { service_names: ["left", "right"] },
                        enabled: false,
                    },
                ],
            }"#,
        )
        .unwrap();

        assert_eq!(config.runtime.connect_retry_delay_ms, 1500);
        assert_eq!(config.subscriptions.len(), 2);
        assert!(config.subscriptions[0].enabled);
        assert!(!config.subscriptions[1].enabled);
        let filter = config.subscriptions[1].filter.as_ref().unwrap();
        assert_eq!(filter.service_names, vec!["left", "right"]);
    }
}
