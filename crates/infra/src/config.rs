//! Consumer configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use eventline_core::{CoreError, Endpoint, SchemaVersion};

use crate::connector::ReconnectPolicy;
use crate::dispatch::DispatchConfig;
use crate::workers::{LaneConfig, OverflowPolicy};

pub const ENDPOINT_VAR: &str = "EVENTLINE_ENDPOINT";
pub const VERSION_VAR: &str = "EVENTLINE_VERSION";
pub const LANES_VAR: &str = "EVENTLINE_LANES";
pub const LANE_CAPACITY_VAR: &str = "EVENTLINE_LANE_CAPACITY";
pub const OVERFLOW_VAR: &str = "EVENTLINE_OVERFLOW";
pub const HANDLER_PARALLELISM_VAR: &str = "EVENTLINE_HANDLER_PARALLELISM";
pub const DRAIN_ON_SHUTDOWN_VAR: &str = "EVENTLINE_DRAIN_ON_SHUTDOWN";
pub const MAX_RECONNECTS_VAR: &str = "EVENTLINE_MAX_RECONNECTS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has an invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Everything an endpoint needs to consume its routed stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub endpoint: Endpoint,
    #[serde(default)]
    pub version: SchemaVersion,
    #[serde(default)]
    pub lanes: LaneConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl ConsumerConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            version: SchemaVersion::default(),
            lanes: LaneConfig::default(),
            dispatch: DispatchConfig::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_version(mut self, version: SchemaVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_lanes(mut self, lanes: LaneConfig) -> Self {
        self.lanes = lanes;
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Read the `EVENTLINE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable lookup; unset and blank values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &'static str| lookup(var).filter(|v| !v.trim().is_empty());

        let endpoint = Endpoint::new(get(ENDPOINT_VAR).ok_or(ConfigError::Missing(ENDPOINT_VAR))?)?;
        let mut config = Self::new(endpoint);

        if let Some(version) = get(VERSION_VAR) {
            config.version = version.parse()?;
        }
        if let Some(lanes) = get(LANES_VAR) {
            let count: usize = parse(LANES_VAR, &lanes)?;
            if count == 0 {
                return Err(invalid(LANES_VAR, &lanes, "at least one lane is required"));
            }
            config.lanes.count = count;
        }
        if let Some(capacity) = get(LANE_CAPACITY_VAR) {
            let capacity: usize = parse(LANE_CAPACITY_VAR, &capacity)?;
            config.lanes.capacity = Some(capacity.max(1));
        }
        if let Some(overflow) = get(OVERFLOW_VAR) {
            config.lanes.overflow = parse::<OverflowPolicy>(OVERFLOW_VAR, &overflow)?;
        }
        if let Some(drain) = get(DRAIN_ON_SHUTDOWN_VAR) {
            config.lanes.drain_on_shutdown = parse_flag(DRAIN_ON_SHUTDOWN_VAR, &drain)?;
        }
        if let Some(parallelism) = get(HANDLER_PARALLELISM_VAR) {
            let parallelism: usize = parse(HANDLER_PARALLELISM_VAR, &parallelism)?;
            config.dispatch.handler_parallelism = parallelism.max(1);
        }
        if let Some(max) = get(MAX_RECONNECTS_VAR) {
            config.reconnect.max_attempts = Some(parse(MAX_RECONNECTS_VAR, &max)?);
        }

        Ok(config)
    }
}

fn invalid(var: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    value.trim().parse().map_err(|e| invalid(var, value, e))
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, value, "expected true or false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn defaults_apply_when_only_endpoint_is_set() {
        let config = ConsumerConfig::from_lookup(lookup(&[(ENDPOINT_VAR, "billing")])).unwrap();

        assert_eq!(config.endpoint.as_str(), "billing");
        assert_eq!(config.version, SchemaVersion::new(1, 0));
        assert_eq!(config.lanes, LaneConfig::default());
        assert_eq!(config.dispatch.handler_retries, 3);
        assert_eq!(config.dispatch.retry.total_attempts(), 4);
        assert_eq!(config.dispatch.retry.base_delay, Duration::from_millis(50));
        assert_eq!(config.reconnect.max_attempts, None);
    }

    #[test]
    fn reads_every_variable() {
        let config = ConsumerConfig::from_lookup(lookup(&[
            (ENDPOINT_VAR, "billing"),
            (VERSION_VAR, "2.3.1"),
            (LANES_VAR, "8"),
            (LANE_CAPACITY_VAR, "256"),
            (OVERFLOW_VAR, "drop_oldest"),
            (HANDLER_PARALLELISM_VAR, "4"),
            (DRAIN_ON_SHUTDOWN_VAR, "true"),
            (MAX_RECONNECTS_VAR, "10"),
        ]))
        .unwrap();

        assert_eq!(config.version, SchemaVersion::new(2, 3));
        assert_eq!(config.lanes.count, 8);
        assert_eq!(config.lanes.capacity, Some(256));
        assert_eq!(config.lanes.overflow, OverflowPolicy::DropOldest);
        assert!(config.lanes.drain_on_shutdown);
        assert_eq!(config.dispatch.handler_parallelism, 4);
        assert_eq!(config.reconnect.max_attempts, Some(10));
    }

    #[test]
    fn endpoint_is_required() {
        let err = ConsumerConfig::from_lookup(lookup(&[(ENDPOINT_VAR, "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ENDPOINT_VAR)));
    }

    #[test]
    fn rejects_bad_values() {
        for (var, value) in [
            (LANES_VAR, "0"),
            (LANES_VAR, "many"),
            (OVERFLOW_VAR, "spill"),
            (DRAIN_ON_SHUTDOWN_VAR, "maybe"),
        ] {
            let err =
                ConsumerConfig::from_lookup(lookup(&[(ENDPOINT_VAR, "billing"), (var, value)]))
                    .unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { var: v, .. } if v == var),
                "{var}={value}"
            );
        }

        let err =
            ConsumerConfig::from_lookup(lookup(&[(ENDPOINT_VAR, "billing"), (VERSION_VAR, "x")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::Core(CoreError::InvalidVersion(_))));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: ConsumerConfig = serde_json::from_value(serde_json::json!({
            "endpoint": "billing",
            "lanes": {
                "count": 2,
                "capacity": 10,
                "overflow": "reject",
                "drain_on_shutdown": false
            }
        }))
        .unwrap();

        assert_eq!(config.lanes.count, 2);
        assert_eq!(config.lanes.overflow, OverflowPolicy::Reject);
        assert_eq!(config.dispatch, DispatchConfig::default());
    }
}
