//! Service configuration, read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::ledger::query::MAX_PAGE_SIZE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Knobs for the periodic processing pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub interval: Duration,
    pub batch_size: usize,
    pub max_retries: u32,
    /// How long a claim may stay `processing` before another cycle hands it
    /// back to `pending`.
    pub claim_lease: Duration,
    /// Name used in logs.
    pub name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            batch_size: 100,
            max_retries: 3,
            claim_lease: Duration::from_secs(300),
            name: "event-pipeline".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_claim_lease(mut self, claim_lease: Duration) -> Self {
        self.claim_lease = claim_lease;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    /// Unset means in-memory stores.
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub pipeline: PipelineConfig,
    pub delivery_timeout: Duration,
    pub replay_max_events: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            redis_url: None,
            pipeline: PipelineConfig::default(),
            delivery_timeout: Duration::from_millis(5000),
            replay_max_events: 10_000,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or blank keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let bind_addr = match get("EVENTHUB_BIND") {
            Some(v) => v.parse().map_err(|e| ConfigError::Invalid {
                var: "EVENTHUB_BIND",
                reason: format!("{e}"),
            })?,
            None => defaults.bind_addr,
        };

        let interval_ms = parse_num::<u64>(&get, "EVENTHUB_PIPELINE_INTERVAL_MS")?
            .unwrap_or(defaults.pipeline.interval.as_millis() as u64);
        if interval_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "EVENTHUB_PIPELINE_INTERVAL_MS",
                reason: "must be positive".to_string(),
            });
        }

        let batch_size = parse_num::<usize>(&get, "EVENTHUB_BATCH_SIZE")?
            .unwrap_or(defaults.pipeline.batch_size);
        if batch_size == 0 || batch_size > MAX_PAGE_SIZE as usize {
            return Err(ConfigError::Invalid {
                var: "EVENTHUB_BATCH_SIZE",
                reason: format!("must be between 1 and {MAX_PAGE_SIZE}"),
            });
        }

        let max_retries = parse_num::<u32>(&get, "EVENTHUB_MAX_RETRIES")?
            .unwrap_or(defaults.pipeline.max_retries);
        if max_retries == 0 {
            return Err(ConfigError::Invalid {
                var: "EVENTHUB_MAX_RETRIES",
                reason: "must be at least 1".to_string(),
            });
        }

        let claim_lease_ms = parse_num::<u64>(&get, "EVENTHUB_CLAIM_LEASE_MS")?
            .unwrap_or(defaults.pipeline.claim_lease.as_millis() as u64);
        if claim_lease_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "EVENTHUB_CLAIM_LEASE_MS",
                reason: "must be positive".to_string(),
            });
        }

        let delivery_timeout_ms = parse_num::<u64>(&get, "EVENTHUB_DELIVERY_TIMEOUT_MS")?
            .unwrap_or(defaults.delivery_timeout.as_millis() as u64);
        let replay_max_events = parse_num::<usize>(&get, "EVENTHUB_REPLAY_MAX_EVENTS")?
            .unwrap_or(defaults.replay_max_events);

        Ok(Self {
            bind_addr,
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            pipeline: PipelineConfig {
                interval: Duration::from_millis(interval_ms),
                batch_size,
                max_retries,
                claim_lease: Duration::from_millis(claim_lease_ms),
                name: defaults.pipeline.name,
            },
            delivery_timeout: Duration::from_millis(delivery_timeout_ms),
            replay_max_events,
        })
    }
}

fn parse_num<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get(var)
        .map(|v| {
            v.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                var,
                reason: format!("{v:?}: {e}"),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, ServiceConfig::default());
    }

    #[test]
    fn reads_pipeline_knobs() {
        let cfg = ServiceConfig::from_lookup(lookup(&[
            ("EVENTHUB_PIPELINE_INTERVAL_MS", "250"),
            ("EVENTHUB_BATCH_SIZE", "10"),
            ("EVENTHUB_MAX_RETRIES", "5"),
            ("EVENTHUB_CLAIM_LEASE_MS", "60000"),
            ("DATABASE_URL", "postgres://localhost/eventhub"),
        ]))
        .unwrap();
        assert_eq!(cfg.pipeline.interval, Duration::from_millis(250));
        assert_eq!(cfg.pipeline.batch_size, 10);
        assert_eq!(cfg.pipeline.max_retries, 5);
        assert_eq!(cfg.pipeline.claim_lease, Duration::from_secs(60));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/eventhub"));
    }

    #[test]
    fn rejects_out_of_range_batch_size() {
        let err = ServiceConfig::from_lookup(lookup(&[("EVENTHUB_BATCH_SIZE", "5000")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "EVENTHUB_BATCH_SIZE", .. }));
    }

    #[test]
    fn rejects_garbage_numbers() {
        let err = ServiceConfig::from_lookup(lookup(&[("EVENTHUB_MAX_RETRIES", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "EVENTHUB_MAX_RETRIES", .. }));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = ServiceConfig::from_lookup(lookup(&[("DATABASE_URL", "  ")])).unwrap();
        assert!(cfg.database_url.is_none());
    }
}
