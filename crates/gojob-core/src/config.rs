use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ConfigError;

/// Configuration for pushing progress gauges to a Prometheus push-gateway.
#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    pub push_gateway_url: String,
    pub job: String,
}

/// Validated, immutable scheduler configuration.
///
/// Constructed only via [`SchedulerConfigBuilder::build`]; every field here
/// has already passed its constraint, so the scheduler never re-validates.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub num_workers: u32,
    pub max_retries: u32,
    pub max_runtime_per_task: Duration,
    pub num_shards: u32,
    pub shard: u32,
    pub total_tasks: Option<u64>,
    pub result_path: String,
    pub status_path: String,
    pub metadata_path: String,
    pub metadata: BTreeMap<String, String>,
    pub status_tick: Duration,
    pub prometheus: Option<PrometheusConfig>,
}

impl SchedulerConfig {
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    /// Per-shard projection of `total_tasks`, or `None` if unset.
    ///
    /// Spreads the remainder across the first `n mod num_shards` shards so
    /// every shard's projection differs by at most one.
    pub fn projected_total(&self) -> Option<i64> {
        self.total_tasks.map(|n| {
            let num_shards = self.num_shards as u64;
            let base = n / num_shards;
            let remainder = n % num_shards;
            let extra = if (self.shard as u64) < remainder { 1 } else { 0 };
            (base + extra) as i64
        })
    }
}

pub struct SchedulerConfigBuilder {
    num_workers: u32,
    max_retries: u32,
    max_runtime_per_task: Duration,
    num_shards: u32,
    shard: u32,
    total_tasks: Option<u64>,
    result_path: String,
    status_path: String,
    metadata_path: String,
    metadata: BTreeMap<String, String>,
    status_tick: Duration,
    prometheus: Option<PrometheusConfig>,
}

impl Default for SchedulerConfigBuilder {
    fn default() -> Self {
        Self {
            num_workers: 1,
            max_retries: 4,
            max_runtime_per_task: Duration::from_secs(16),
            num_shards: 1,
            shard: 0,
            total_tasks: None,
            result_path: "result.json".to_string(),
            status_path: "status.json".to_string(),
            metadata_path: "metadata.json".to_string(),
            metadata: BTreeMap::new(),
            status_tick: Duration::from_secs(5),
            prometheus: None,
        }
    }
}

impl SchedulerConfigBuilder {
    pub fn num_workers(mut self, n: u32) -> Self {
        self.num_workers = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn max_runtime_per_task(mut self, d: Duration) -> Self {
        self.max_runtime_per_task = d;
        self
    }

    pub fn num_shards(mut self, n: u32) -> Self {
        self.num_shards = n;
        self
    }

    pub fn shard(mut self, n: u32) -> Self {
        self.shard = n;
        self
    }

    pub fn total_tasks(mut self, n: u64) -> Self {
        self.total_tasks = Some(n);
        self
    }

    pub fn result_path(mut self, path: impl Into<String>) -> Self {
        self.result_path = path.into();
        self
    }

    pub fn status_path(mut self, path: impl Into<String>) -> Self {
        self.status_path = path.into();
        self
    }

    pub fn metadata_path(mut self, path: impl Into<String>) -> Self {
        self.metadata_path = path.into();
        self
    }

    pub fn metadata_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn status_tick(mut self, d: Duration) -> Self {
        self.status_tick = d;
        self
    }

    pub fn prometheus(mut self, push_gateway_url: impl Into<String>, job: impl Into<String>) -> Self {
        self.prometheus = Some(PrometheusConfig {
            push_gateway_url: push_gateway_url.into(),
            job: job.into(),
        });
        self
    }

    pub fn build(self) -> Result<SchedulerConfig, ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::WorkersMustBePositive);
        }
        if self.max_retries == 0 {
            return Err(ConfigError::RetriesMustBePositive);
        }
        if self.max_runtime_per_task < Duration::from_secs(1) {
            return Err(ConfigError::TimeoutMustBePositive);
        }
        // num_shards == 0 is caught here too: shard (>= 0) is always >= 0 shards.
        if self.shard >= self.num_shards {
            return Err(ConfigError::ShardOutOfRange {
                shard: self.shard,
                num_shards: self.num_shards,
            });
        }
        if self.status_tick < Duration::from_secs(1) {
            return Err(ConfigError::StatusTickMustBeAtLeastOneSecond);
        }

        Ok(SchedulerConfig {
            num_workers: self.num_workers,
            max_retries: self.max_retries,
            max_runtime_per_task: self.max_runtime_per_task,
            num_shards: self.num_shards,
            shard: self.shard,
            total_tasks: self.total_tasks,
            result_path: self.result_path,
            status_path: self.status_path,
            metadata_path: self.metadata_path,
            metadata: self.metadata,
            status_tick: self.status_tick,
            prometheus: self.prometheus,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_successfully() {
        let cfg = SchedulerConfig::builder().build().unwrap();
        assert_eq!(cfg.num_workers, 1);
        assert_eq!(cfg.max_retries, 4);
        assert_eq!(cfg.num_shards, 1);
        assert_eq!(cfg.shard, 0);
        assert!(cfg.total_tasks.is_none());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = SchedulerConfig::builder().num_workers(0).build().unwrap_err();
        assert!(matches!(err, ConfigError::WorkersMustBePositive));
    }

    #[test]
    fn shard_out_of_range_is_rejected() {
        let err = SchedulerConfig::builder()
            .num_shards(3)
            .shard(3)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ShardOutOfRange { shard: 3, num_shards: 3 }
        ));
    }

    #[test]
    fn sub_second_timeout_is_rejected() {
        let err = SchedulerConfig::builder()
            .max_runtime_per_task(Duration::from_millis(500))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::TimeoutMustBePositive));
    }

    #[test]
    fn projected_total_spreads_remainder_across_first_shards() {
        let cfg = SchedulerConfig::builder()
            .num_shards(3)
            .shard(0)
            .total_tasks(10)
            .build()
            .unwrap();
        assert_eq!(cfg.projected_total(), Some(4));

        let cfg = SchedulerConfig::builder()
            .num_shards(3)
            .shard(2)
            .total_tasks(10)
            .build()
            .unwrap();
        assert_eq!(cfg.projected_total(), Some(3));
    }
}
