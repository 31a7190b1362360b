use std::time::Duration;

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::error;

use crate::config::PrometheusConfig;
use crate::status::Status;

const LABELS: &[&str] = &[
    "version",
    "runner_ip",
    "runner_country",
    "runner_region",
    "runner_city",
];

/// Best-effort runner identity, resolved once via a public IP-geolocation
/// lookup. Every field falls back to `"unknown"` if the lookup fails —
/// metrics must never block or fail task execution.
#[derive(Debug, Clone)]
pub struct RunnerIdentity {
    pub ip: String,
    pub country: String,
    pub region: String,
    pub city: String,
}

impl RunnerIdentity {
    const UNKNOWN: &'static str = "unknown";

    fn unknown() -> Self {
        Self {
            ip: Self::UNKNOWN.to_string(),
            country: Self::UNKNOWN.to_string(),
            region: Self::UNKNOWN.to_string(),
            city: Self::UNKNOWN.to_string(),
        }
    }

    /// Performs the lookup against ipinfo.io, swallowing any failure.
    async fn resolve() -> Self {
        #[derive(Deserialize)]
        struct IpInfoResponse {
            #[serde(default)]
            ip: String,
            #[serde(default)]
            country: String,
            #[serde(default)]
            region: String,
            #[serde(default)]
            city: String,
        }

        let response = reqwest::Client::new()
            .get("https://ipinfo.io/json")
            .timeout(Duration::from_secs(3))
            .send()
            .await;

        match response {
            Ok(resp) => match resp.json::<IpInfoResponse>().await {
                Ok(info) => Self {
                    ip: non_empty_or_unknown(info.ip),
                    country: non_empty_or_unknown(info.country),
                    region: non_empty_or_unknown(info.region),
                    city: non_empty_or_unknown(info.city),
                },
                Err(err) => {
                    error!(error = %err, "failed to decode runner identity response");
                    Self::unknown()
                }
            },
            Err(err) => {
                error!(error = %err, "failed to resolve runner identity");
                Self::unknown()
            }
        }
    }
}

fn non_empty_or_unknown(value: String) -> String {
    if value.is_empty() {
        RunnerIdentity::UNKNOWN.to_string()
    } else {
        value
    }
}

/// Subscribes to a StatusManager and pushes gauges to a Prometheus
/// push-gateway on every snapshot. Push failures are logged and ignored.
pub struct MetricsPusher {
    config: PrometheusConfig,
    identity: RunnerIdentity,
    registry: Registry,
    num_total: GaugeVec,
    num_failed: GaugeVec,
    num_succeed: GaugeVec,
    num_finished: GaugeVec,
    client: reqwest::Client,
}

impl MetricsPusher {
    pub async fn new(config: PrometheusConfig) -> anyhow::Result<Self> {
        let identity = RunnerIdentity::resolve().await;
        let registry = Registry::new();

        let num_total = GaugeVec::new(Opts::new("gojob_num_total", "projected total tasks"), LABELS)?;
        let num_failed = GaugeVec::new(Opts::new("gojob_num_failed", "failed tasks"), LABELS)?;
        let num_succeed = GaugeVec::new(Opts::new("gojob_num_succeed", "succeeded tasks"), LABELS)?;
        let num_finished = GaugeVec::new(Opts::new("gojob_num_finished", "finished tasks"), LABELS)?;

        registry.register(Box::new(num_total.clone()))?;
        registry.register(Box::new(num_failed.clone()))?;
        registry.register(Box::new(num_succeed.clone()))?;
        registry.register(Box::new(num_finished.clone()))?;

        Ok(Self {
            config,
            identity,
            registry,
            num_total,
            num_failed,
            num_succeed,
            num_finished,
            client: reqwest::Client::new(),
        })
    }

    fn label_values(&self) -> [&str; 5] {
        [
            env!("CARGO_PKG_VERSION"),
            &self.identity.ip,
            &self.identity.country,
            &self.identity.region,
            &self.identity.city,
        ]
    }

    fn record(&self, status: &Status) {
        let labels = self.label_values();
        self.num_total.with_label_values(&labels).set(status.num_total as f64);
        self.num_failed.with_label_values(&labels).set(status.num_failed as f64);
        self.num_succeed.with_label_values(&labels).set(status.num_succeed as f64);
        self.num_finished.with_label_values(&labels).set(status.num_done as f64);
    }

    async fn push(&self) {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            error!(error = %err, "failed to encode metrics");
            return;
        }

        let url = format!(
            "{}/metrics/job/{}",
            self.config.push_gateway_url.trim_end_matches('/'),
            self.config.job
        );

        if let Err(err) = self
            .client
            .put(&url)
            .timeout(Duration::from_secs(3))
            .header("Content-Type", encoder.format_type())
            .body(buffer)
            .send()
            .await
        {
            error!(error = %err, %url, "failed to push metrics to push-gateway");
        }
    }

    /// Runs until `status_rx` closes, recording and pushing every snapshot.
    pub async fn run(self, mut status_rx: mpsc::Receiver<Status>) {
        while let Some(status) = status_rx.recv().await {
            self.record(&status);
            self.push().await;
        }
    }
}
