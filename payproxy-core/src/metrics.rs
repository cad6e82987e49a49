use crate::error::{Error, Result};
use crate::protocol::Direction;
use prometheus::{Counter, Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};

/// Prometheus metrics for the relay and payout path
#[derive(Debug, Clone)]
pub struct ProxyMetrics {
    registry: Registry,
    /// Miner connections accepted
    pub connections_total: IntCounter,
    /// Connections currently relaying
    pub active_connections: IntGauge,
    /// Upstream dials that failed
    pub upstream_failures: IntCounter,
    /// Frames decoded, by direction
    pub frames: IntCounterVec,
    pub submissions_observed: IntCounter,
    pub submissions_resolved: IntCounter,
    pub payouts_total: IntCounter,
    /// Sum of recorded payout amounts
    pub payout_amount_total: Counter,
    /// Connection teardowns, by reason
    pub teardowns: IntCounterVec,
}

/// Point-in-time view used by the health endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub connections_total: u64,
    pub active_connections: i64,
    pub submissions_observed: u64,
    pub submissions_resolved: u64,
    pub payouts_total: u64,
    pub payout_amount_total: f64,
}

impl ProxyMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let metrics = Self {
            connections_total: IntCounter::with_opts(Opts::new(
                "payproxy_connections_total",
                "Miner connections accepted",
            ))?,
            active_connections: IntGauge::with_opts(Opts::new(
                "payproxy_active_connections",
                "Connections currently relaying",
            ))?,
            upstream_failures: IntCounter::with_opts(Opts::new(
                "payproxy_upstream_failures_total",
                "Failed upstream dials",
            ))?,
            frames: IntCounterVec::new(
                Opts::new("payproxy_frames_total", "Decoded Stratum frames"),
                &["direction"],
            )?,
            submissions_observed: IntCounter::with_opts(Opts::new(
                "payproxy_submissions_total",
                "Share submissions seen from miners",
            ))?,
            submissions_resolved: IntCounter::with_opts(Opts::new(
                "payproxy_submissions_resolved_total",
                "Submissions resolved without error by the pool",
            ))?,
            payouts_total: IntCounter::with_opts(Opts::new(
                "payproxy_payouts_total",
                "Payout records persisted",
            ))?,
            payout_amount_total: Counter::with_opts(Opts::new(
                "payproxy_payout_amount_total",
                "Sum of persisted payout amounts",
            ))?,
            teardowns: IntCounterVec::new(
                Opts::new("payproxy_teardowns_total", "Connection teardowns"),
                &["reason"],
            )?,
            registry,
        };

        metrics.registry.register(Box::new(metrics.connections_total.clone()))?;
        metrics.registry.register(Box::new(metrics.active_connections.clone()))?;
        metrics.registry.register(Box::new(metrics.upstream_failures.clone()))?;
        metrics.registry.register(Box::new(metrics.frames.clone()))?;
        metrics.registry.register(Box::new(metrics.submissions_observed.clone()))?;
        metrics.registry.register(Box::new(metrics.submissions_resolved.clone()))?;
        metrics.registry.register(Box::new(metrics.payouts_total.clone()))?;
        metrics.registry.register(Box::new(metrics.payout_amount_total.clone()))?;
        metrics.registry.register(Box::new(metrics.teardowns.clone()))?;

        Ok(metrics)
    }

    pub fn record_frame(&self, direction: Direction) {
        self.frames.with_label_values(&[direction.label()]).inc();
    }

    pub fn record_payout(&self, amount: f64) {
        self.payouts_total.inc();
        if amount.is_finite() && amount >= 0.0 {
            self.payout_amount_total.inc_by(amount);
        }
    }

    pub fn record_teardown(&self, reason: &str) {
        self.teardowns.with_label_values(&[reason]).inc();
    }

    /// Prometheus text exposition
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Metrics(e.to_string()))
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            connections_total: self.connections_total.get(),
            active_connections: self.active_connections.get(),
            submissions_observed: self.submissions_observed.get(),
            submissions_resolved: self.submissions_resolved.get(),
            payouts_total: self.payouts_total.get(),
            payout_amount_total: self.payout_amount_total.get(),
        }
    }
}
