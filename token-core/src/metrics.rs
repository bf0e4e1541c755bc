//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//! Metrics live in a private registry so several ledgers can run in one
//! process.
//!
//! # Metrics
//!
//! - `token_ledger_tokens_created_total` - Tokens created by the factory
//! - `token_ledger_transfers_total` - Committed transfers
//! - `token_ledger_transfers_rejected_total{reason}` - Rejected transfers
//! - `token_ledger_notifications_total` - Receive handlers invoked on committed transfers
//! - `token_ledger_transfer_duration_seconds` - Transfer latency inside the actor

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Tokens created
    pub tokens_created: IntCounter,

    /// Committed transfers
    pub transfers_total: IntCounter,

    /// Rejected transfers by reason
    pub transfers_rejected: IntCounterVec,

    /// Receive handler invocations on committed transfers
    pub notifications_total: IntCounter,

    /// Transfer duration histogram
    pub transfer_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let tokens_created = IntCounter::new(
            "token_ledger_tokens_created_total",
            "Tokens created by the factory",
        )?;
        registry.register(Box::new(tokens_created.clone()))?;

        let transfers_total = IntCounter::new(
            "token_ledger_transfers_total",
            "Committed transfers",
        )?;
        registry.register(Box::new(transfers_total.clone()))?;

        let transfers_rejected = IntCounterVec::new(
            Opts::new("token_ledger_transfers_rejected_total", "Rejected transfers"),
            &["reason"],
        )?;
        registry.register(Box::new(transfers_rejected.clone()))?;

        let notifications_total = IntCounter::new(
            "token_ledger_notifications_total",
            "Receive handlers invoked on committed transfers",
        )?;
        registry.register(Box::new(notifications_total.clone()))?;

        let transfer_duration = Histogram::with_opts(
            HistogramOpts::new(
                "token_ledger_transfer_duration_seconds",
                "Histogram of transfer latencies",
            )
            .buckets(vec![0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.010, 0.050]),
        )?;
        registry.register(Box::new(transfer_duration.clone()))?;

        Ok(Self {
            tokens_created,
            transfers_total,
            transfers_rejected,
            notifications_total,
            transfer_duration,
            registry,
        })
    }

    /// Record token creation
    pub fn record_token_created(&self) {
        self.tokens_created.inc();
    }

    /// Record committed transfer
    pub fn record_transfer(&self, notified: bool, duration_seconds: f64) {
        self.transfers_total.inc();
        if notified {
            self.notifications_total.inc();
        }
        self.transfer_duration.observe(duration_seconds);
    }

    /// Record rejected transfer
    pub fn record_rejection(&self, reason: &str) {
        self.transfers_rejected.with_label_values(&[reason]).inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> crate::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| crate::Error::Other(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| crate::Error::Other(format!("Metrics are not UTF-8: {}", e)))
    }
}
