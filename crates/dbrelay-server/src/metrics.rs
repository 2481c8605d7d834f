//! Prometheus metrics.
//!
//! The recorder is installed once at startup and rendered by the
//! `/metrics` route. Dispatches record per-backend counters and a
//! latency histogram through the `metrics` crate's global recorder.
//! Without a recorder every call here is a no-op.

use std::time::Duration;

use dbrelay_core::AddressResult;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram buckets for whole dispatches (5ms to 2min). A dispatch spans
/// network round trips to every address, so this sits well above
/// single-command latency.
const HISTOGRAM_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

/// Installs the prometheus recorder and spawns its upkeep task.
pub fn install_recorder() -> Result<PrometheusHandle, Box<dyn std::error::Error>> {
    let handle = PrometheusBuilder::new()
        .set_buckets(HISTOGRAM_BUCKETS)
        .map_err(|e| format!("failed to set histogram buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("failed to install prometheus recorder: {e}"))?;

    let upkeep = handle.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            upkeep.run_upkeep();
        }
    });

    Ok(handle)
}

/// Per-dispatch totals.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub addresses: u64,
    pub unreachable: u64,
    pub commands: u64,
    pub failed_commands: u64,
    pub refused_commands: u64,
}

impl Tally {
    pub fn of(results: &[AddressResult]) -> Self {
        let mut t = Tally {
            addresses: results.len() as u64,
            ..Tally::default()
        };
        for r in results {
            if !r.error_msg.is_empty() {
                t.unreachable += 1;
            }
            for c in &r.cmd_results {
                t.commands += 1;
                if c.is_error() {
                    t.failed_commands += 1;
                    if c.is_refusal() {
                        t.refused_commands += 1;
                    }
                }
            }
        }
        t
    }
}

/// Marks `addresses` worth of work as in flight.
#[inline]
pub fn on_dispatch_started(backend: &'static str, addresses: usize) {
    counter!("dbrelay_requests_total", "backend" => backend).increment(1);
    gauge!("dbrelay_addresses_in_flight").increment(addresses as f64);
}

/// Records a finished dispatch.
pub fn on_dispatch_finished(backend: &'static str, results: &[AddressResult], elapsed: Duration) {
    let t = Tally::of(results);
    gauge!("dbrelay_addresses_in_flight").decrement(t.addresses as f64);

    let labels = [("backend", backend)];
    histogram!("dbrelay_dispatch_duration_seconds", &labels).record(elapsed.as_secs_f64());
    counter!("dbrelay_addresses_total", &labels).increment(t.addresses);
    counter!("dbrelay_addresses_unreachable_total", &labels).increment(t.unreachable);
    counter!("dbrelay_commands_total", &labels).increment(t.commands);
    counter!("dbrelay_commands_errors_total", &labels).increment(t.failed_commands);
    counter!("dbrelay_commands_refused_total", &labels).increment(t.refused_commands);
}

/// Records a request rejected before dispatch.
#[inline]
pub fn on_request_rejected(backend: &'static str) {
    counter!("dbrelay_requests_rejected_total", "backend" => backend).increment(1);
}
