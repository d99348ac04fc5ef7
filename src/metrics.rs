//! Prometheus metrics for gateway activity.
//!
//! The core is a library, so no scrape endpoint lives here; an embedding
//! binary exposes [`render`] wherever it serves metrics.

#![allow(dead_code)]

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, Counter, CounterVec, Encoder, TextEncoder,
};

lazy_static! {
    /// Requests dispatched through the facade, by method and status class.
    pub static ref REQUESTS: CounterVec = register_counter_vec!(
        "gateway_requests_total",
        "Requests dispatched through the facade",
        &["method", "outcome"]
    )
    .unwrap();

    /// Admissions refused by the accountant, by window.
    pub static ref ADMISSION_REJECTIONS: CounterVec = register_counter_vec!(
        "gateway_admission_rejections_total",
        "Requests refused by the quota accountant",
        &["window"]
    )
    .unwrap();

    /// Local counters overwritten by server-reported header values.
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "gateway_reconciliation_overwrites_total",
        "Local rate counters overwritten from response headers",
        &["window"]
    )
    .unwrap();

    /// Successful server clock refreshes.
    pub static ref CLOCK_RESYNCS: Counter = register_counter!(
        "gateway_clock_resyncs_total",
        "Server clock offset refreshes"
    )
    .unwrap();

    /// Interactive credential prompts, by sensitivity.
    pub static ref CREDENTIAL_PROMPTS: CounterVec = register_counter_vec!(
        "gateway_credential_prompts_total",
        "Interactive credential prompts",
        &["sensitive"]
    )
    .unwrap();
}

pub fn record_request(method: &str, outcome: &str) {
    REQUESTS.with_label_values(&[method, outcome]).inc();
}

pub fn record_admission_rejected(window: &str) {
    ADMISSION_REJECTIONS.with_label_values(&[window]).inc();
}

pub fn record_reconciliation(window: &str) {
    RECONCILIATIONS.with_label_values(&[window]).inc();
}

pub fn record_clock_resync() {
    CLOCK_RESYNCS.inc();
}

pub fn record_credential_prompt(sensitive: bool) {
    let label = if sensitive { "true" } else { "false" };
    CREDENTIAL_PROMPTS.with_label_values(&[label]).inc();
}

/// Text exposition of every registered gateway metric.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let _ = encoder.encode(&metric_families, &mut buffer);
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_render() {
        record_request("GET", "2xx");
        record_admission_rejected("minute_weight");
        record_reconciliation("minute_weight");
        record_clock_resync();
        record_credential_prompt(true);

        let rendered = render();
        assert!(rendered.contains("gateway_requests_total"));
        assert!(rendered.contains("gateway_admission_rejections_total"));
    }
}
