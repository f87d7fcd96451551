//! Prometheus metrics exposition
//!
//! - `auth_logins_started_total` (counter)
//! - `auth_callbacks_total` (counter): label `outcome`
//! - `auth_token_exchange_duration_seconds` (histogram): label `result`

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const EXCHANGE_DURATION: &str = "auth_token_exchange_duration_seconds";

/// Bucket boundaries cover a fast local exchange up to the 30s default timeout.
const EXCHANGE_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(EXCHANGE_DURATION.to_string()), EXCHANGE_BUCKETS)
}

/// Install the global Prometheus recorder and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// A login link was issued.
pub fn record_login_started() {
    metrics::counter!("auth_logins_started_total").increment(1);
}

/// A callback reached a terminal outcome.
pub fn record_callback(outcome: &'static str) {
    metrics::counter!("auth_callbacks_total", "outcome" => outcome).increment(1);
}

/// A code exchange finished, successfully or not.
pub fn record_exchange(result: &'static str, duration_secs: f64) {
    metrics::histogram!(EXCHANGE_DURATION, "result" => result).record(duration_secs);
}

#[cfg(test)]
pub(crate) fn isolated_recorder() -> (
    metrics_exporter_prometheus::PrometheusRecorder,
    PrometheusHandle,
) {
    // build_recorder() leaves the global recorder slot untouched, so any
    // number of tests can each own one.
    let recorder = builder()
        .expect("failed to set histogram buckets")
        .build_recorder();
    let handle = recorder.handle();
    (recorder, handle)
}
