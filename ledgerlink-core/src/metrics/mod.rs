//! Client metrics
//!
//! Recorded through the `metrics` facade; without an installed recorder
//! every call is a no-op. Call [`init_metrics`] once at startup to attach
//! descriptions.

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Describe every metric emitted by the client
pub fn init_metrics() {
    describe_counter!(
        "ledgerlink_submit_total",
        "Submitted transactions, labeled by outcome (ok, application, endorsement, ordering, commit_failure, timeout, cancelled, unavailable, rejected)"
    );
    describe_histogram!(
        "ledgerlink_submit_duration_seconds",
        "Time from proposal to commit event for submitted transactions"
    );
    describe_counter!(
        "ledgerlink_evaluate_total",
        "Evaluated transactions, labeled by outcome"
    );
    describe_histogram!(
        "ledgerlink_evaluate_duration_seconds",
        "Duration of evaluate calls including retries"
    );
    describe_counter!(
        "ledgerlink_evaluate_retries_total",
        "Evaluate attempts moved to another peer after a failure"
    );
    describe_counter!(
        "ledgerlink_endorsement_failures_total",
        "Submits that could not gather the required matching endorsements"
    );
    describe_counter!(
        "ledgerlink_commits_total",
        "Commit outcomes observed for submitted transactions, labeled by validation code"
    );
    describe_counter!(
        "ledgerlink_ca_requests_total",
        "Certificate authority calls, labeled by operation (enroll, register) and result"
    );
    describe_gauge!("ledgerlink_sessions_active", "Open gateway sessions");
}

pub fn record_submit(outcome: &'static str, seconds: f64) {
    counter!("ledgerlink_submit_total", "outcome" => outcome).increment(1);
    histogram!("ledgerlink_submit_duration_seconds").record(seconds);
}

pub fn record_evaluate(outcome: &'static str, seconds: f64) {
    counter!("ledgerlink_evaluate_total", "outcome" => outcome).increment(1);
    histogram!("ledgerlink_evaluate_duration_seconds").record(seconds);
}

pub fn record_evaluate_retry() {
    counter!("ledgerlink_evaluate_retries_total").increment(1);
}

pub fn record_endorsement_failure() {
    counter!("ledgerlink_endorsement_failures_total").increment(1);
}

/// `code` is a validation code name or `TIMEOUT`
pub fn record_commit(code: &'static str) {
    counter!("ledgerlink_commits_total", "code" => code).increment(1);
}

pub fn record_ca_request(operation: &'static str, ok: bool) {
    let result = if ok { "success" } else { "error" };
    counter!("ledgerlink_ca_requests_total", "operation" => operation, "result" => result)
        .increment(1);
}

pub fn record_session_opened() {
    gauge!("ledgerlink_sessions_active").increment(1.0);
}

pub fn record_session_closed() {
    gauge!("ledgerlink_sessions_active").decrement(1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        init_metrics();
        record_submit("ok", 0.25);
        record_evaluate("unavailable", 0.01);
        record_evaluate_retry();
        record_endorsement_failure();
        record_commit("MVCC_READ_CONFLICT");
        record_ca_request("enroll", true);
        record_session_opened();
        record_session_closed();
    }
}
