//! Process-wide Prometheus counters
//!
//! Registered on the default registry so the binary's `/metrics` endpoint
//! exposes them through `prometheus::gather()`. Per-client counters live in
//! `cache::CacheMetrics`.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

/// Counters shared by every cache client, lock and coordinator in the process
#[derive(Debug)]
pub struct GlobalMetrics {
    /// Cache lookups by read policy and result
    pub cache_lookups: IntCounterVec,
    /// Background and mutex rebuilds by result
    pub cache_rebuilds: IntCounterVec,
    /// Lock releases that failed on the transport
    pub lock_release_failures: IntCounter,
    /// Flash-sale attempts by outcome
    pub seckill: IntCounterVec,
}

pub static METRICS: Lazy<GlobalMetrics> = Lazy::new(|| GlobalMetrics {
    cache_lookups: register_int_counter_vec!(
        "flashguard_cache_lookups_total",
        "Cache lookups by read policy and result",
        &["policy", "result"]
    )
    .expect("register flashguard_cache_lookups_total"),
    cache_rebuilds: register_int_counter_vec!(
        "flashguard_cache_rebuilds_total",
        "Cache rebuilds by result",
        &["result"]
    )
    .expect("register flashguard_cache_rebuilds_total"),
    lock_release_failures: register_int_counter!(
        "flashguard_lock_release_failures_total",
        "Lock releases that failed on the transport"
    )
    .expect("register flashguard_lock_release_failures_total"),
    seckill: register_int_counter_vec!(
        "flashguard_seckill_total",
        "Flash-sale attempts by outcome",
        &["outcome"]
    )
    .expect("register flashguard_seckill_total"),
});

pub fn record_cache_lookup(policy: &str, result: &str) {
    METRICS
        .cache_lookups
        .with_label_values(&[policy, result])
        .inc();
}

pub fn record_rebuild(result: &str) {
    METRICS.cache_rebuilds.with_label_values(&[result]).inc();
}

pub fn record_lock_release_failure() {
    METRICS.lock_release_failures.inc();
}

pub fn record_seckill(outcome: &str) {
    METRICS.seckill.with_label_values(&[outcome]).inc();
}
