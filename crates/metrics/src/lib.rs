//! Rotor's metrics plumbing: a process-wide Prometheus registry, declaration
//! macros, and timers that report on drop.

use std::sync::LazyLock;

use prometheus::{
    Encoder,
    Registry,
    TextEncoder,
};

mod labels;
mod macros;
mod reporting;
mod timer;

pub use prometheus;

pub use crate::{
    labels::{
        status_value,
        STATUS_ERROR,
        STATUS_LABEL,
        STATUS_SUCCESS,
    },
    macros::paste,
    reporting::{
        log_counter,
        log_counter_with_labels,
        log_distribution,
        log_distribution_with_labels,
        log_gauge,
        log_gauge_with_labels,
    },
    timer::{
        StatusTimer,
        Timer,
    },
};

/// Every metric in the process registers here; `/metrics` renders it.
pub static ROTOR_METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Render the registry in the Prometheus text exposition format.
pub fn render() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let families = ROTOR_METRICS_REGISTRY.gather();
    let mut buf = Vec::new();
    encoder.encode(&families, &mut buf)?;
    Ok(String::from_utf8(buf)?)
}
