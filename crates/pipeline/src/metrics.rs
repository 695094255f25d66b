use std::time::Duration;

use ::metrics::{
    log_distribution_with_labels,
    register_rotor_histogram,
    status_value,
};

use crate::StepKind;

register_rotor_histogram!(
    PIPELINE_STEP_SECONDS,
    "Time spent executing one chain step over the whole current event set",
    &["kind", "status"]
);

pub fn log_step_execution(kind: StepKind, is_ok: bool, elapsed: Duration) {
    log_distribution_with_labels(
        &PIPELINE_STEP_SECONDS,
        elapsed.as_secs_f64(),
        &[kind.metric_value(), status_value(is_ok)],
    );
}
