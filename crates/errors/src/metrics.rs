use ::metrics::{
    log_counter_with_labels,
    register_rotor_counter,
};

use crate::ErrorCode;

register_rotor_counter!(
    ERRORS_REPORTED_TOTAL,
    "Errors surfaced through report_error, by taxonomy code",
    &["code"]
);

pub(crate) fn log_error_metadata(code: ErrorCode) {
    log_counter_with_labels(&ERRORS_REPORTED_TOTAL, 1, &[code.metric_value()]);
}

pub(crate) fn log_untagged_error() {
    log_counter_with_labels(&ERRORS_REPORTED_TOTAL, 1, &["internal"]);
}
