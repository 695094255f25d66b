use ::metrics::{
    log_counter,
    log_counter_with_labels,
    register_rotor_counter,
    register_rotor_histogram,
    StatusTimer,
};

register_rotor_histogram!(
    ROTOR_HANDLE_MESSAGE_SECONDS,
    "End-to-end time handling one bus message",
    &["status"]
);
register_rotor_counter!(
    ROTOR_MESSAGES_PROCESSED_TOTAL,
    "Messages handled, by outcome (acked, retried, dropped)",
    &["outcome"]
);
register_rotor_counter!(
    ROTOR_MESSAGES_MALFORMED_TOTAL,
    "Bus payloads that failed to decode and were dropped"
);

pub fn handle_message_timer() -> StatusTimer {
    StatusTimer::new(&ROTOR_HANDLE_MESSAGE_SECONDS)
}

pub fn log_message_outcome(outcome: &'static str) {
    log_counter_with_labels(&ROTOR_MESSAGES_PROCESSED_TOTAL, 1, &[outcome]);
}

pub fn log_malformed_message() {
    log_counter(&ROTOR_MESSAGES_MALFORMED_TOTAL, 1);
}
