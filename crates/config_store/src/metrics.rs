use ::metrics::{
    log_counter_with_labels,
    register_rotor_counter,
    register_rotor_histogram,
    StatusTimer,
};

use crate::ConfigKind;

register_rotor_histogram!(
    CONFIG_CONNECTION_FETCH_SECONDS,
    "Time to fetch and decode an enriched connection from the config store",
    &["status"]
);
register_rotor_histogram!(
    CONFIG_FUNCTION_FETCH_SECONDS,
    "Time to fetch and decode a function definition from the config store",
    &["status"]
);
register_rotor_counter!(
    CONFIG_NEGATIVE_MISSES_TOTAL,
    "Lookups the config store answered with nil, by kind",
    &["kind"]
);

pub fn connection_fetch_timer() -> StatusTimer {
    StatusTimer::new(&CONFIG_CONNECTION_FETCH_SECONDS)
}

pub fn function_fetch_timer() -> StatusTimer {
    StatusTimer::new(&CONFIG_FUNCTION_FETCH_SECONDS)
}

pub fn log_config_negative_miss(kind: ConfigKind) {
    log_counter_with_labels(&CONFIG_NEGATIVE_MISSES_TOTAL, 1, &[kind.as_str()]);
}
