use ::metrics::{
    log_counter,
    register_rotor_counter,
    register_rotor_histogram,
    StatusTimer,
};

register_rotor_histogram!(
    UDF_COMPILE_SECONDS,
    "Time to compile a user function into a live sandbox",
    &["status"]
);
register_rotor_counter!(
    UDF_REBUILDS_TOTAL,
    "Sandboxes rebuilt after being found disposed between invocations"
);
register_rotor_counter!(
    UDF_WRAPPERS_CLOSED_TOTAL,
    "Sandboxes released through the cache eviction hook"
);

pub fn udf_compile_timer() -> StatusTimer {
    StatusTimer::new(&UDF_COMPILE_SECONDS)
}

pub fn log_udf_rebuild() {
    log_counter(&UDF_REBUILDS_TOTAL, 1);
}

pub fn log_udf_wrapper_closed() {
    log_counter(&UDF_WRAPPERS_CLOSED_TOTAL, 1);
}
