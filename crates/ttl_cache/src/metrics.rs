use ::metrics::{
    log_counter_with_labels,
    log_gauge_with_labels,
    register_rotor_counter,
    register_rotor_gauge,
};

register_rotor_counter!(
    TTL_CACHE_HITS_TOTAL,
    "Number of cache reads answered by a live entry",
    &["cache"]
);
register_rotor_counter!(
    TTL_CACHE_MISSES_TOTAL,
    "Number of cache reads that found no live entry",
    &["cache"]
);
register_rotor_counter!(
    TTL_CACHE_EVICTIONS_TOTAL,
    "Number of entries displaced from a cache, by reason",
    &["cache", "reason"]
);
register_rotor_gauge!(TTL_CACHE_SIZE, "Number of entries in a cache", &["cache"]);

pub fn log_ttl_cache_hit(cache: &'static str) {
    log_counter_with_labels(&TTL_CACHE_HITS_TOTAL, 1, &[cache]);
}

pub fn log_ttl_cache_miss(cache: &'static str) {
    log_counter_with_labels(&TTL_CACHE_MISSES_TOTAL, 1, &[cache]);
}

pub fn log_ttl_cache_eviction(cache: &'static str, reason: &'static str) {
    log_counter_with_labels(&TTL_CACHE_EVICTIONS_TOTAL, 1, &[cache, reason]);
}

pub fn log_ttl_cache_size(cache: &'static str, size: usize) {
    log_gauge_with_labels(&TTL_CACHE_SIZE, size as i64, &[cache]);
}
