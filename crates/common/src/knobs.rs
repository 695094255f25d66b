//! Tunable limits and parameters for the rotor worker. Every knob can be
//! overridden with an environment variable of the same name.

use std::{
    sync::LazyLock,
    time::Duration,
};

use cmd_util::env::env_config;

/// How long an enriched connection stays cached before the config store is
/// consulted again.
pub static CONNECTION_CACHE_TTL: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("CONNECTION_CACHE_TTL_SECONDS", 20)));

/// How long a function definition stays cached.
pub static FUNCTION_CACHE_TTL: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("FUNCTION_CACHE_TTL_SECONDS", 20)));

/// How long a compiled UDF sandbox stays cached. Extended on every
/// successful acquire, so hot functions stay compiled indefinitely.
pub static UDF_CACHE_TTL: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("UDF_CACHE_TTL_SECONDS", 600)));

/// How often the cache sweepers scan for expired entries.
pub static CACHE_SWEEP_INTERVAL: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("CACHE_SWEEP_INTERVAL_SECONDS", 5)));

/// Deadline for processing a single message end to end. Expiry abandons the
/// in-flight step and asks the bus for redelivery.
pub static MESSAGE_DEADLINE: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_millis(env_config("MESSAGE_DEADLINE_MS", 30_000)));

/// How long in-flight handlers get to drain on shutdown before the UDF
/// cache is evicted out from under them.
pub static SHUTDOWN_DRAIN_GRACE: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("SHUTDOWN_DRAIN_GRACE_SECONDS", 10)));

/// Request timeout for downstream delivery (bulker and webhook posts).
pub static DOWNSTREAM_REQUEST_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("DOWNSTREAM_REQUEST_TIMEOUT_SECONDS", 10)));

/// Request timeout for config store lookups. The store is expected to answer
/// in single-digit milliseconds; anything slower is treated as an outage.
pub static CONFIG_FETCH_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("CONFIG_FETCH_TIMEOUT_SECONDS", 5)));

/// Request timeout for UDF sidecar calls (compile and invoke). Invocations
/// are additionally time-bounded inside the sandbox.
pub static SIDECAR_REQUEST_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("SIDECAR_REQUEST_TIMEOUT_SECONDS", 30)));
