use std::{
    env,
    fmt::Debug,
    io,
    str::FromStr,
};

use tracing::Level;
use tracing_subscriber::{
    fmt::format::format,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

/// Read a typed configuration value from the environment, falling back to
/// `default` when the variable is unset or unparseable. Overrides are logged
/// so a process's effective configuration can be reconstructed from its logs.
pub fn env_config<T: Debug + FromStr>(name: &str, default: T) -> T
where
    <T as FromStr>::Err: Debug,
{
    let var_s = match env::var(name) {
        Ok(s) => s,
        Err(env::VarError::NotPresent) => return default,
        Err(env::VarError::NotUnicode(..)) => {
            tracing::warn!("Invalid value for {name}, falling back to {default:?}.");
            return default;
        },
    };
    match T::from_str(&var_s) {
        Ok(v) => {
            tracing::info!("Overriding {name} to {v:?} from environment");
            v
        },
        Err(e) => {
            tracing::warn!("Invalid value {var_s} for {name}, falling back to {default:?}: {e:?}");
            default
        },
    }
}

/// Call this from services at startup. `LOG_FORMAT=json` selects structured
/// JSON output; anything else gets the compact human format.
pub fn config_service() {
    config_tracing(Level::INFO)
}

/// Call this from one-shot tools at startup.
pub fn config_tool() {
    config_tracing(Level::ERROR)
}

fn config_tracing(level: Level) {
    let color_disabled = env::var("NO_COLOR").is_ok();
    let format_layer = tracing_subscriber::fmt::layer()
        .with_ansi(!color_disabled)
        .with_writer(io::stdout);
    let format_layer = match env::var("LOG_FORMAT") {
        Ok(s) if s == "json" => format_layer.event_format(format().json()).boxed(),
        _ => format_layer.event_format(format().compact()).boxed(),
    };
    let format_layer = format_layer.with_filter(
        EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(level.as_str())),
    );
    tracing_subscriber::registry().with(format_layer).init();
}
