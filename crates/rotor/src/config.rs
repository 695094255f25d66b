use clap::Parser;
use url::Url;

pub const DEFAULT_HTTP_PORT: u16 = 3401;

/// Boot configuration. `BULKER_URL` and `BULKER_AUTH_KEY` are required;
/// the worker refuses to start without them.
#[derive(Parser, Clone)]
#[command(name = "rotor", about = "Event-routing worker")]
pub struct RotorConfig {
    /// Base URL of the bulker delivery service.
    #[arg(long, env = "BULKER_URL")]
    pub bulker_url: Url,

    /// Bearer token for bulker requests.
    #[arg(long, env = "BULKER_AUTH_KEY", hide_env_values = true)]
    pub bulker_auth_key: String,

    /// Port for the operator endpoints. Falls back to PORT, then 3401.
    #[arg(long, env = "ROTOR_HTTP_PORT")]
    pub rotor_http_port: Option<u16>,

    #[arg(long, env = "PORT", hide = true)]
    pub port: Option<u16>,

    /// Base URL of the config store service. Without it every connection
    /// resolves as unknown, which is only useful for smoke testing.
    #[arg(long, env = "CONFIG_STORE_URL")]
    pub config_store_url: Option<Url>,

    /// Base URL of the UDF sandbox sidecar. Without it connections that
    /// reference user functions fail with a configuration error.
    #[arg(long, env = "UDF_SIDECAR_URL")]
    pub udf_sidecar_url: Option<Url>,
}

impl RotorConfig {
    pub fn http_port(&self) -> u16 {
        self.rotor_http_port
            .or(self.port)
            .unwrap_or(DEFAULT_HTTP_PORT)
    }
}

impl std::fmt::Debug for RotorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The auth key stays out of logs.
        f.debug_struct("RotorConfig")
            .field("bulker_url", &self.bulker_url.as_str())
            .field("http_port", &self.http_port())
            .field("config_store_url", &self.config_store_url.as_ref().map(Url::as_str))
            .field("udf_sidecar_url", &self.udf_sidecar_url.as_ref().map(Url::as_str))
            .finish()
    }
}
