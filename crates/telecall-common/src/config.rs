//! Configuration loaded from defaults, an optional `telecall.toml` and the environment.
//!
//! Precedence: env vars > .env file > telecall.toml > defaults.
//! Environment keys use `TELECALL__SECTION__KEY`, e.g. `TELECALL__SERVER__PORT=4000`.
//!
//! The server reads the process-wide [`AppConfig`] through [`get`]; embedding
//! clients usually build a [`ClientConfig`] directly and pass it by value.

use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

use crate::models::IceServer;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global application configuration.
///
/// # Panics
/// Panics if config has not been initialized via [`init`].
pub fn get() -> &'static AppConfig {
    CONFIG.get().expect("Config not initialized. Call telecall_common::config::init() first.")
}

/// Initialize the global configuration from the environment.
///
/// Should be called once at startup, before anything reads [`get`].
pub fn init() -> Result<&'static AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let app_config = load()?;
    Ok(CONFIG.get_or_init(|| app_config))
}

/// Build a configuration without touching the global slot.
pub fn load() -> Result<AppConfig, config::ConfigError> {
    config::Config::builder()
        // Defaults
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 3000)?
        .set_default("limits.max_message_length", 4000)?
        .set_default("limits.max_history", 1000)?
        .set_default("client.signaling_url", "ws://localhost:3000/signal")?
        .set_default("client.api_base_url", "http://localhost:3000/api")?
        .set_default("client.registration_timeout_secs", 10)?
        .set_default("client.call_duration_secs", 1800)? // 30 min appointment slot
        .set_default("client.transcript_flush_secs", 10)?
        .set_default("client.transcript_prefix", "[Transcript]")?
        .set_default("client.drop_ipv6_candidates", true)?
        .set_default("client.reconnect.auto_reconnect", true)?
        .set_default("client.reconnect.initial_backoff_ms", 500)?
        .set_default("client.reconnect.max_backoff_ms", 30_000)?
        .set_default("client.reconnect.max_attempts", 10)?
        // Optional config file
        .add_source(config::File::with_name("telecall").required(false))
        // Environment variables (TELECALL__SERVER__PORT, TELECALL__CLIENT__SIGNALING_URL, ...)
        .add_source(
            config::Environment::with_prefix("TELECALL")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    /// Longest chat message the server accepts, in characters
    pub max_message_length: u32,
    /// Messages kept per room; oldest are dropped first
    pub max_history: usize,
}

/// Everything a signaling client needs to run.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the signaling server
    pub signaling_url: String,
    /// REST base used for room history (`{base}/appointments/{room}/messages`)
    pub api_base_url: String,
    pub reconnect: ReconnectConfig,
    /// How long to wait for our own entry in a roster broadcast
    pub registration_timeout_secs: u64,
    /// Length of a connected call before it is force-ended
    pub call_duration_secs: u64,
    pub transcript_flush_secs: u64,
    pub transcript_prefix: String,
    /// Drop IPv6 host candidates before sending them (deployment workaround)
    pub drop_ipv6_candidates: bool,
    #[serde(default = "IceServer::defaults")]
    pub ice_servers: Vec<IceServer>,
}

impl ClientConfig {
    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }

    pub fn transcript_interval(&self) -> Duration {
        Duration::from_secs(self.transcript_flush_secs.max(1))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:3000/signal".into(),
            api_base_url: "http://localhost:3000/api".into(),
            reconnect: ReconnectConfig::default(),
            registration_timeout_secs: 10,
            call_duration_secs: 1800,
            transcript_flush_secs: 10,
            transcript_prefix: "[Transcript]".into(),
            drop_ipv6_candidates: true,
            ice_servers: IceServer::defaults(),
        }
    }
}

/// Reconnect policy for the signaling socket.
#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    pub auto_reconnect: bool,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive failed attempts before giving up for good
    pub max_attempts: u32,
}

impl ReconnectConfig {
    /// Exponential backoff: `initial * 2^(attempt-1)`, capped at `max`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            max_attempts: 10,
        }
    }
}
