//! Multiplexer configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).
//!
//! | Variable | Default |
//! |---|---|
//! | `FEED_ENDPOINT` | built from host and port |
//! | `FEED_HOST` | `localhost` |
//! | `FEED_PORT` | `8080` |
//! | `FEED_CONNECT_TIMEOUT_SECS` | `10` |
//! | `FEED_CHANNELS` | empty |
//! | `FEED_DECODE` | `json` |
//! | `LOG_FORMAT` | `text` |

use std::time::Duration;

use crate::domain::DecodeMode;

/// Top-level configuration.
///
/// Loaded once at startup via [`MuxConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxConfig {
    /// WebSocket endpoint shared by every channel (e.g. `ws://localhost:8080`).
    pub endpoint: String,

    /// Seconds to wait for a WebSocket handshake before giving up.
    pub connect_timeout_secs: u64,

    /// Channels `feed-tap` subscribes to.
    pub channels: Vec<String>,

    /// Decode mode `feed-tap` subscribes with.
    pub decode: DecodeMode,

    /// Emit logs as JSON instead of human-readable text.
    pub log_json: bool,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoint_from_parts("localhost", 8080),
            connect_timeout_secs: 10,
            channels: Vec::new(),
            decode: DecodeMode::Json,
            log_json: false,
        }
    }
}

impl MuxConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set or a numeric value
    /// cannot be parsed. Calls `dotenvy::dotenv().ok()` to optionally load a
    /// `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `FEED_ENDPOINT` is not a `ws://` or `wss://` URL,
    /// or if `FEED_DECODE` is neither `json` nor `raw`.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let endpoint = match std::env::var("FEED_ENDPOINT") {
            Ok(endpoint) => endpoint,
            Err(_) => {
                let host = std::env::var("FEED_HOST").unwrap_or_else(|_| "localhost".to_string());
                endpoint_from_parts(&host, parse_env("FEED_PORT", 8080))
            }
        };
        validate_endpoint(&endpoint)?;

        let connect_timeout_secs = parse_env("FEED_CONNECT_TIMEOUT_SECS", 10);

        let channels = std::env::var("FEED_CHANNELS")
            .map(|raw| parse_channel_list(&raw))
            .unwrap_or_default();

        let decode = match std::env::var("FEED_DECODE") {
            Ok(raw) => raw.parse::<DecodeMode>()?,
            Err(_) => DecodeMode::default(),
        };

        let log_json = std::env::var("LOG_FORMAT")
            .is_ok_and(|format| format.trim().eq_ignore_ascii_case("json"));

        Ok(Self {
            endpoint,
            connect_timeout_secs,
            channels,
            decode,
            log_json,
        })
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Builds `ws://host:port`.
#[must_use]
pub fn endpoint_from_parts(host: &str, port: u16) -> String {
    format!("ws://{host}:{port}")
}

/// Checks that `endpoint` uses a WebSocket scheme and names a host.
///
/// # Errors
///
/// Returns a description of the problem when the scheme is not `ws`/`wss`
/// or nothing follows it.
pub fn validate_endpoint(endpoint: &str) -> Result<(), String> {
    let rest = endpoint
        .strip_prefix("ws://")
        .or_else(|| endpoint.strip_prefix("wss://"))
        .ok_or_else(|| format!("endpoint `{endpoint}` must start with ws:// or wss://"))?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(format!("endpoint `{endpoint}` has no host"));
    }
    Ok(())
}

/// Splits a comma-separated channel list, dropping blanks.
fn parse_channel_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
