//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

/// Console configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for task artifacts (`<data_dir>/tasks/<id>/...`).
    pub data_dir: PathBuf,
    /// URL prefix prepended to derived task paths when talking to the backend.
    pub url_prefix: String,
    /// Compute backend submission endpoint.
    pub backend_url: String,
    /// Port for the WebSocket/REST server.
    pub ws_port: u16,
    /// Timeout for downloading a finished task's result artifact.
    pub download_timeout: Duration,
    /// Capacity of the client broadcast channel.
    pub broadcast_capacity: usize,
    /// Capacity of the inbound status-event channel.
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            url_prefix: "http://127.0.0.1:8080".to_string(),
            backend_url: "http://127.0.0.1:9000/api/optimize".to_string(),
            ws_port: 8080,
            download_timeout: Duration::from_secs(60),
            broadcast_capacity: 256,
            event_capacity: 256,
        }
    }
}

impl Config {
    /// Build a config from `OPT_CONSOLE_*` environment variables,
    /// falling back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let data_dir = std::env::var("OPT_CONSOLE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let url_prefix = std::env::var("OPT_CONSOLE_URL_PREFIX")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or(defaults.url_prefix);

        let backend_url =
            std::env::var("OPT_CONSOLE_BACKEND_URL").unwrap_or(defaults.backend_url);

        let ws_port = std::env::var("OPT_CONSOLE_WS_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.ws_port);

        let download_timeout = std::env::var("OPT_CONSOLE_DOWNLOAD_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.download_timeout);

        Self {
            data_dir,
            url_prefix,
            backend_url,
            ws_port,
            download_timeout,
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.ws_port, 8080);
        assert!(config.download_timeout >= Duration::from_secs(1));
        assert!(config.broadcast_capacity > 0);
        assert!(config.event_capacity > 0);
    }
}
