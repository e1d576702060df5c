//! Web server configuration

use mailprobe_smtp::DEFAULT_HELO_NAME;
use serde::Deserialize;

/// Configuration for the HTTP endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    /// Address to bind the web server
    ///
    /// Common values:
    /// - `[::]:3000` (IPv6 any address, port 3000)
    /// - `0.0.0.0:3000` (IPv4 any address, port 3000)
    /// - `127.0.0.1:3000` (localhost only, port 3000)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Name the probe announces in EHLO/HELO
    #[serde(default = "default_helo_name")]
    pub helo_name: String,

    /// Answer cross-origin requests from any origin
    #[serde(default = "default_cors")]
    pub cors: bool,
}

fn default_listen_address() -> String {
    "[::]:3000".to_string()
}

fn default_helo_name() -> String {
    DEFAULT_HELO_NAME.to_string()
}

const fn default_cors() -> bool {
    true
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            helo_name: default_helo_name(),
            cors: default_cors(),
        }
    }
}
