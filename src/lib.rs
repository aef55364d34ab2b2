//! Proxy Sieve - Bounded-Concurrency Proxy Validator
//!
//! Validates large sets of proxy endpoints against http, https, socks4 and
//! socks5, keeps at most a configured number of probes in flight, and records
//! working proxies in a JSON file that is replaced atomically on every update.

pub mod error;
pub mod logging;
pub mod proxy;
pub mod server;

pub use proxy::*;

use std::path::PathBuf;

/// Application result type
pub type Result<T> = anyhow::Result<T>;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Canonical JSON output file
    pub output_path: PathBuf,
    /// Plaintext log of valid `protocol://address:port` lines
    pub valid_log_path: PathBuf,
    /// Plaintext log of invalid candidates
    pub invalid_log_path: PathBuf,
    /// Ceiling on simultaneous probes
    pub max_concurrency: usize,
    /// Per-probe settings
    pub probe: ProbeConfig,
    /// Port of the query server
    pub server_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("proxies.json"),
            valid_log_path: PathBuf::from("Valid_Proxies.txt"),
            invalid_log_path: PathBuf::from("Invalid_Proxies.txt"),
            max_concurrency: proxy::engine::DEFAULT_MAX_CONCURRENCY,
            probe: ProbeConfig::default(),
            server_port: 8080,
        }
    }
}
