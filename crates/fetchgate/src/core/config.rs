use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Extractor command line.
/// Read once at startup from YTDL_BIN environment variable or defaults to "yt-dlp".
/// May carry leading arguments, e.g. `python3 -m yt_dlp`.
pub static YTDL_BIN: Lazy<String> = Lazy::new(|| env::var("YTDL_BIN").unwrap_or_else(|_| "yt-dlp".to_string()));

/// Port of the public gateway.
/// Read from WEB_PORT environment variable
/// Default: 3000
pub static WEB_PORT: Lazy<u16> = Lazy::new(|| parse_env("WEB_PORT", 3000));

/// Port of the internal metrics server. `0` disables it.
/// Read from METRICS_PORT environment variable
/// Default: 9090
pub static METRICS_PORT: Lazy<u16> = Lazy::new(|| parse_env("METRICS_PORT", 9090));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: fetchgate.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "fetchgate.log".to_string()));

/// Log level (error, warn, info, debug, trace)
/// Read from LOG_LEVEL environment variable
/// Default: info
pub static LOG_LEVEL: Lazy<String> = Lazy::new(|| env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()));

/// Hosts accepted by the request validator (each one also admits its subdomains).
/// Read from ALLOWED_HOSTS environment variable (comma or whitespace separated)
/// Default: youtube.com, youtu.be
pub static ALLOWED_HOSTS: Lazy<Vec<String>> = Lazy::new(|| {
    env::var("ALLOWED_HOSTS")
        .ok()
        .map(|raw| parse_host_list(&raw))
        .filter(|hosts| !hosts.is_empty())
        .unwrap_or_else(default_hosts)
});

fn default_hosts() -> Vec<String> {
    DEFAULT_ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect()
}

/// Canonical and short-link domains of the supported platform.
pub const DEFAULT_ALLOWED_HOSTS: &[&str] = &["youtube.com", "youtu.be"];

/// Splits a host list on commas and whitespace, lowercasing entries and dropping empties.
pub fn parse_host_list(raw: &str) -> Vec<String> {
    raw.split([',', ' ', '\n', '\t'])
        .map(|part| part.trim().trim_start_matches('.').to_lowercase())
        .filter(|part| !part.is_empty())
        .collect()
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Ignoring invalid {}={:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

/// Requested quality bounds
pub mod quality {
    /// Lowest accepted quality (height in pixels)
    pub const MIN: u32 = 144;

    /// Highest accepted quality, also the hard video ceiling
    pub const MAX: u32 = 1080;

    /// Quality used when the request omits it
    pub const DEFAULT: u32 = 720;
}

/// Stream relay configuration
pub mod relay {
    use super::{parse_env, Duration, Lazy};

    /// Seconds a relay may wait for the next chunk (or for a write to drain)
    pub static IDLE_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| parse_env("RELAY_IDLE_TIMEOUT_SECS", 120));

    /// Read size for one chunk of extractor output
    pub static CHUNK_BYTES: Lazy<usize> = Lazy::new(|| parse_env("RELAY_CHUNK_BYTES", 64 * 1024));

    /// Depth of the body channel; 1 keeps exactly one chunk in flight
    pub const BODY_CHANNEL_DEPTH: usize = 1;

    /// How long a failing relay waits to hand the terminating error to the body
    pub const ABORT_DELIVERY_TIMEOUT_MS: u64 = 500;

    /// Relay idle timeout duration
    pub fn idle_timeout() -> Duration {
        Duration::from_secs(*IDLE_TIMEOUT_SECS)
    }
}

/// Extractor process configuration
pub mod extractor {
    use super::{parse_env, Duration, Lazy};

    /// Bytes of stderr kept for diagnostics
    pub static DIAGNOSTIC_TAIL_BYTES: Lazy<usize> = Lazy::new(|| parse_env("DIAGNOSTIC_TAIL_BYTES", 8 * 1024));

    /// Upper bound for metadata output
    pub static METADATA_MAX_BYTES: Lazy<usize> = Lazy::new(|| parse_env("METADATA_MAX_BYTES", 1024 * 1024));

    /// Deadline for a whole metadata run (in seconds)
    pub static METADATA_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| parse_env("METADATA_TIMEOUT_SECS", 240));

    /// Grace period for the stderr reader after the process exited (in milliseconds)
    pub const DIAGNOSTIC_FLUSH_MS: u64 = 250;

    /// Metadata deadline duration
    pub fn metadata_timeout() -> Duration {
        Duration::from_secs(*METADATA_TIMEOUT_SECS)
    }

    /// Diagnostic flush grace duration
    pub fn diagnostic_flush() -> Duration {
        Duration::from_millis(DIAGNOSTIC_FLUSH_MS)
    }
}

/// HTTP surface configuration
pub mod server {
    /// Largest accepted request body
    pub const MAX_BODY_BYTES: usize = 16 * 1024;
}
