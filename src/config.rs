//! Runtime configuration.
//!
//! Read once at startup from the environment; every knob has a default that
//! works for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::io::retry::RetryConfig;

/// Configuration shared by the controllers and the binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the webhook listener binds to.
    pub bind_addr: SocketAddr,

    /// Base directory for temporary clones and queue snapshots.
    pub data_dir: PathBuf,

    /// Event-counter threshold at which a controller serializes its state
    /// and restarts itself to bound internal history growth.
    pub restart_threshold: u64,

    /// Wall-clock budget for one rebase session (clone through cleanup).
    pub session_timeout: Duration,

    /// How many processing failures a queued PR survives before it is
    /// dead-lettered instead of re-enqueued.
    pub max_process_attempts: u32,

    /// Backoff policy for provider calls.
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: ([0, 0, 0, 0], 3000).into(),
            data_dir: PathBuf::from("/var/lib/repo-warden"),
            restart_threshold: 4000,
            session_timeout: Duration::from_secs(60 * 60),
            max_process_attempts: 3,
            retry: RetryConfig::DEFAULT,
        }
    }
}

impl Config {
    /// Builds a config from `WARDEN_*` environment variables, falling back
    /// to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Some(addr) = env_parse::<SocketAddr>("WARDEN_BIND") {
            config.bind_addr = addr;
        }
        if let Ok(dir) = std::env::var("WARDEN_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(threshold) = env_parse::<u64>("WARDEN_RESTART_THRESHOLD") {
            config.restart_threshold = threshold;
        }
        if let Some(secs) = env_parse::<u64>("WARDEN_SESSION_TIMEOUT_SECS") {
            config.session_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_parse::<u32>("WARDEN_MAX_PROCESS_ATTEMPTS") {
            config.max_process_attempts = attempts;
        }

        config
    }

    /// Directory for temporary rebase clones.
    pub fn clones_dir(&self) -> PathBuf {
        self.data_dir.join("clones")
    }

    /// Directory for queue controller snapshots.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("queues")
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}
