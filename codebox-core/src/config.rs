use serde::Deserialize;
use std::path::PathBuf;

/// Control-plane configuration, loaded from `CODEBOX_*` environment
/// variables with sensible defaults for local development.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Root directory for workspace logs and materialized config snapshots.
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Public base URL of the main application origin, used when building
    /// the authorize redirect for the cross-origin handoff.
    #[serde(default = "default_external_url")]
    pub external_url: String,

    /// Wildcard domain under which forwarded ports are exposed as
    /// subdomains. When unset, only path-based forwarding is available.
    #[serde(default = "default_wildcard_domain")]
    pub wildcard_domain: Option<String>,

    #[serde(default = "default_use_subdomains")]
    pub use_subdomains: bool,

    #[serde(default = "default_auth_cookie_name")]
    pub auth_cookie_name: String,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_job_poll_interval")]
    pub job_poll_interval_secs: u64,

    /// Interval between `GetDetails` polls while a workspace is starting
    /// or stopping.
    #[serde(default = "default_runner_poll_interval")]
    pub runner_poll_interval_ms: u64,

    /// Upper bound on a single start/stop poll loop. A runner that never
    /// reports a terminal status fails the job instead of pinning a
    /// worker forever.
    #[serde(default = "default_runner_poll_timeout")]
    pub runner_poll_timeout_secs: u64,

    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    #[serde(default = "default_tunnel_port_min")]
    pub tunnel_port_min: u16,

    #[serde(default = "default_tunnel_port_max")]
    pub tunnel_port_max: u16,

    #[serde(default = "default_runner_http_timeout")]
    pub runner_http_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    std::env::var("CODEBOX_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("CODEBOX_DB_PATH") {
        return PathBuf::from(path);
    }
    home_dir().join(".codebox").join("codebox.db")
}

fn default_data_path() -> PathBuf {
    if let Ok(path) = std::env::var("CODEBOX_DATA_PATH") {
        return PathBuf::from(path);
    }
    home_dir().join(".codebox").join("data")
}

fn default_external_url() -> String {
    std::env::var("CODEBOX_EXTERNAL_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

fn default_wildcard_domain() -> Option<String> {
    std::env::var("CODEBOX_WILDCARD_DOMAIN").ok()
}

fn default_use_subdomains() -> bool {
    env_parse("CODEBOX_USE_SUBDOMAINS", true)
}

fn default_auth_cookie_name() -> String {
    std::env::var("CODEBOX_AUTH_COOKIE_NAME").unwrap_or_else(|_| "codebox_session".to_string())
}

fn default_worker_concurrency() -> usize {
    env_parse("CODEBOX_WORKER_CONCURRENCY", 2)
}

fn default_job_poll_interval() -> u64 {
    env_parse("CODEBOX_JOB_POLL_INTERVAL_SECS", 1)
}

fn default_runner_poll_interval() -> u64 {
    env_parse("CODEBOX_RUNNER_POLL_INTERVAL_MS", 500)
}

fn default_runner_poll_timeout() -> u64 {
    env_parse("CODEBOX_RUNNER_POLL_TIMEOUT_SECS", 900)
}

fn default_ping_interval() -> u64 {
    env_parse("CODEBOX_PING_INTERVAL_SECS", 120)
}

fn default_tunnel_port_min() -> u16 {
    env_parse("CODEBOX_TUNNEL_PORT_MIN", 20000)
}

fn default_tunnel_port_max() -> u16 {
    env_parse("CODEBOX_TUNNEL_PORT_MAX", 49999)
}

fn default_runner_http_timeout() -> u64 {
    env_parse("CODEBOX_RUNNER_HTTP_TIMEOUT_SECS", 30)
}

fn env_parse<T: std::str::FromStr>(var: &str, fallback: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(fallback)
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            data_path: default_data_path(),
            external_url: default_external_url(),
            wildcard_domain: default_wildcard_domain(),
            use_subdomains: default_use_subdomains(),
            auth_cookie_name: default_auth_cookie_name(),
            worker_concurrency: default_worker_concurrency(),
            job_poll_interval_secs: default_job_poll_interval(),
            runner_poll_interval_ms: default_runner_poll_interval(),
            runner_poll_timeout_secs: default_runner_poll_timeout(),
            ping_interval_secs: default_ping_interval(),
            tunnel_port_min: default_tunnel_port_min(),
            tunnel_port_max: default_tunnel_port_max(),
            runner_http_timeout_secs: default_runner_http_timeout(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Cookie name used on forwarded origins. Browsers refuse to share a
    /// cookie name across origins, so the handoff callback sets its own.
    pub fn forward_cookie_name(&self) -> String {
        format!("{}-forward", self.auth_cookie_name)
    }

    /// Fixed callback path for the cross-origin authorization handoff.
    /// The subdomain router always lets this path through undecoded.
    pub fn handoff_callback_path(&self) -> String {
        format!("/api/v1/auth/subdomains/callback-{}", self.auth_cookie_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_reasonable() {
        let config = Config::default();
        assert!(!config.bind_addr.is_empty());
        assert!(config.tunnel_port_min < config.tunnel_port_max);
        assert_eq!(config.runner_poll_interval_ms, 500);
    }

    #[test]
    fn forward_cookie_name_is_distinct() {
        let config = Config::default();
        assert_ne!(config.forward_cookie_name(), config.auth_cookie_name);
        assert!(config
            .handoff_callback_path()
            .starts_with("/api/v1/auth/subdomains/callback-"));
    }
}
