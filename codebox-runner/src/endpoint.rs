//! Runner connectivity mode as a closed variant.

use crate::error::{Result, RunnerError};
use codebox_db::runners::Runner;

/// How the control plane reaches a runner: directly via a public URL, or
/// through the local end of its reverse tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEndpoint {
    Public(String),
    /// Local tunnel port; zero means no port is currently assigned.
    Tunnel(u16),
}

impl RunnerEndpoint {
    pub fn for_runner(runner: &Runner) -> Self {
        if runner.use_public_url {
            if let Some(url) = &runner.public_url {
                return RunnerEndpoint::Public(url.clone());
            }
        }
        RunnerEndpoint::Tunnel(runner.tunnel_port.unwrap_or(0))
    }

    /// Base URL for runner API calls. A tunnel-mode runner without an
    /// assigned port is a hard `NotConnected` failure before any I/O.
    pub fn resolve(&self) -> Result<String> {
        match self {
            RunnerEndpoint::Public(url) => Ok(url.trim_end_matches('/').to_string()),
            RunnerEndpoint::Tunnel(0) => Err(RunnerError::NotConnected),
            RunnerEndpoint::Tunnel(port) => Ok(format!("http://127.0.0.1:{port}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn runner(use_public_url: bool, public_url: Option<&str>, port: Option<u16>) -> Runner {
        Runner {
            id: 1,
            name: "r".into(),
            token: "cbrt-x".into(),
            use_public_url,
            public_url: public_url.map(String::from),
            tunnel_port: port,
            last_contact_at: None,
            version: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn public_url_wins() {
        let endpoint = RunnerEndpoint::for_runner(&runner(
            true,
            Some("https://runner.example.com/"),
            Some(20001),
        ));
        assert_eq!(endpoint.resolve().unwrap(), "https://runner.example.com");
    }

    #[test]
    fn tunnel_port_resolves_to_loopback() {
        let endpoint = RunnerEndpoint::for_runner(&runner(false, None, Some(20042)));
        assert_eq!(endpoint.resolve().unwrap(), "http://127.0.0.1:20042");
    }

    #[test]
    fn unassigned_port_is_not_connected() {
        let endpoint = RunnerEndpoint::for_runner(&runner(false, None, None));
        assert!(matches!(
            endpoint.resolve(),
            Err(RunnerError::NotConnected)
        ));
    }
}
