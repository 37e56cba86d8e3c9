//! Runner connectivity for the codebox control plane.
//!
//! A runner is an external agent managing containers on some host. It is
//! reached either through a public URL or, for NAT'd hosts, through a
//! reverse tunnel the runner itself dials in to. This crate owns the
//! typed HTTP client for the runner control API, the port broker that
//! hands out local tunnel ports, and the tunnel session multiplexer.

pub mod broker;
pub mod client;
pub mod endpoint;
pub mod error;
pub mod tunnel;

pub use broker::PortBroker;
pub use client::{RunnerClient, StartWorkspaceRequest, RUNNER_TOKEN_HEADER};
pub use endpoint::RunnerEndpoint;
pub use error::{Result, RunnerError};
