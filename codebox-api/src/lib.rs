//! HTTP control-plane service: workspace lifecycle API, runner tunnel
//! endpoints, subdomain port forwarding, and the cross-origin session
//! handoff.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
pub mod subdomain;

pub use error::{ApiError, ApiResult};
pub use routes::create_app;
pub use state::AppState;
pub use subdomain::SubdomainTarget;
