//! Shared foundation for the codebox control plane.
//!
//! This crate holds the environment-driven configuration and the token
//! helpers used by every other codebox crate. It deliberately has no
//! database or HTTP dependencies so it can sit at the bottom of the
//! workspace dependency graph.

pub mod config;
pub mod token;

pub use config::Config;
