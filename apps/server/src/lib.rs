//! Visit counter server
//!
//! One endpoint that counts visitors, wired three ways to show request-scoped
//! dependency resolution:
//! - Constructor injection of typed dependencies from a request scope
//! - A service locator the handler pulls from
//! - Manual closure wiring without the container

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod request_context;
pub mod services;
pub mod state;

pub use crate::config::{Config, WiringStyle};
pub use error::{Error, Result};
pub use state::AppState;
