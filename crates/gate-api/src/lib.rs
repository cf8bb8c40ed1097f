//! TCP Gate Control Plane
//!
//! This crate provides the Axum-based HTTP API used to list, inspect,
//! add and remove proxied backends while the gate is running.

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, MetricsHandle};
