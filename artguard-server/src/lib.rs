//! Artguard Server Library - HTTP boundary of the ingress gateway
//!
//! This library exposes the server components for use in integration tests.
//! The main binary uses these same components.

pub mod artwork_store;
pub mod config;
pub mod error;
pub mod handlers;
pub mod job_store;
pub mod multipart;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod validation;

pub use artwork_store::PostgresArtworkStore;
pub use config::Config;
pub use error::ApiError;
pub use job_store::RedisJobStore;
pub use openapi::ApiDoc;
pub use routes::{create_router, create_router_with_config};
pub use state::{AppState, StartupError};
