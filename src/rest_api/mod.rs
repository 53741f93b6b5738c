//! REST API module for operational endpoints
//!
//! Serves `/health` for liveness checks and `/metrics` for Prometheus scraping.

mod handlers;
mod server;

pub use handlers::HealthResponse;
pub use server::run_server;
