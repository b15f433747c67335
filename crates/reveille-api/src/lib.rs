//! Reveille API crate: axum HTTP surface over the alarm engine.
//!
//! Exposes the command surface as REST endpoints, a schedule snapshot for
//! dashboards and an SSE stream of domain events.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
