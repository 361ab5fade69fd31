//! HTTP API for the judge adapter.

mod error;
mod evaluate;
mod routes;
mod templates;
pub mod types;

pub use error::ApiError;
pub use routes::{router, serve, AppState};
