//! HTTP API

pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;

pub use auth::{API_KEY_HEADER, CLIENT_ID_HEADER, Presented};
pub use error::ApiError;
pub use server::{ApiServer, AppState, create_router};
