pub mod auth;
pub mod config;
pub mod engagement;
pub mod error;
pub mod feed;
pub mod interact;
pub mod live;
pub mod messaging;
pub mod models;
pub mod openapi;
pub mod rate_limit; // in-memory rate limiting
pub mod repo;
pub mod routes;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
