pub mod auth;
pub mod cache;
pub mod config;
pub mod envelope;
pub mod jobs;
pub mod ratelimit;
pub mod routes;
pub mod state;
pub mod usage;
pub mod webhooks;

pub use config::Config;
pub use state::AppState;
