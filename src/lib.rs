pub mod app;
pub mod audit;
pub mod authz;
pub mod config;
pub mod db;
pub mod docs;
pub mod errors;
pub mod jwt;
pub mod models;
pub mod queue;
pub mod routes;
pub mod sanitize;
pub mod throttle;
pub mod utils;
pub mod worker;

// Re-export commonly used items for tests
pub use app::{create_app, create_app_with_queue};
