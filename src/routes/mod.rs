pub mod auth;
pub mod health;
pub mod organizations;
pub mod suppliers;
pub mod users;
