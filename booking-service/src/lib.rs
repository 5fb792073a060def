pub mod api;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod identity;
pub mod models;
pub mod notifications;
pub mod payments;
pub mod schema;
pub mod store;
pub mod sweeper;
