pub mod auth;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod notifier;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
pub mod utils;

pub use notifier::{Notifier, PgNotificationSink};
