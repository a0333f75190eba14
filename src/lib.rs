pub mod admin;
pub mod api;
pub mod clients;
pub mod codec;
pub mod config;
pub mod dead_letter;
pub mod dispatcher;
pub mod error;
pub mod idempotency;
pub mod models;
pub mod monitor;
pub mod utils;
