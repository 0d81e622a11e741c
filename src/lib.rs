//! IELTS GenAI Prep library

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod monitoring;
pub mod server;
pub mod services;
pub mod utils;

pub use config::Settings;
pub use error::ApiError;
pub use server::App;
