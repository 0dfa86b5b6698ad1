pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod scoring;
pub mod services;

pub use config::Config;
pub use error::{FeedError, Result};
