//! Background jobs
//!
//! - rebuild_scheduler: periodic safety-net rebuild triggers
//! - ingestion_listener: rebuild triggers from ingestion completion events

pub mod ingestion_listener;
pub mod rebuild_scheduler;

pub use ingestion_listener::{
    handle_event, ingestion_channel, run_channel_listener, run_pubsub_listener, IngestionEvent,
    IngestionHandle,
};
pub use rebuild_scheduler::{run_tick, start_rebuild_scheduler, RebuildSchedulerConfig};
