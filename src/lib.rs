pub mod config;
pub mod day_key;
pub mod error;
pub mod handoff;
pub mod http;
pub mod ingest;
pub mod local_file;
pub mod mqtt;
pub mod partition;
pub mod poll;
pub mod record;
pub mod rotation;
pub mod sink;
