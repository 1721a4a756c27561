//! Command handlers

pub mod export;
pub mod ingest;
pub mod mapping;
pub mod runs;
pub mod show;
pub mod verify;
pub mod watch;
