pub mod api;
pub mod config;
pub mod dedup;
pub mod event;
pub mod fingerprint;
pub mod health;
pub mod intake;
pub mod prometheus;
pub mod queue;
pub mod reporter;
pub mod router;
pub mod server;
pub mod sinks;
pub mod stats;
pub mod time;
pub mod worker;
