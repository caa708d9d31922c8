// clipkeeper - Library Root
// Clipboard and snippet stores, the daemon HTTP service, and its supervisor

pub mod api;
pub mod backoff;
pub mod config;
pub mod daemon;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod service;
pub mod store;
pub mod sync;
