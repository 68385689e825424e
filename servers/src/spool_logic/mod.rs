pub mod config;
pub mod logger;
pub mod state;
pub mod http;
pub mod store;
pub mod klippy;
