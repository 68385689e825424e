//! # Stream Ingestors Module
//!
//! Home of the engine's persistent push channels. The Spoolman websocket
//! client lives here: it survives disconnects indefinitely, decodes
//! server-pushed mutation events and re-verifies the active spool after
//! every reconnect.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Self-healing websocket client for the Spoolman event feed.
pub mod spoolman_ws;

// --- Public API Re-exports ---
pub use spoolman_ws::SpoolmanStream;
