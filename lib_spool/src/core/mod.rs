//! # Core Engine Module
//!
//! This module forms the heart of the spool tracking engine. It owns the two
//! pieces of authoritative local state and the operations over them:
//!
//! - **`accumulator`**: converts the machine controller's absolute extruder
//!   position feed into a running total of unreported filament usage. Its lock
//!   is taken on every position sample, so it is kept deliberately separate
//!   from the selection lock.
//!
//! - **`active_spool`**: owns the currently selected spool id, the flush of
//!   pending usage to Spoolman, persistence of the selection and the
//!   selection-changed notification. Selection and flush are serialized under
//!   one lock that the hot accumulation path never touches.
//!
//! - **`proxy`**: the stateless pass-through gateway for arbitrary versioned
//!   Spoolman API calls, gated on the stream's liveness flag.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Running total of unreported filament usage.
pub mod accumulator;
/// Active spool selection, persistence and usage flushing.
pub mod active_spool;
/// Validated pass-through of versioned API calls to Spoolman.
pub mod proxy;

// --- Public API Re-exports ---
pub use accumulator::UsageAccumulator;
pub use active_spool::{ActiveSpool, SelectionStore, SpoolEvent};
pub use proxy::{ProxyError, ProxyGateway, ProxyRequest};
