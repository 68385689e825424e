// Declare the modules to re-export
pub mod config;
pub mod core;
pub mod ingestors;
pub mod retrieve;

// Re-export the primary types
pub use config::{ConfigError, ResolvedUrls, SpoolmanConfig};
pub use core::accumulator::UsageAccumulator;
pub use core::active_spool::{ActiveSpool, SelectionStore, SpoolEvent};
pub use core::proxy::{ProxyError, ProxyGateway, ProxyRequest};
pub use ingestors::spoolman_ws::SpoolmanStream;
pub use retrieve::spoolman_http::{ApiResponse, SpoolmanClient};
