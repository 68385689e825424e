//! # Data Retrieval Module
//!
//! This module holds the HTTP side of the engine: a thin, non-throwing client
//! for the Spoolman REST API.
//!
//! ## Purpose:
//! All HTTP traffic to Spoolman (spool lookups, usage reports, proxied
//! requests) flows through one client so that timeouts, URL construction and
//! error-body handling are decided in a single place. Responses are returned
//! as [`spoolman_http::ApiResponse`] values rather than errors, because a
//! non-2xx status frequently carries meaning of its own here (a 404 on a
//! spool is an authoritative deletion signal, not a failure).

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// The Spoolman REST client and its response envelope.
pub mod spoolman_http;
