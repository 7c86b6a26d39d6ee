//! Shared domain types for the DataCure job-update client.
//!
//! Holds the job identifiers and snapshot model exchanged with the
//! validation API, the client configuration, and the endpoint resolver
//! used by both the live (push) and pull sides.

pub mod config;
pub mod endpoints;
pub mod error;
pub mod job;
pub mod types;
