//! Shared plumbing for the fade workspace: configuration, the SQLite store
//! wrapper and schema, tracing setup, and the row types every crate passes around.

pub mod config;
pub mod db;
pub mod observability;
pub mod types;
