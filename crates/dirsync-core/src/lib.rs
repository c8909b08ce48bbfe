//! dirsync Core - Domain types, configuration and ambient services
//!
//! This crate contains everything the sync engine and the daemon share:
//! - **Domain** - `SyncEndpoint`, the `SyncState` machine, `DomainError`
//! - **Configuration** - YAML config with defaults, validation and a builder
//! - **Validation** - startup checks on the source, replica and log paths
//! - **Logging** - tracing subscriber with a console and a log-file sink

pub mod config;
pub mod domain;
pub mod logging;
pub mod validation;
