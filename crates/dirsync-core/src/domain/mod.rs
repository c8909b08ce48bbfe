//! Domain types shared by the sync engine and the daemon
//!
//! - [`SyncEndpoint`]: the fixed source/replica root pair
//! - [`SyncState`]: scheduler lifecycle state machine
//! - [`DomainError`]: domain-specific error type

pub mod endpoint;
pub mod errors;
pub mod state;

pub use endpoint::SyncEndpoint;
pub use errors::DomainError;
pub use state::SyncState;
