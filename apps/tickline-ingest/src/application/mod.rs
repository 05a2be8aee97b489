//! Application Layer - Port definitions.
//!
//! Contracts between the domain and the infrastructure adapters, following
//! the Hexagonal Architecture pattern used across the workspace.

/// Port interfaces (sink recorder, token source) and callback aliases.
pub mod ports;
