//! Domain Layer - Canonical market data types and subscription state.
//!
//! This layer contains the core value types shared by every protocol
//! adapter, with no I/O dependencies. All types here are pure Rust with
//! serialization support.

/// Canonical market data types (ticks, order events).
pub mod market;

/// Subscription set tracking per stream session.
pub mod subscription;
