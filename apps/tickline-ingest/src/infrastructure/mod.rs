//! Infrastructure Layer
//!
//! Protocol adapters, connection lifecycle, dispatch, persistence, and
//! operational concerns. This layer contains all I/O and external-system
//! integration; the domain layer stays transport-free.

pub mod chunked;
pub mod config;
pub mod dispatch;
pub mod hub;
pub mod lifecycle;
pub mod metrics;
pub mod sink;
pub mod socket;
pub mod telemetry;
