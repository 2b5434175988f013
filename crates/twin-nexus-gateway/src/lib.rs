//! # Twin Nexus Gateway
//!
//! Runtime shell around the [`twin_nexus_core`] digital twin: a single
//! writer task owning the Nexus, an mpsc command front door, and a broadcast
//! stream of debounced change notifications.
//!
//! Southbound connectors and northbound consumers share one
//! [`GatewayHandle`]; everything that mutates the twin is serialized through
//! the writer loop, so the core never needs a lock.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod events;
pub mod runtime;

pub use config::GatewayConfig;
pub use events::BroadcastSink;
pub use runtime::{Gateway, GatewayHandle};
