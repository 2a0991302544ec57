//! Subscription-driven quote distribution server.
//!
//! The crate is organised around [`engine::DistributionEngine`], which owns the single
//! quote source chosen at startup, the subscription registry and quote cache, and the
//! push sessions. Around it:
//!
//! - `source` holds the synthetic generator, the live gateway adapter and the
//!   simulated gateway front.
//! - `model` holds the registry, the cache and the keep-alive monitor.
//! - `receiver`, `stream` and `udp_listener` are the TCP control and UDP push plumbing.
//! - `config` turns flags and environment variables into typed settings.
#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod model;
pub mod receiver;
pub mod sessions;
pub mod source;
pub mod stream;
pub mod udp_listener;
