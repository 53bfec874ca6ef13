//! Offline resilience for a coffee brewing client.
//!
//! A durable cache with expiry and priority eviction, a durable queue of
//! writes replayed in order once the device reconnects, and a question
//! answering pipeline that degrades to a bundled corpus when offline.

pub mod answer;
pub mod brew;
pub mod cache;
pub mod clock;
pub mod config;
pub mod logging;
pub mod network;
pub mod notice;
pub mod queue;
pub mod store;
