//! Durable queue of writes that failed to reach the server.
//!
//! - Items are persisted one per key and replayed oldest-first per type
//! - A failed replay stays in place with its attempt count bumped
//! - Flushing is triggered by connectivity changes or by hand, never by a timer

mod item;
mod mutation_queue;
mod replay;
mod scheduler;

pub use item::{Mutation, QueueItem, Replay};
pub use mutation_queue::{FlushOutcome, FlushReport, MutationQueue};
pub use scheduler::spawn_reconnect_flusher;
