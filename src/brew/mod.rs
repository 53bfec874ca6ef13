pub mod assistant;
pub mod client;
pub mod mutations;
pub mod service;
pub mod types;

pub use service::{BrewService, WriteOutcome, TOP_RECIPES_KEY};
