//! Tandem Match - random-pairing matchmaking for one-on-one conversation rooms
//!
//! Participants ask to be matched; the service queues them, pairs each with a
//! uniformly random compatible participant that is waiting, and hands both
//! sides the identifier of a durable room for the pair. Pairing stays correct
//! when many requests run at once, across processes, because every
//! coordination step is a conditional write on the stores.

pub mod config;
pub mod error;
pub mod matching;
pub mod metrics;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use matching::{MatchEngine, MatchingConfig};
pub use store::{InMemoryQueueStore, InMemoryRoomRegistry, QueueStore, RoomRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
