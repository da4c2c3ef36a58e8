//! Storage interfaces consumed by the matching engine
//!
//! The engine never assumes a concrete database. Every invariant it relies on
//! (one live queue entry per participant, one room per pair, exclusive pairing
//! reservations) is expressed as a conditional operation on these traits.
//! The in-memory implementations back the service binary and the tests.

pub mod queue;
pub mod rooms;

pub use queue::{ClaimOutcome, EnqueueOutcome, InMemoryQueueStore, QueueStore, RemoveOutcome};
pub use rooms::{InMemoryRoomRegistry, RoomRegistry};
