//! Synchronization between the hub and the deck

mod controller;
mod pending;


pub use controller::{Phase, SyncController};
pub use pending::{PendingRequests, RequestKind};
