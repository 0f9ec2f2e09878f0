//! State management module - entity state mirrored from the hub
//!
//! Holds the in-process copy of Home Assistant entity states: created empty,
//! filled from the `get_states` snapshot, then kept current by
//! `state_changed` events. Never persisted.

mod store;
mod types;

pub use store::StateStore;
pub use types::{domain_of, EntityState};
