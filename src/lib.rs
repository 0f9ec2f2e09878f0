//! Hass Deck - Home Assistant on an Elgato Stream Deck
//!
//! Mirrors live entity state from a Home Assistant hub onto the keys of a
//! Stream Deck and turns key presses into service calls.

pub mod binding;
pub mod config;
pub mod deck;
pub mod error;
pub mod hub;
pub mod render;
pub mod state;
pub mod sync;

pub use error::{Error, Result};
