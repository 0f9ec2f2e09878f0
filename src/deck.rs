//! Control surface devices
//!
//! A `Deck` is a sink for per-key images and a source of key press and
//! release edges. Backends:
//! - `PreviewDeck`: writes every key image to a PNG file, never reports presses
//! - `StreamDeck` (feature `streamdeck`): Elgato Stream Deck over HID

mod preview;
#[cfg(feature = "streamdeck")]
mod streamdeck;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::render::{KeyImage, KeySize};

pub use preview::PreviewDeck;
#[cfg(feature = "streamdeck")]
pub use streamdeck::{list_devices, DeviceInfo, StreamDeck};

/// Capacity of the press event channel
pub const PRESS_EVENT_CAPACITY: usize = 64;

/// One key changing between up and down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PressEvent {
    pub key: usize,
    pub pressed: bool,
}

/// Hardware control surface
pub trait Deck: Send + Sync {
    /// Number of keys, fixed for the device lifetime
    fn key_count(&self) -> usize;

    /// Pixel size of one key image
    fn key_size(&self) -> KeySize;

    /// Show an image on one key
    fn set_key_image(&self, key: usize, image: &KeyImage) -> Result<()>;

    /// Backlight brightness in percent (0..=100)
    fn set_brightness(&self, percent: u8) -> Result<()>;

    /// Stream of press/release edges. Yields the receiver once.
    fn take_press_events(&self) -> Option<mpsc::Receiver<PressEvent>>;

    /// Blank the keys and release the device
    fn close(&self) -> Result<()>;
}

/// Edges between two key state reports (true = down)
pub fn press_edges(previous: &[bool], current: &[bool]) -> Vec<PressEvent> {
    current
        .iter()
        .enumerate()
        .filter(|(key, down)| previous.get(*key).copied().unwrap_or(false) != **down)
        .map(|(key, down)| PressEvent { key, pressed: *down })
        .collect()
}
