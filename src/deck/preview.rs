//! Headless deck writing key images to PNG files

use parking_lot::Mutex;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{Deck, PressEvent, PRESS_EVENT_CAPACITY};
use crate::error::{Error, Result};
use crate::render::{KeyImage, KeySize};

/// Key size of the preview deck (Stream Deck MK.2)
pub const PREVIEW_KEY_SIZE: KeySize = KeySize::square(72);

/// Writes `<dir>/key-<index>.png` on every push
pub struct PreviewDeck {
    dir: PathBuf,
    key_count: usize,
    // Kept so the press stream stays open but silent
    _press_tx: mpsc::Sender<PressEvent>,
    press_rx: Mutex<Option<mpsc::Receiver<PressEvent>>>,
}

impl PreviewDeck {
    /// Create the output directory and the deck
    pub fn create(dir: impl Into<PathBuf>, key_count: usize) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Device(format!("creating preview directory {}: {}", dir.display(), e)))?;

        let (press_tx, press_rx) = mpsc::channel(PRESS_EVENT_CAPACITY);
        info!("🖼️  Preview deck: {} keys → {}", key_count, dir.display());

        Ok(Self {
            dir,
            key_count,
            _press_tx: press_tx,
            press_rx: Mutex::new(Some(press_rx)),
        })
    }

    /// File a key's image is written to
    pub fn key_path(&self, key: usize) -> PathBuf {
        self.dir.join(format!("key-{}.png", key))
    }
}

impl Deck for PreviewDeck {
    fn key_count(&self) -> usize {
        self.key_count
    }

    fn key_size(&self) -> KeySize {
        PREVIEW_KEY_SIZE
    }

    fn set_key_image(&self, key: usize, image: &KeyImage) -> Result<()> {
        if key >= self.key_count {
            return Err(Error::Device(format!("key {} out of range (0..{})", key, self.key_count)));
        }
        let path = self.key_path(key);
        image
            .as_rgb()
            .save(&path)
            .map_err(|e| Error::Device(format!("writing {}: {}", path.display(), e)))?;
        debug!(key, "Wrote {}", path.display());
        Ok(())
    }

    fn set_brightness(&self, percent: u8) -> Result<()> {
        debug!("Preview brightness {}%", percent.min(100));
        Ok(())
    }

    fn take_press_events(&self) -> Option<mpsc::Receiver<PressEvent>> {
        self.press_rx.lock().take()
    }

    fn close(&self) -> Result<()> {
        let blank = KeyImage::blank(PREVIEW_KEY_SIZE);
        for key in 0..self.key_count {
            self.set_key_image(key, &blank)?;
        }
        info!("Preview deck closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn test_writes_key_png() {
        let dir = TempDir::new().unwrap();
        let deck = PreviewDeck::create(dir.path().join("keys"), 6).unwrap();

        let mut image = KeyImage::blank(deck.key_size()).into_rgb();
        image.put_pixel(3, 4, Rgb([255, 0, 0]));
        deck.set_key_image(2, &KeyImage::from_rgb(image)).unwrap();

        let written = image::open(deck.key_path(2)).unwrap().to_rgb8();
        assert_eq!(written.dimensions(), (72, 72));
        assert_eq!(*written.get_pixel(3, 4), Rgb([255, 0, 0]));
    }

    #[test]
    fn test_out_of_range_key() {
        let dir = TempDir::new().unwrap();
        let deck = PreviewDeck::create(dir.path(), 3).unwrap();
        let blank = KeyImage::blank(deck.key_size());
        assert!(matches!(deck.set_key_image(3, &blank), Err(Error::Device(_))));
    }

    #[test]
    fn test_press_events_taken_once() {
        let dir = TempDir::new().unwrap();
        let deck = PreviewDeck::create(dir.path(), 3).unwrap();
        let mut events = deck.take_press_events().unwrap();
        assert!(deck.take_press_events().is_none());
        assert!(events.try_recv().is_err(), "preview never presses");
    }

    #[test]
    fn test_close_blanks_all_keys() {
        let dir = TempDir::new().unwrap();
        let deck = PreviewDeck::create(dir.path(), 2).unwrap();
        deck.close().unwrap();
        for key in 0..2 {
            let written = image::open(deck.key_path(key)).unwrap().to_rgb8();
            assert!(written.pixels().all(|p| *p == Rgb([0, 0, 0])));
        }
    }
}
