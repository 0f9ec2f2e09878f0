//! Elgato Stream Deck over HID
//!
//! The device handle sits behind a mutex shared by image writes and a
//! polling thread that turns button state reports into press edges.

use elgato_streamdeck::info::Kind;
use elgato_streamdeck::{list_devices as hid_devices, new_hidapi, StreamDeck as HidDeck, StreamDeckInput};
use image::DynamicImage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{press_edges, Deck, PressEvent, PRESS_EVENT_CAPACITY};
use crate::error::{Error, Result};
use crate::render::{KeyImage, KeySize};

const POLL_TIMEOUT: Duration = Duration::from_millis(10);
const POLL_IDLE: Duration = Duration::from_millis(5);

/// A connected deck as reported by HID enumeration
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub kind: String,
    pub serial: String,
    pub key_count: usize,
}

/// Connected visual decks
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let hid = new_hidapi().map_err(|e| Error::Device(format!("HID init: {}", e)))?;
    Ok(hid_devices(&hid)
        .into_iter()
        .filter(|(kind, _)| is_visual(*kind))
        .map(|(kind, serial)| DeviceInfo {
            kind: format!("{:?}", kind),
            serial,
            key_count: kind.key_count() as usize,
        })
        .collect())
}

fn is_visual(kind: Kind) -> bool {
    !matches!(kind, Kind::Pedal)
}

/// First visual Stream Deck found
pub struct StreamDeck {
    device: Arc<Mutex<HidDeck>>,
    kind: Kind,
    key_size: KeySize,
    running: Arc<AtomicBool>,
    poller: Mutex<Option<JoinHandle<()>>>,
    press_rx: Mutex<Option<mpsc::Receiver<PressEvent>>>,
}

impl StreamDeck {
    /// Open the first visual deck (or the one with `serial`) and reset it
    pub fn open(serial: Option<&str>) -> Result<Self> {
        let hid = new_hidapi().map_err(|e| Error::Device(format!("HID init: {}", e)))?;

        let (kind, serial) = hid_devices(&hid)
            .into_iter()
            .filter(|(kind, _)| is_visual(*kind))
            .find(|(_, found)| serial.map_or(true, |wanted| wanted == found.as_str()))
            .ok_or_else(|| Error::DeviceNotFound(serial.map(str::to_string)))?;

        let device = HidDeck::connect(&hid, kind, &serial)
            .map_err(|e| Error::Device(format!("opening {:?} {}: {}", kind, serial, e)))?;
        device
            .reset()
            .map_err(|e| Error::Device(format!("reset: {}", e)))?;

        let (width, height) = kind.key_image_format().size;
        let key_size = KeySize {
            width: width as u32,
            height: height as u32,
        };
        info!(
            "🎛️  Stream Deck {:?} ({}) connected: {} keys, {}x{}",
            kind,
            serial,
            kind.key_count(),
            key_size.width,
            key_size.height
        );

        let device = Arc::new(Mutex::new(device));
        let running = Arc::new(AtomicBool::new(true));
        let (press_tx, press_rx) = mpsc::channel(PRESS_EVENT_CAPACITY);

        let poller = {
            let device = device.clone();
            let running = running.clone();
            std::thread::Builder::new()
                .name("streamdeck-input".into())
                .spawn(move || poll_input(device, running, press_tx, kind.key_count() as usize))
                .map_err(|e| Error::Device(format!("spawning input thread: {}", e)))?
        };

        Ok(Self {
            device,
            kind,
            key_size,
            running,
            poller: Mutex::new(Some(poller)),
            press_rx: Mutex::new(Some(press_rx)),
        })
    }
}

fn poll_input(
    device: Arc<Mutex<HidDeck>>,
    running: Arc<AtomicBool>,
    press_tx: mpsc::Sender<PressEvent>,
    key_count: usize,
) {
    let mut previous = vec![false; key_count];

    while running.load(Ordering::SeqCst) {
        let input = device.lock().read_input(Some(POLL_TIMEOUT));
        match input {
            Ok(StreamDeckInput::ButtonStateChange(current)) => {
                for event in press_edges(&previous, &current) {
                    debug!(key = event.key, pressed = event.pressed, "Key edge");
                    if press_tx.try_send(event).is_err() {
                        warn!(key = event.key, "Press event dropped");
                    }
                }
                previous = current;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Stream Deck input error: {}", e);
                std::thread::sleep(Duration::from_millis(500));
            }
        }
        std::thread::sleep(POLL_IDLE);
    }
    debug!("Stream Deck input thread stopped");
}

impl Deck for StreamDeck {
    fn key_count(&self) -> usize {
        self.kind.key_count() as usize
    }

    fn key_size(&self) -> KeySize {
        self.key_size
    }

    fn set_key_image(&self, key: usize, image: &KeyImage) -> Result<()> {
        let index = u8::try_from(key)
            .ok()
            .filter(|k| (*k as usize) < self.key_count())
            .ok_or_else(|| Error::Device(format!("key {} out of range", key)))?;

        let device = self.device.lock();
        device
            .set_button_image(index, DynamicImage::ImageRgb8(image.as_rgb().clone()))
            .map_err(|e| Error::Device(format!("key {} image: {}", key, e)))?;
        device
            .flush()
            .map_err(|e| Error::Device(format!("flush: {}", e)))
    }

    fn set_brightness(&self, percent: u8) -> Result<()> {
        self.device
            .lock()
            .set_brightness(percent.min(100))
            .map_err(|e| Error::Device(format!("brightness: {}", e)))
    }

    fn take_press_events(&self) -> Option<mpsc::Receiver<PressEvent>> {
        self.press_rx.lock().take()
    }

    fn close(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(poller) = self.poller.lock().take() {
            if poller.join().is_err() {
                warn!("Stream Deck input thread panicked");
            }
        }
        self.device
            .lock()
            .reset()
            .map_err(|e| Error::Device(format!("reset: {}", e)))?;
        info!("Stream Deck released");
        Ok(())
    }
}

impl Drop for StreamDeck {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
