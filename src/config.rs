//! Configuration management for Hass Deck
//!
//! Handles loading, parsing and validation of the YAML configuration file.
//! Two layouts are accepted: a full document with `hub`, `deck` and `buttons`
//! sections, or a bare list of buttons (hub and deck settings then come from
//! defaults and the command line).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

use crate::state::domain_of;

/// Smallest reconnect delay accepted from the config file
pub const MIN_RECONNECT_DELAY_MS: u64 = 3_000;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub deck: DeckConfig,
    #[serde(default)]
    pub buttons: Vec<ButtonSpec>,
}

/// Home Assistant connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HubConfig {
    #[serde(default = "default_hub_host")]
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Use `wss://` instead of `ws://`
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

/// Control surface settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeckConfig {
    #[serde(default = "default_brightness")]
    pub brightness: u8,
    #[serde(default = "default_font")]
    pub font: PathBuf,
    /// Directory of pre-rasterized `<icon_mdi>.png` files
    #[serde(default = "default_icon_dir")]
    pub icon_dir: PathBuf,
    /// Number of keys emulated by the preview deck
    #[serde(default = "default_preview_key_count")]
    pub preview_key_count: usize,
}

/// Static configuration of one physical key
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ButtonSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Service to call on press, as `domain.service`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub service_data: Map<String, Value>,
    /// Label, may be a template
    #[serde(default)]
    pub text: String,
    /// Label color, may be a template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    #[serde(default = "default_text_size")]
    pub text_size: u32,
    /// Static icon image file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<PathBuf>,
    /// Material Design icon name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_mdi: Option<String>,
}

impl ButtonSpec {
    /// Domain used for default icons: the service's domain, else the entity's
    pub fn domain(&self) -> Option<&str> {
        self.service
            .as_deref()
            .or(self.entity_id.as_deref())
            .map(domain_of)
    }

    /// Split `service` into (domain, service)
    pub fn action(&self) -> Option<(&str, &str)> {
        self.service.as_deref().and_then(|s| s.split_once('.'))
    }

    /// Parameters sent with `call_service` on press
    ///
    /// Configured `service_data` wins; when none is configured the bound
    /// entity is passed as `entity_id`.
    pub fn action_data(&self) -> Map<String, Value> {
        if !self.service_data.is_empty() {
            return self.service_data.clone();
        }
        let mut data = Map::new();
        if let Some(entity_id) = &self.entity_id {
            data.insert("entity_id".to_string(), Value::String(entity_id.clone()));
        }
        data
    }
}

impl HubConfig {
    /// WebSocket endpoint of the hub
    pub fn websocket_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}/api/websocket", scheme, self.host.trim_end_matches('/'))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::from_yaml_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        config.validate()?;

        Ok(config)
    }

    /// Parse either layout without validating
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let raw: serde_yaml::Value = serde_yaml::from_str(contents)?;

        if raw.is_sequence() {
            let buttons: Vec<ButtonSpec> = serde_yaml::from_value(raw)?;
            return Ok(Self {
                buttons,
                ..Self::default()
            });
        }

        Ok(serde_yaml::from_value(raw)?)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.hub.host.trim().is_empty() {
            anyhow::bail!("hub.host cannot be empty");
        }
        if self.hub.reconnect_delay_ms < MIN_RECONNECT_DELAY_MS {
            anyhow::bail!(
                "hub.reconnect_delay_ms is {} (must be at least {})",
                self.hub.reconnect_delay_ms,
                MIN_RECONNECT_DELAY_MS
            );
        }
        if self.deck.brightness > 100 {
            anyhow::bail!("deck.brightness is {} (must be 0-100)", self.deck.brightness);
        }

        for (idx, button) in self.buttons.iter().enumerate() {
            Self::validate_button(button).with_context(|| format!("Invalid button {}", idx))?;
        }

        Ok(())
    }

    /// Validate a single button
    fn validate_button(button: &ButtonSpec) -> Result<()> {
        if let Some(service) = &button.service {
            match service.split_once('.') {
                Some((domain, name)) if !domain.is_empty() && !name.is_empty() => {}
                _ => anyhow::bail!("service '{}' must look like 'domain.service'", service),
            }
        }
        if let Some(entity_id) = &button.entity_id {
            if entity_id.trim().is_empty() {
                anyhow::bail!("entity_id cannot be empty");
            }
        }
        if button.text_size == 0 {
            anyhow::bail!("text_size must be greater than 0");
        }
        Ok(())
    }

    /// Buttons beyond the device's key count are a configuration error
    pub fn check_key_count(&self, key_count: usize) -> Result<()> {
        if self.buttons.len() > key_count {
            anyhow::bail!(
                "{} buttons configured but the device only has {} keys",
                self.buttons.len(),
                key_count
            );
        }
        Ok(())
    }

    /// Token from the config file, required before connecting
    pub fn require_token(&self) -> Result<&str> {
        self.hub
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .context("No access token: set hub.token, HASS_TOKEN or --token")
    }
}

impl Default for ButtonSpec {
    /// A blank key: no entity, no action, empty label
    fn default() -> Self {
        Self {
            entity_id: None,
            service: None,
            service_data: Map::new(),
            text: String::new(),
            text_color: None,
            text_size: default_text_size(),
            icon: None,
            icon_mdi: None,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: default_hub_host(),
            token: None,
            secure: false,
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            brightness: default_brightness(),
            font: default_font(),
            icon_dir: default_icon_dir(),
            preview_key_count: default_preview_key_count(),
        }
    }
}

// Default value functions
fn default_hub_host() -> String { "localhost:8123".to_string() }
fn default_reconnect_delay_ms() -> u64 { 5_000 }
fn default_brightness() -> u8 { 100 }
fn default_font() -> PathBuf { PathBuf::from("assets/DejaVuSans.ttf") }
fn default_icon_dir() -> PathBuf { PathBuf::from("assets/mdi") }
fn default_preview_key_count() -> usize { 15 }
fn default_text_size() -> u32 { 12 }
