//! Home Assistant WebSocket API frames
//!
//! Outbound commands are serialized from `Outbound`. Inbound text frames are
//! decoded into `Inbound`; event kinds other than `state_changed` and frame
//! types we do not use are kept as `Other` so callers can skip them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::state::EntityState;

/// Event type of entity state updates
pub const STATE_CHANGED: &str = "state_changed";

/// Commands sent to the hub
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Auth {
        access_token: String,
    },
    GetStates {
        id: u64,
    },
    SubscribeEvents {
        id: u64,
        event_type: String,
    },
    UnsubscribeEvents {
        id: u64,
        subscription: u64,
    },
    CallService {
        id: u64,
        domain: String,
        service: String,
        service_data: Map<String, Value>,
    },
}

impl Outbound {
    /// Correlation id, if the command expects a reply
    pub fn id(&self) -> Option<u64> {
        match self {
            Outbound::Auth { .. } => None,
            Outbound::GetStates { id }
            | Outbound::SubscribeEvents { id, .. }
            | Outbound::UnsubscribeEvents { id, .. }
            | Outbound::CallService { id, .. } => Some(*id),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::protocol("encoding frame", e))
    }
}

/// Frames received from the hub
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    AuthRequired {
        ha_version: Option<String>,
    },
    AuthOk {
        ha_version: Option<String>,
    },
    AuthInvalid {
        message: String,
    },
    /// Reply to a command carrying a correlation id
    Result {
        id: u64,
        success: bool,
        result: Value,
        error: Option<String>,
    },
    Event {
        id: Option<u64>,
        event: HubEvent,
    },
    /// Frame types this client does not use (pong, ...)
    Other {
        kind: String,
    },
}

/// Payload of an `event` frame
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    /// `new_state` is None when the entity was removed
    StateChanged {
        entity_id: String,
        new_state: Option<EntityState>,
    },
    Other {
        event_type: String,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RawError>,
    #[serde(default)]
    event: Option<RawEvent>,
    #[serde(default)]
    ha_version: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawError {
    Structured {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Text(String),
}

#[derive(Deserialize)]
struct RawEvent {
    event_type: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct StateChangedData {
    entity_id: String,
    #[serde(default)]
    new_state: Option<Value>,
}

impl RawError {
    fn into_message(self) -> String {
        match self {
            RawError::Structured { code, message } => match (code, message) {
                (Some(code), Some(message)) => format!("{}: {}", code, message),
                (None, Some(message)) => message,
                (Some(code), None) => code,
                (None, None) => "unknown error".to_string(),
            },
            RawError::Text(text) => text,
        }
    }
}

/// Decode one inbound text frame
pub fn decode(text: &str) -> Result<Inbound> {
    let raw: RawFrame = serde_json::from_str(text).map_err(|e| Error::protocol("decoding frame", e))?;

    let frame = match raw.kind.as_str() {
        "auth_required" => Inbound::AuthRequired {
            ha_version: raw.ha_version,
        },
        "auth_ok" => Inbound::AuthOk {
            ha_version: raw.ha_version,
        },
        "auth_invalid" => Inbound::AuthInvalid {
            message: raw.message.unwrap_or_else(|| "invalid access token".to_string()),
        },
        "result" => Inbound::Result {
            id: raw
                .id
                .ok_or_else(|| Error::Protocol("result frame without id".into()))?,
            success: raw.success.unwrap_or(true),
            result: raw.result,
            error: raw.error.map(RawError::into_message),
        },
        "event" => {
            let event = raw
                .event
                .ok_or_else(|| Error::Protocol("event frame without event".into()))?;
            Inbound::Event {
                id: raw.id,
                event: decode_event(event)?,
            }
        }
        _ => Inbound::Other { kind: raw.kind },
    };

    Ok(frame)
}

fn decode_event(event: RawEvent) -> Result<HubEvent> {
    if event.event_type != STATE_CHANGED {
        return Ok(HubEvent::Other {
            event_type: event.event_type,
        });
    }

    let data: StateChangedData =
        serde_json::from_value(event.data).map_err(|e| Error::protocol("decoding state_changed data", e))?;

    let new_state = match data.new_state {
        Some(value) => {
            let state = EntityState::from_json(value)?;
            if state.entity_id != data.entity_id {
                return Err(Error::Protocol(format!(
                    "state_changed for '{}' carries state of '{}'",
                    data.entity_id, state.entity_id
                )));
            }
            Some(state)
        }
        None => None,
    };

    Ok(HubEvent::StateChanged {
        entity_id: data.entity_id,
        new_state,
    })
}
