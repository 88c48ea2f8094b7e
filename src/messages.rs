// Wire envelope and the commands carried in it
//
// Every datagram is one JSON document: {"event": <name>, "data": {...}}

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::{COPTER_ID_PREFIX, ConfigError};
use crate::velocity::{Vector3, VelocityVector};

/// Failure to turn received bytes into an envelope or payload
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Envelope has an empty event name")]
    EmptyEvent,

    #[error("Data of event '{0}' is not an object")]
    DataNotObject(String),

    #[error("Unexpected payload for event '{event}': {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Generic `{event, data}` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub event: String,
    pub data: Value,
}

impl CommandEnvelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Serialize into one self-contained datagram
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse one datagram. `event` must be non-empty and `data` an object.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let envelope: Self = serde_json::from_slice(bytes).map_err(DecodeError::Malformed)?;

        if envelope.event.is_empty() {
            return Err(DecodeError::EmptyEvent);
        }
        if !envelope.data.is_object() {
            return Err(DecodeError::DataNotObject(envelope.event));
        }
        Ok(envelope)
    }

    /// Interpret `data` as a typed payload
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        serde_json::from_value(self.data.clone()).map_err(|source| DecodeError::Payload {
            event: self.event.clone(),
            source,
        })
    }
}

/// Identifier the remote side uses for a copter, e.g. `fccs_b827eb0a1b2c`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CopterId(String);

impl CopterId {
    /// Derive from a hardware address: separators stripped, lower-cased, prefixed
    pub fn from_mac(mac: &str) -> Option<Self> {
        let hex: String = mac
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .map(|c| c.to_ascii_lowercase())
            .collect();

        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(format!("{}{}", COPTER_ID_PREFIX, hex)))
    }

    /// Accept an id that already carries the prefix
    pub fn parse(id: &str) -> Option<Self> {
        let id = id.trim();
        if id.len() > COPTER_ID_PREFIX.len() && id.starts_with(COPTER_ID_PREFIX) {
            Some(Self(id.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CopterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Device record handed over by the device listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub device_id: String,
    pub current_name: String,
    #[serde(default)]
    pub copter_id: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
}

impl DeviceDescriptor {
    /// The MAC address wins; a prefixed `copter_id` is the fallback
    pub fn copter_id(&self) -> Result<CopterId, ConfigError> {
        self.mac_address
            .as_deref()
            .and_then(CopterId::from_mac)
            .or_else(|| self.copter_id.as_deref().and_then(CopterId::parse))
            .ok_or_else(|| ConfigError::MissingCopterId(self.current_name.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmPayload {
    pub copter_id: CopterId,
}

/// Payload of `land` and `takeoff`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionPayload {
    pub copter_id: CopterId,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmdVelPayload {
    pub copter_id: CopterId,
    pub linear: Vector3,
    pub angular: Vector3,
}

/// Everything the operator can send
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Arm,
    Land { latitude: f64, longitude: f64 },
    Takeoff { latitude: f64, longitude: f64, altitude: f64 },
    CmdVel(VelocityVector),
    SetMode,
    Set,
    Delete,
    Reset,
    /// Operator-typed event; without data only the copter id is sent
    Custom { event: String, data: Option<Value> },
}

impl Command {
    /// Free-form command from operator text; `data`, if given, must be a JSON object
    pub fn custom(event: &str, data: Option<&str>) -> Result<Self, DecodeError> {
        let event = event.trim();
        if event.is_empty() {
            return Err(DecodeError::EmptyEvent);
        }

        let data = match data {
            Some(text) => {
                let value: Value = serde_json::from_str(text).map_err(DecodeError::Malformed)?;
                if !value.is_object() {
                    return Err(DecodeError::DataNotObject(event.to_string()));
                }
                Some(value)
            }
            None => None,
        };

        Ok(Command::Custom {
            event: event.to_string(),
            data,
        })
    }

    pub fn event(&self) -> &str {
        match self {
            Command::Arm => "arm",
            Command::Land { .. } => "land",
            Command::Takeoff { .. } => "takeoff",
            Command::CmdVel(_) => "cmd_vel",
            Command::SetMode => "set_mode",
            Command::Set => "set",
            Command::Delete => "delete",
            Command::Reset => "reset",
            Command::Custom { event, .. } => event.as_str(),
        }
    }

    pub fn to_envelope(&self, copter_id: &CopterId) -> CommandEnvelope {
        let data = match self {
            Command::Arm | Command::SetMode | Command::Set | Command::Delete | Command::Reset => {
                json!({ "copterId": copter_id })
            }
            Command::Land {
                latitude,
                longitude,
            } => json!({
                "copterId": copter_id,
                "latitude": latitude,
                "longitude": longitude,
                "altitude": 0,
            }),
            Command::Takeoff {
                latitude,
                longitude,
                altitude,
            } => json!({
                "copterId": copter_id,
                "latitude": latitude,
                "longitude": longitude,
                "altitude": altitude,
            }),
            Command::CmdVel(v) => json!({
                "copterId": copter_id,
                "linear": v.linear,
                "angular": v.angular,
            }),
            Command::Custom { data: Some(data), .. } => data.clone(),
            Command::Custom { data: None, .. } => json!({ "copterId": copter_id }),
        };

        CommandEnvelope::new(self.event(), data)
    }
}
