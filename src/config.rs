// Rates, ports, namespaces and speed limits
use std::fmt;

// cmd_vel emission frequency while any axis is active
pub const EMIT_HZ: u64 = 10;

// Local UDP port, bound once for the whole process
pub const LOCAL_PORT: u16 = 12346;

// Remote hosts live under udp.<namespace>.<SERVICE_DOMAIN>
pub const SERVICE_DOMAIN: &str = "aviot.it";

// Known namespaces and their remote UDP ports
pub const NAMESPACE_PORTS: [(&str, u16); 2] = [("agri", 30000), ("protezionecivile", 30001)];

// Speed applied to every active axis (m/s linear, rad/s angular)
pub const DEFAULT_SPEED: f64 = 0.5;
pub const MAX_SPEED: f64 = 5.0;

// Presets the operator console steps through with +/-
pub const SPEED_STEPS: [f64; 5] = [0.1, 0.25, 0.5, 1.0, 2.0];

// Altitude (m) used by the console when none is given on the command line
pub const DEFAULT_TAKEOFF_ALTITUDE: f64 = 10.0;

// Prefix of every copter identifier on the wire
pub const COPTER_ID_PREFIX: &str = "fccs_";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Unknown namespace '{0}'")]
    UnknownNamespace(String),

    #[error("Invalid speed {0}: must be finite and greater than zero")]
    InvalidSpeed(f64),

    #[error("Device '{0}' has neither a usable MAC address nor a copter id")]
    MissingCopterId(String),
}

/// Namespace chosen by the bootstrap layer, with an explicit endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceSelection {
    pub namespace: String,
    pub endpoint_host: String,
    pub port: u16,
}

impl NamespaceSelection {
    /// Look a namespace up in the built-in port table
    pub fn lookup(namespace: &str) -> Result<Self, ConfigError> {
        let port = NAMESPACE_PORTS
            .iter()
            .find(|(name, _)| *name == namespace)
            .map(|&(_, port)| port)
            .ok_or_else(|| ConfigError::UnknownNamespace(namespace.to_string()))?;

        Ok(Self {
            namespace: namespace.to_string(),
            endpoint_host: format!("udp.{}.{}", namespace, SERVICE_DOMAIN),
            port,
        })
    }
}

/// Where every datagram of a session goes. Fixed once the session opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    namespace: String,
    host: String,
    port: u16,
}

impl SessionTarget {
    pub fn new(namespace: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            namespace: namespace.into(),
            host: host.into(),
            port,
        }
    }

    /// Resolve a namespace name through the built-in table
    pub fn resolve(namespace: &str) -> Result<Self, ConfigError> {
        NamespaceSelection::lookup(namespace).map(Self::from)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl From<NamespaceSelection> for SessionTarget {
    fn from(sel: NamespaceSelection) -> Self {
        Self::new(sel.namespace, sel.endpoint_host, sel.port)
    }
}

impl fmt::Display for SessionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.host, self.port, self.namespace)
    }
}
