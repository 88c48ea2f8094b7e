// Operator-side teleoperation engine for fccs copters over UDP
//
// axis state -> emission scheduler -> transport session -> reply status

pub mod axis;
pub mod config;
pub mod controller;
pub mod messages;
pub mod reply;
pub mod runtime;
pub mod scheduler;
pub mod transport;
pub mod velocity;

pub use axis::{Axis, AxisState, Direction};
pub use config::{ConfigError, NamespaceSelection, SessionTarget};
pub use controller::TeleopController;
pub use messages::{Command, CommandEnvelope, CopterId, DecodeError, DeviceDescriptor};
pub use reply::{ReplyRecord, ReplyStatus};
pub use scheduler::EmissionScheduler;
pub use transport::{Endpoint, ReplyListener, TransportError, TransportSession};
pub use velocity::{SpeedSetting, VelocityVector};
