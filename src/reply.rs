// Reply record and the status line shown to the operator

use std::net::SocketAddr;

use chrono::{Local, NaiveDateTime};
use tracing::warn;

use crate::messages::CommandEnvelope;
use crate::transport::TransportError;

/// Status shown until the first reply arrives
pub const AWAITING_REPLY: &str = "Connected";

/// Client-side timestamp format of the status
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// First decoded datagram of a session, with its sender
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyRecord {
    pub envelope: CommandEnvelope,
    pub from: SocketAddr,
}

impl ReplyRecord {
    pub fn new(envelope: CommandEnvelope, from: SocketAddr) -> Self {
        Self { envelope, from }
    }
}

/// Holds at most one reply per session
#[derive(Debug, Clone, Default)]
pub struct ReplyStatus {
    record: Option<ReplyRecord>,
}

impl ReplyStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a listener outcome. Returns true if the status changed.
    ///
    /// Failures are logged and leave the status as it was; a reply that
    /// arrives after one is already recorded is ignored.
    pub fn apply(&mut self, outcome: Result<ReplyRecord, TransportError>) -> bool {
        match outcome {
            Ok(record) if self.record.is_none() => {
                self.record = Some(record);
                true
            }
            Ok(record) => {
                warn!(
                    "Ignoring extra reply '{}' from {}",
                    record.envelope.event, record.from
                );
                false
            }
            Err(e) => {
                warn!("Reply not usable, keeping status: {}", e);
                false
            }
        }
    }

    pub fn record(&self) -> Option<&ReplyRecord> {
        self.record.as_ref()
    }

    /// Render with the current local time
    pub fn render(&self) -> String {
        self.render_at(Local::now().naive_local())
    }

    pub fn render_at(&self, now: NaiveDateTime) -> String {
        let Some(record) = &self.record else {
            return AWAITING_REPLY.to_string();
        };

        format!(
            "Received {}\n{}\nfrom {}\nat {}",
            record.envelope.event,
            record.envelope.data,
            record.from,
            now.format(TIMESTAMP_FORMAT)
        )
    }
}
