// Operator-facing controller for one copter session
//
// Ties the axis state, the emission scheduler, the transport session and the
// reply status together. Dropping the controller stops emission and detaches
// the reply listener.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::axis::{Axis, AxisState, Direction};
use crate::config::EMIT_HZ;
use crate::messages::{Command, CopterId};
use crate::reply::ReplyStatus;
use crate::scheduler::EmissionScheduler;
use crate::transport::{ReplyListener, TransportError, TransportSession};
use crate::velocity::{SpeedSetting, VelocityVector};

pub struct TeleopController {
    state: Arc<Mutex<AxisState>>,
    scheduler: EmissionScheduler,
    session: Arc<TransportSession>,
    copter_id: CopterId,
    listener: Option<ReplyListener>,
    status: ReplyStatus,
}

impl TeleopController {
    /// Enter the controller for `copter_id`, emitting at [`EMIT_HZ`]
    pub fn enter(session: TransportSession, copter_id: CopterId, speed: SpeedSetting) -> Self {
        Self::with_rate(session, copter_id, speed, EMIT_HZ)
    }

    pub fn with_rate(
        session: TransportSession,
        copter_id: CopterId,
        speed: SpeedSetting,
        rate_hz: u64,
    ) -> Self {
        let listener = match session.await_one_reply() {
            Ok(listener) => Some(listener),
            Err(e) => {
                warn!("No reply listener for this session: {}", e);
                None
            }
        };

        info!(
            "Controlling {} via {}, speed {}",
            copter_id,
            session.target(),
            speed.get()
        );

        Self {
            state: Arc::new(Mutex::new(AxisState::new(speed))),
            scheduler: EmissionScheduler::new(rate_hz),
            session: Arc::new(session),
            copter_id,
            listener,
            status: ReplyStatus::new(),
        }
    }

    /// Press a directional control; see [`AxisState::press`]
    pub async fn press_axis(&mut self, axis: Axis, direction: Direction) -> Direction {
        let now = self.state.lock().await.press(axis, direction);
        self.scheduler.ensure_running(
            Arc::clone(&self.state),
            Arc::clone(&self.session),
            self.copter_id.clone(),
        );
        now
    }

    /// Control released. Emission keeps running until [`stop`](Self::stop).
    pub async fn release_axis(&mut self, axis: Axis) {
        self.state.lock().await.release(axis);
    }

    /// Neutralize every axis and stop emitting.
    ///
    /// If emission was running, one last all-zero cmd_vel goes out once the
    /// emission task is gone, so it is always the final frame.
    pub async fn stop(&mut self) {
        self.state.lock().await.neutralize();

        if self.scheduler.shutdown().await {
            let halt = Command::CmdVel(VelocityVector::zero());
            if let Err(e) = self.send_command(&halt).await {
                warn!("Final zero cmd_vel not sent: {}", e);
            }
        }
    }

    pub async fn set_speed(&mut self, speed: SpeedSetting) {
        self.state.lock().await.set_speed(speed);
        info!("Speed: {}", speed.get());
    }

    pub async fn speed(&self) -> SpeedSetting {
        self.state.lock().await.speed()
    }

    pub async fn velocity(&self) -> VelocityVector {
        self.state.lock().await.velocity()
    }

    pub async fn direction(&self, axis: Axis) -> Direction {
        self.state.lock().await.direction(axis)
    }

    pub fn is_emitting(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Fire-once send of a discrete command
    pub async fn send_command(&self, command: &Command) -> Result<usize, TransportError> {
        let envelope = command.to_envelope(&self.copter_id);
        self.session.send(&envelope).await
    }

    pub async fn arm(&self) -> Result<usize, TransportError> {
        self.send_command(&Command::Arm).await
    }

    pub async fn land(&self, latitude: f64, longitude: f64) -> Result<usize, TransportError> {
        self.send_command(&Command::Land {
            latitude,
            longitude,
        })
        .await
    }

    pub async fn takeoff(
        &self,
        latitude: f64,
        longitude: f64,
        altitude: f64,
    ) -> Result<usize, TransportError> {
        self.send_command(&Command::Takeoff {
            latitude,
            longitude,
            altitude,
        })
        .await
    }

    /// Non-blocking check for the session's reply. Returns true if the status changed.
    pub fn poll_reply(&mut self) -> bool {
        let Some(outcome) = self.listener.as_mut().and_then(ReplyListener::try_recv) else {
            return false;
        };
        self.listener = None;
        self.status.apply(outcome)
    }

    /// Wait up to `limit` for the reply. Returns true if the status changed.
    pub async fn wait_reply(&mut self, limit: Duration) -> bool {
        let Some(listener) = self.listener.as_mut() else {
            return false;
        };

        match listener.recv_timeout(limit).await {
            Err(TransportError::Timeout(_)) => false,
            outcome => {
                self.listener = None;
                self.status.apply(outcome)
            }
        }
    }

    pub fn status(&self) -> &ReplyStatus {
        &self.status
    }

    pub fn copter_id(&self) -> &CopterId {
        &self.copter_id
    }

    /// Leave the controller, cleaning up explicitly
    pub async fn leave(mut self) {
        self.stop().await;
        self.listener = None;
    }
}

impl Drop for TeleopController {
    fn drop(&mut self) {
        self.scheduler.cancel();
        if self.listener.take().is_some() {
            info!("Reply listener detached");
        }
    }
}
