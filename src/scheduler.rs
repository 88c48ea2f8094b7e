// Fixed-rate cmd_vel emission
//
// One task per session at most. The velocity is read from the shared axis
// state on every tick, so direction changes show up on the next frame
// without restarting anything.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::axis::AxisState;
use crate::messages::{Command, CopterId};
use crate::transport::TransportSession;

/// Tick outcomes since the scheduler was created
#[derive(Debug, Default)]
pub struct EmissionStats {
    sent: AtomicU64,
    failed: AtomicU64,
}

impl EmissionStats {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

pub struct EmissionScheduler {
    period: Duration,
    handle: Option<JoinHandle<()>>,
    stats: Arc<EmissionStats>,
}

impl EmissionScheduler {
    pub fn new(rate_hz: u64) -> Self {
        Self {
            period: Duration::from_millis(1000 / rate_hz.clamp(1, 1000)),
            handle: None,
            stats: Arc::new(EmissionStats::default()),
        }
    }

    pub fn stats(&self) -> &EmissionStats {
        &self.stats
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start emitting unless a task is already running.
    /// Returns true if a new task was spawned.
    pub fn ensure_running(
        &mut self,
        state: Arc<Mutex<AxisState>>,
        session: Arc<TransportSession>,
        copter_id: CopterId,
    ) -> bool {
        if self.is_running() {
            return false;
        }

        let period = self.period;
        info!("cmd_vel emission started: every {}ms", period.as_millis());
        self.handle = Some(tokio::spawn(emit_loop(
            period,
            state,
            session,
            copter_id,
            Arc::clone(&self.stats),
        )));
        true
    }

    /// Stop emitting. Calling this while idle is fine.
    /// Returns true if a running task was stopped.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                info!("cmd_vel emission stopped");
                true
            }
            None => false,
        }
    }

    /// Like [`cancel`](Self::cancel), but returns only once the task is gone,
    /// so no tick can still be sending afterwards.
    pub async fn shutdown(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                // Cancelled (or already finished); either way the task has been dropped
                let _ = handle.await;
                info!("cmd_vel emission stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for EmissionScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn emit_loop(
    period: Duration,
    state: Arc<Mutex<AxisState>>,
    session: Arc<TransportSession>,
    copter_id: CopterId,
    stats: Arc<EmissionStats>,
) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut seq: u64 = 0;

    loop {
        tick.tick().await;

        // Fresh snapshot every tick, lock released before sending
        let velocity = state.lock().await.velocity();
        let envelope = Command::CmdVel(velocity).to_envelope(&copter_id);

        match session.send(&envelope).await {
            Ok(_) => {
                stats.sent.fetch_add(1, Ordering::Relaxed);
                debug!("cmd_vel #{} {:?}", seq, velocity);
            }
            // Keep going, the next tick carries the full state again
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!("cmd_vel #{} not sent: {}", seq, e);
            }
        }
        seq += 1;
    }
}
