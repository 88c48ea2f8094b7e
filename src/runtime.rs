// Keyboard operator console
//
// Axis keys toggle: press once to move, press again to stop that axis.
// On terminals that report key releases, releasing an axis key neutralizes it.
// Key repeats never toggle.

use std::time::Duration;

use crossterm::{
    event::{
        self, Event, KeyCode, KeyEvent, KeyEventKind, KeyboardEnhancementFlags,
        PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement},
};
use tracing::{info, warn};

use crate::axis::{Axis, Direction};
use crate::config::{SPEED_STEPS, SessionTarget};
use crate::controller::TeleopController;
use crate::messages::{Command, CopterId};
use crate::transport::{Endpoint, TransportSession};
use crate::velocity::SpeedSetting;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

// Key poll timeout, also the reply poll cadence
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Everything the console needs to open a session
#[derive(Debug, Clone)]
pub struct ConsoleOptions {
    pub target: SessionTarget,
    pub copter_id: CopterId,
    pub speed: SpeedSetting,
    pub local_port: u16,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// What a key does
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Axis(Axis, Direction),
    Stop,
    SpeedUp,
    SpeedDown,
    Arm,
    Takeoff,
    Land,
    SetMode,
    Set,
    Delete,
    Reset,
    Quit,
}

pub fn key_action(code: KeyCode) -> Option<Action> {
    let action = match code {
        KeyCode::Char('w') => Action::Axis(Axis::LinearX, Direction::Positive),
        KeyCode::Char('s') => Action::Axis(Axis::LinearX, Direction::Negative),
        KeyCode::Char('a') => Action::Axis(Axis::LinearY, Direction::Positive),
        KeyCode::Char('d') => Action::Axis(Axis::LinearY, Direction::Negative),
        KeyCode::Char('r') => Action::Axis(Axis::LinearZ, Direction::Positive),
        KeyCode::Char('f') => Action::Axis(Axis::LinearZ, Direction::Negative),
        KeyCode::Char('j') => Action::Axis(Axis::AngularX, Direction::Positive),
        KeyCode::Char('l') => Action::Axis(Axis::AngularX, Direction::Negative),
        KeyCode::Char('i') => Action::Axis(Axis::AngularY, Direction::Positive),
        KeyCode::Char('k') => Action::Axis(Axis::AngularY, Direction::Negative),
        KeyCode::Char('z') => Action::Axis(Axis::AngularZ, Direction::Positive),
        KeyCode::Char('x') => Action::Axis(Axis::AngularZ, Direction::Negative),
        KeyCode::Char(' ') => Action::Stop,
        KeyCode::Char('+') | KeyCode::Char('=') => Action::SpeedUp,
        KeyCode::Char('-') => Action::SpeedDown,
        KeyCode::Char('1') => Action::Arm,
        KeyCode::Char('2') => Action::Takeoff,
        KeyCode::Char('3') => Action::Land,
        KeyCode::Char('m') => Action::SetMode,
        KeyCode::Char('4') => Action::Set,
        KeyCode::Char('5') => Action::Delete,
        KeyCode::Char('0') => Action::Reset,
        KeyCode::Char('q') | KeyCode::Esc => Action::Quit,
        _ => return None,
    };
    Some(action)
}

/// Next preset above or below `current`; stays put at either end
pub fn step_speed(current: SpeedSetting, up: bool) -> SpeedSetting {
    let current = current.get();
    let next = if up {
        SPEED_STEPS.iter().copied().find(|&s| s > current)
    } else {
        SPEED_STEPS.iter().rev().copied().find(|&s| s < current)
    };

    next.and_then(|s| SpeedSetting::new(s).ok())
        .unwrap_or_else(|| SpeedSetting::new(current).unwrap_or_default())
}

pub async fn run(options: ConsoleOptions) -> Result<(), BoxError> {
    let endpoint = Endpoint::bind(options.local_port).await?;
    let session = TransportSession::open(endpoint, options.target.clone()).await?;
    let mut controller =
        TeleopController::enter(session, options.copter_id.clone(), options.speed);

    info!("Controls: WASD=move, R/F=up/down, Z/X=yaw, I/K=pitch, J/L=roll");
    info!("          SPACE=stop, +/-=speed, 1=arm, 2=takeoff, 3=land, M=set mode, 4=set, 5=delete, 0=reset, Q=quit");
    info!("Status: {}", controller.status().render());

    let terminal = RawTerminal::enter(Crossterm)?;
    let result = run_console(&mut controller, &options).await;
    drop(terminal);

    // Mandatory cleanup even when the loop failed
    controller.leave().await;
    result
}

/// Terminal mode switches the console needs
trait TerminalModes {
    fn enable_raw(&mut self) -> std::io::Result<()>;
    fn disable_raw(&mut self) -> std::io::Result<()>;
    fn reports_releases(&mut self) -> bool;
    fn push_release_flags(&mut self) -> std::io::Result<()>;
    fn pop_release_flags(&mut self) -> std::io::Result<()>;
}

struct Crossterm;

impl TerminalModes for Crossterm {
    fn enable_raw(&mut self) -> std::io::Result<()> {
        enable_raw_mode()
    }

    fn disable_raw(&mut self) -> std::io::Result<()> {
        disable_raw_mode()
    }

    fn reports_releases(&mut self) -> bool {
        supports_keyboard_enhancement().unwrap_or(false)
    }

    fn push_release_flags(&mut self) -> std::io::Result<()> {
        execute!(
            std::io::stdout(),
            PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
        )
    }

    fn pop_release_flags(&mut self) -> std::io::Result<()> {
        execute!(std::io::stdout(), PopKeyboardEnhancementFlags)
    }
}

/// Raw mode (plus key release reporting where supported) for as long as it lives.
/// Dropping it always restores the terminal.
struct RawTerminal<T: TerminalModes> {
    modes: T,
    enhanced: bool,
}

impl<T: TerminalModes> RawTerminal<T> {
    fn enter(mut modes: T) -> std::io::Result<Self> {
        modes.enable_raw()?;
        let mut terminal = Self {
            modes,
            enhanced: false,
        };

        if terminal.modes.reports_releases() {
            match terminal.modes.push_release_flags() {
                Ok(()) => terminal.enhanced = true,
                Err(e) => warn!("Key release reporting unavailable: {}", e),
            }
        }
        Ok(terminal)
    }
}

impl<T: TerminalModes> Drop for RawTerminal<T> {
    fn drop(&mut self) {
        if self.enhanced {
            if let Err(e) = self.modes.pop_release_flags() {
                warn!("Failed to restore keyboard flags: {}", e);
            }
        }
        if let Err(e) = self.modes.disable_raw() {
            warn!("Failed to leave raw mode: {}", e);
        }
    }
}

async fn run_console(
    controller: &mut TeleopController,
    options: &ConsoleOptions,
) -> Result<(), BoxError> {
    loop {
        if event::poll(POLL_INTERVAL)? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let Some(action) = key_action(code) else {
                    continue;
                };

                match (kind, action) {
                    (KeyEventKind::Release, Action::Axis(axis, _)) => {
                        controller.release_axis(axis).await;
                    }
                    (KeyEventKind::Press, Action::Quit) => break,
                    (KeyEventKind::Press, action) => {
                        handle_action(controller, options, action).await;
                    }
                    _ => {}
                }
            }
        }

        if controller.poll_reply() {
            info!("Status: {}", controller.status().render());
        }
    }

    Ok(())
}

/// Command sent by a discrete key, `None` for motion and console keys
pub fn discrete_command(action: Action, options: &ConsoleOptions) -> Option<Command> {
    let command = match action {
        Action::Arm => Command::Arm,
        Action::Takeoff => Command::Takeoff {
            latitude: options.latitude,
            longitude: options.longitude,
            altitude: options.altitude,
        },
        Action::Land => Command::Land {
            latitude: options.latitude,
            longitude: options.longitude,
        },
        Action::SetMode => Command::SetMode,
        Action::Set => Command::Set,
        Action::Delete => Command::Delete,
        Action::Reset => Command::Reset,
        Action::Axis(..) | Action::Stop | Action::SpeedUp | Action::SpeedDown | Action::Quit => {
            return None;
        }
    };
    Some(command)
}

async fn handle_action(controller: &mut TeleopController, options: &ConsoleOptions, action: Action) {
    match action {
        Action::Axis(axis, direction) => {
            let now = controller.press_axis(axis, direction).await;
            info!("{:?} -> {:?}", axis, now);
        }
        Action::Stop => {
            controller.stop().await;
            info!("Stopped");
        }
        Action::SpeedUp | Action::SpeedDown => {
            let speed = step_speed(controller.speed().await, action == Action::SpeedUp);
            controller.set_speed(speed).await;
        }
        _ => {
            let Some(command) = discrete_command(action, options) else {
                return;
            };
            match controller.send_command(&command).await {
                Ok(_) => info!("Sent {}", command.event()),
                Err(e) => warn!("{}", e),
            }
        }
    }
}

/// Send one command, wait for the reply and return the rendered status
pub async fn send_once(
    options: &ConsoleOptions,
    command: Command,
    reply_timeout: Duration,
) -> Result<String, BoxError> {
    let endpoint = Endpoint::bind(options.local_port).await?;
    let session = TransportSession::open(endpoint, options.target.clone()).await?;
    let mut controller =
        TeleopController::enter(session, options.copter_id.clone(), options.speed);

    controller.send_command(&command).await?;
    info!("Sent {}, waiting up to {:?} for a reply", command.event(), reply_timeout);

    if !controller.wait_reply(reply_timeout).await {
        warn!("No usable reply within {:?}", reply_timeout);
    }
    let status = controller.status().render();
    controller.leave().await;
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speed(v: f64) -> SpeedSetting {
        SpeedSetting::new(v).unwrap()
    }

    #[test]
    fn test_axis_keys_cover_every_axis_both_ways() {
        let keys = "wsadrfjlikzx";
        for axis in Axis::ALL {
            for dir in [Direction::Positive, Direction::Negative] {
                let bound = keys
                    .chars()
                    .any(|c| key_action(KeyCode::Char(c)) == Some(Action::Axis(axis, dir)));
                assert!(bound, "{:?} {:?} has no key", axis, dir);
            }
        }
    }

    #[test]
    fn test_control_keys() {
        assert_eq!(key_action(KeyCode::Char(' ')), Some(Action::Stop));
        assert_eq!(key_action(KeyCode::Esc), Some(Action::Quit));
        assert_eq!(key_action(KeyCode::Char('2')), Some(Action::Takeoff));
        assert_eq!(key_action(KeyCode::Char('4')), Some(Action::Set));
        assert_eq!(key_action(KeyCode::Char('5')), Some(Action::Delete));
        assert_eq!(key_action(KeyCode::Char('?')), None);
    }

    #[test]
    fn test_speed_steps() {
        assert_eq!(step_speed(speed(0.5), true).get(), 1.0);
        assert_eq!(step_speed(speed(0.5), false).get(), 0.25);
        assert_eq!(step_speed(speed(0.3), true).get(), 0.5);
        assert_eq!(step_speed(speed(0.1), false).get(), 0.1);
        assert_eq!(step_speed(speed(2.0), true).get(), 2.0);
    }

    fn options(port: u16) -> ConsoleOptions {
        ConsoleOptions {
            target: SessionTarget::new("test", "127.0.0.1", port),
            copter_id: CopterId::from_mac("01:02:03:04:05:06").unwrap(),
            speed: SpeedSetting::default(),
            local_port: 0,
            latitude: 45.0,
            longitude: 9.0,
            altitude: 40.0,
        }
    }

    #[derive(Default)]
    struct FakeTerminal {
        log: std::sync::Arc<std::sync::Mutex<Vec<&'static str>>>,
        releases: bool,
        fail_raw: bool,
        fail_push: bool,
        fail_pop: bool,
    }

    fn outcome(fail: bool) -> std::io::Result<()> {
        if fail {
            Err(std::io::Error::other("terminal refused"))
        } else {
            Ok(())
        }
    }

    impl TerminalModes for FakeTerminal {
        fn enable_raw(&mut self) -> std::io::Result<()> {
            self.log.lock().unwrap().push("raw on");
            outcome(self.fail_raw)
        }

        fn disable_raw(&mut self) -> std::io::Result<()> {
            self.log.lock().unwrap().push("raw off");
            Ok(())
        }

        fn reports_releases(&mut self) -> bool {
            self.releases
        }

        fn push_release_flags(&mut self) -> std::io::Result<()> {
            self.log.lock().unwrap().push("push");
            outcome(self.fail_push)
        }

        fn pop_release_flags(&mut self) -> std::io::Result<()> {
            self.log.lock().unwrap().push("pop");
            outcome(self.fail_pop)
        }
    }

    #[test]
    fn test_terminal_restored_when_flags_fail() {
        // Push fails: nothing to pop, raw mode still left
        let fake = FakeTerminal {
            releases: true,
            fail_push: true,
            ..Default::default()
        };
        let log = std::sync::Arc::clone(&fake.log);
        drop(RawTerminal::enter(fake).unwrap());
        assert_eq!(*log.lock().unwrap(), ["raw on", "push", "raw off"]);

        // Pop fails: raw mode still left
        let fake = FakeTerminal {
            releases: true,
            fail_pop: true,
            ..Default::default()
        };
        let log = std::sync::Arc::clone(&fake.log);
        drop(RawTerminal::enter(fake).unwrap());
        assert_eq!(*log.lock().unwrap(), ["raw on", "push", "pop", "raw off"]);

        // No release reporting: flags never touched
        let fake = FakeTerminal::default();
        let log = std::sync::Arc::clone(&fake.log);
        drop(RawTerminal::enter(fake).unwrap());
        assert_eq!(*log.lock().unwrap(), ["raw on", "raw off"]);
    }

    #[test]
    fn test_raw_mode_failure_leaves_nothing_to_restore() {
        let fake = FakeTerminal {
            releases: true,
            fail_raw: true,
            ..Default::default()
        };
        let log = std::sync::Arc::clone(&fake.log);
        assert!(RawTerminal::enter(fake).is_err());
        assert_eq!(*log.lock().unwrap(), ["raw on"]);
    }

    #[test]
    fn test_every_panel_command_has_a_key() {
        let opts = options(30000);
        let sent: Vec<String> = "1234m0"
            .chars()
            .filter_map(|c| key_action(KeyCode::Char(c)))
            .filter_map(|action| discrete_command(action, &opts))
            .map(|cmd| cmd.event().to_string())
            .collect();
        assert_eq!(sent, ["arm", "takeoff", "land", "set", "set_mode", "reset"]);

        assert_eq!(
            discrete_command(Action::Delete, &opts),
            Some(Command::Delete)
        );
        assert_eq!(
            discrete_command(Action::Takeoff, &opts),
            Some(Command::Takeoff {
                latitude: 45.0,
                longitude: 9.0,
                altitude: 40.0,
            })
        );
        assert_eq!(discrete_command(Action::Stop, &opts), None);
        assert_eq!(discrete_command(Action::Quit, &opts), None);
    }

    #[tokio::test]
    async fn test_send_once_custom_event_with_data() {
        let remote = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let opts = options(remote.local_addr().unwrap().port());
        let command = Command::custom("goto", Some(r#"{"altitude":25}"#)).unwrap();

        send_once(&opts, command, Duration::from_millis(50))
            .await
            .unwrap();

        let mut buf = [0u8; 1024];
        let (len, _) = remote.recv_from(&mut buf).await.unwrap();
        let envelope = crate::messages::CommandEnvelope::decode(&buf[..len]).unwrap();
        assert_eq!(envelope.event, "goto");
        assert_eq!(envelope.data, serde_json::json!({ "altitude": 25 }));
    }

    #[tokio::test]
    async fn test_send_once_without_reply_reports_connected() {
        let remote = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let options = options(remote.local_addr().unwrap().port());

        let status = send_once(&options, Command::SetMode, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(status, "Connected");

        let mut buf = [0u8; 1024];
        let (len, _) = remote.recv_from(&mut buf).await.unwrap();
        let envelope = crate::messages::CommandEnvelope::decode(&buf[..len]).unwrap();
        assert_eq!(envelope.event, "set_mode");
    }
}
