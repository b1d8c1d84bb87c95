//! IR command sink with child-process backends.
//!
//! The fixture only listens; a command either goes out or it doesn't, and
//! nothing comes back. Backends:
//!   1. lirc   - irsend SEND_ONCE <device> <key> (default)
//!   2. script - a user-configured command, key appended as the argument
//! Both spawn a child per command; transport-level retries belong to the
//! transport, not to this layer.

use std::fmt;
use std::process::{Command as Proc, Stdio};

use crate::state::{Channel, Direction};

/// Atomic unit of physical effect: exactly one step on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub channel: Channel,
    pub direction: Direction,
}

impl Command {
    pub fn new(channel: Channel, direction: Direction) -> Self {
        Self { channel, direction }
    }

    /// The learned IR key name for this step.
    pub fn key(self) -> &'static str {
        match (self.channel, self.direction) {
            (Channel::White, Direction::Up) => "white_up",
            (Channel::White, Direction::Down) => "white_down",
            (Channel::Red, Direction::Up) => "red_up",
            (Channel::Red, Direction::Down) => "red_down",
            (Channel::Green, Direction::Up) => "green_up",
            (Channel::Green, Direction::Down) => "green_down",
            (Channel::Blue, Direction::Up) => "blue_up",
            (Channel::Blue, Direction::Down) => "blue_down",
        }
    }
}

/// Everything the remote can emit: channel steps plus the dedicated
/// lightning-flash key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrKey {
    Step(Command),
    Lightning,
}

impl IrKey {
    pub fn name(self) -> &'static str {
        match self {
            IrKey::Step(cmd) => cmd.key(),
            IrKey::Lightning => "weather_lightning",
        }
    }
}

/// Error type for IR delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Spawn,
    Exit,
    NoBackend,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spawn => write!(f, "Failed to spawn IR transport"),
            Error::Exit => write!(f, "IR transport exited with failure"),
            Error::NoBackend => write!(f, "No usable IR backend"),
        }
    }
}

impl std::error::Error for Error {}

/// The seam between the reconciliation engine and the transport.
pub trait Sink {
    fn send(&mut self, key: IrKey) -> Result<(), Error>;
}

/// IR backend settings, from the [lighting] config section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrSettings {
    /// "lirc" or "script".
    pub backend: String,
    /// LIRC remote name.
    pub device: String,
    /// External command for the script backend.
    pub command: Option<String>,
}

impl Default for IrSettings {
    fn default() -> Self {
        Self {
            backend: "lirc".to_string(),
            device: "hygger_hg016".to_string(),
            command: None,
        }
    }
}

enum Backend {
    Lirc { device: String },
    Script { program: String },
}

/// Unified sink state over the configured backend.
pub struct IrState {
    backend: Backend,
}

impl IrState {
    /// Initialize the configured backend. The lirc probe runs
    /// `irsend --version` once so a missing daemon fails at startup, not
    /// on the first reconcile.
    pub fn init(settings: &IrSettings) -> Result<Self, Error> {
        match settings.backend.as_str() {
            "script" => {
                let program = settings.command.clone().ok_or(Error::NoBackend)?;
                Ok(Self {
                    backend: Backend::Script { program },
                })
            }
            "lirc" => {
                let probe = Proc::new("irsend")
                    .arg("--version")
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status();
                match probe {
                    Ok(status) if status.success() => Ok(Self {
                        backend: Backend::Lirc {
                            device: settings.device.clone(),
                        },
                    }),
                    Ok(_) => Err(Error::Exit),
                    Err(_) => Err(Error::NoBackend),
                }
            }
            _ => Err(Error::NoBackend),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Lirc { .. } => "lirc",
            Backend::Script { .. } => "script",
        }
    }
}

impl Sink for IrState {
    fn send(&mut self, key: IrKey) -> Result<(), Error> {
        let status = match &self.backend {
            Backend::Lirc { device } => Proc::new("irsend")
                .args(["SEND_ONCE", device, key.name()])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status(),
            Backend::Script { program } => Proc::new(program)
                .arg(key.name())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status(),
        };

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(_) => Err(Error::Exit),
            Err(_) => Err(Error::Spawn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_keys_match_learned_names() {
        let cases = [
            (Channel::White, Direction::Up, "white_up"),
            (Channel::White, Direction::Down, "white_down"),
            (Channel::Red, Direction::Up, "red_up"),
            (Channel::Red, Direction::Down, "red_down"),
            (Channel::Green, Direction::Up, "green_up"),
            (Channel::Green, Direction::Down, "green_down"),
            (Channel::Blue, Direction::Up, "blue_up"),
            (Channel::Blue, Direction::Down, "blue_down"),
        ];
        for (channel, direction, key) in cases {
            assert_eq!(Command::new(channel, direction).key(), key);
        }
        assert_eq!(IrKey::Lightning.name(), "weather_lightning");
    }

    #[test]
    fn script_backend_requires_a_command() {
        let settings = IrSettings {
            backend: "script".to_string(),
            command: None,
            ..IrSettings::default()
        };
        assert!(matches!(IrState::init(&settings), Err(Error::NoBackend)));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let settings = IrSettings {
            backend: "telepathy".to_string(),
            ..IrSettings::default()
        };
        assert!(matches!(IrState::init(&settings), Err(Error::NoBackend)));
    }

    #[test]
    fn script_backend_sends_through_child_process() {
        let settings = IrSettings {
            backend: "script".to_string(),
            command: Some("true".to_string()),
            ..IrSettings::default()
        };
        let mut sink = IrState::init(&settings).unwrap();
        assert_eq!(sink.backend_name(), "script");
        assert!(sink.send(IrKey::Lightning).is_ok());
    }

    #[test]
    fn script_backend_surfaces_child_failure() {
        let settings = IrSettings {
            backend: "script".to_string(),
            command: Some("false".to_string()),
            ..IrSettings::default()
        };
        let mut sink = IrState::init(&settings).unwrap();
        assert_eq!(
            sink.send(IrKey::Step(Command::new(Channel::Red, Direction::Up))),
            Err(Error::Exit)
        );
    }
}
