use crate::config::RobotConfig;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RobotStatus {
    Idle,
    Following,
    Stopped,
    Returning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotCommand {
    Follow,
    Stop,
    Return,
}

impl RobotCommand {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "follow" => Some(Self::Follow),
            "stop" => Some(Self::Stop),
            "return" => Some(Self::Return),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RobotCommand::Follow => "follow",
            RobotCommand::Stop => "stop",
            RobotCommand::Return => "return",
        }
    }

    fn target_status(&self) -> RobotStatus {
        match self {
            RobotCommand::Follow => RobotStatus::Following,
            RobotCommand::Stop => RobotStatus::Stopped,
            RobotCommand::Return => RobotStatus::Returning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RobotState {
    pub status: RobotStatus,
    pub battery: f64,
    /// Raw `action` value of the last control request, whatever its type.
    pub last_command: Option<Value>,
}

/// Bounded label for command metrics: the parsed command, `unknown` or `none`.
pub fn command_label(action: Option<&Value>) -> &'static str {
    match action {
        None => "none",
        Some(value) => value
            .as_str()
            .and_then(RobotCommand::parse)
            .map_or("unknown", |command| command.as_str()),
    }
}

/// Simulated rover. Commands only move the state machine; there is no motor
/// link behind it.
#[derive(Debug)]
pub struct Robot {
    state: Mutex<RobotState>,
    drain_per_poll: f64,
}

impl Robot {
    pub fn new(config: &RobotConfig) -> Self {
        Self {
            state: Mutex::new(RobotState {
                status: RobotStatus::Idle,
                battery: config.initial_battery,
                last_command: None,
            }),
            drain_per_poll: config.drain_per_poll,
        }
    }

    /// Unknown actions leave the status alone but are still recorded as the
    /// last command.
    pub fn apply(&self, action: Option<&Value>) -> RobotState {
        let mut state = self.state.lock();
        if let Some(command) = action.and_then(Value::as_str).and_then(RobotCommand::parse) {
            state.status = command.target_status();
        }
        state.last_command = action.cloned();
        tracing::info!(
            "Robot command {:?}, status is now {:?}",
            action,
            state.status
        );
        state.clone()
    }

    pub fn poll_status(&self) -> RobotState {
        let mut state = self.state.lock();
        if state.status == RobotStatus::Following {
            state.battery = (state.battery - self.drain_per_poll).max(0.0);
        }
        state.clone()
    }

    pub fn snapshot(&self) -> RobotState {
        self.state.lock().clone()
    }
}
