// Message types shared by the motion loop, the command bridge and teleop

use serde::{Deserialize, Serialize};

use crate::control::pid::PidGains;
use crate::robot::leg::{JOINTS_PER_LEG, LEG_COUNT};

/// High-level behaviour of the robot. Stored as a `u8` in the shared command record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RobotMode {
    #[default]
    Idle = 0,
    MoveForward = 1,
    MoveBackward = 2,
    RotateLeft = 3,
    RotateRight = 4,
    LayDown = 5,
    LaidDown = 6,
    StandUp = 7,
    Balance = 8,
    Dance = 9,
}

impl RobotMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        let mode = match value {
            0 => RobotMode::Idle,
            1 => RobotMode::MoveForward,
            2 => RobotMode::MoveBackward,
            3 => RobotMode::RotateLeft,
            4 => RobotMode::RotateRight,
            5 => RobotMode::LayDown,
            6 => RobotMode::LaidDown,
            7 => RobotMode::StandUp,
            8 => RobotMode::Balance,
            9 => RobotMode::Dance,
            _ => return None,
        };
        Some(mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum GaitPattern {
    #[default]
    Tripod = 0,
    Wave = 1,
    Ripple = 2,
}

impl GaitPattern {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(GaitPattern::Tripod),
            1 => Some(GaitPattern::Wave),
            2 => Some(GaitPattern::Ripple),
            _ => None,
        }
    }
}

// Command from teleop/phone -> runtime
// JSON form: {"cmd":"forward"}, {"cmd":"gait","pattern":"wave"}, ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum RobotCommand {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    Stand,
    LayDown,
    Dance,
    Balance,
    Gait { pattern: GaitPattern },
    Calibrate,
    Autotune,
    SetBalanceGains { roll: PidGains, pitch: PidGains },
    TestCompensation { roll: f64, pitch: f64 },
}

impl RobotCommand {
    /// Accepts a JSON object or one of the upper-case text tokens.
    pub fn parse(payload: &[u8]) -> Result<Self, ParseCommandError> {
        let text = std::str::from_utf8(payload)?.trim();
        if text.starts_with('{') {
            Ok(serde_json::from_str(text)?)
        } else {
            RobotCommand::try_from(text)
        }
    }

    /// Mode this command requests, if it is a mode change.
    pub fn requested_mode(&self) -> Option<RobotMode> {
        let mode = match self {
            RobotCommand::Forward => RobotMode::MoveForward,
            RobotCommand::Backward => RobotMode::MoveBackward,
            RobotCommand::Left => RobotMode::RotateLeft,
            RobotCommand::Right => RobotMode::RotateRight,
            RobotCommand::Stop => RobotMode::Idle,
            RobotCommand::Stand => RobotMode::StandUp,
            RobotCommand::LayDown => RobotMode::LayDown,
            RobotCommand::Dance => RobotMode::Dance,
            RobotCommand::Balance => RobotMode::Balance,
            RobotCommand::Gait { .. }
            | RobotCommand::Calibrate
            | RobotCommand::Autotune
            | RobotCommand::SetBalanceGains { .. }
            | RobotCommand::TestCompensation { .. } => return None,
        };
        Some(mode)
    }
}

impl TryFrom<&str> for RobotCommand {
    type Error = ParseCommandError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let token = value.split_whitespace().next().ok_or(ParseCommandError::Empty)?;
        match token {
            "FORWARD" => Ok(RobotCommand::Forward),
            "BACKWARD" => Ok(RobotCommand::Backward),
            "LEFT" => Ok(RobotCommand::Left),
            "RIGHT" => Ok(RobotCommand::Right),
            "STOP" => Ok(RobotCommand::Stop),
            "STAND" => Ok(RobotCommand::Stand),
            "LAY_DOWN" => Ok(RobotCommand::LayDown),
            "DANCE" => Ok(RobotCommand::Dance),
            "BALANCE" => Ok(RobotCommand::Balance),
            "TRIPOD_GAIT" => Ok(RobotCommand::Gait {
                pattern: GaitPattern::Tripod,
            }),
            "WAVE_GAIT" => Ok(RobotCommand::Gait {
                pattern: GaitPattern::Wave,
            }),
            "RIPPLE_GAIT" => Ok(RobotCommand::Gait {
                pattern: GaitPattern::Ripple,
            }),
            "CALIBRATE" => Ok(RobotCommand::Calibrate),
            "AUTOTUNE" => Ok(RobotCommand::Autotune),
            other => Err(ParseCommandError::Unknown(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("command is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("invalid JSON command: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BalanceStatus {
    pub active: bool,
    /// Filtered tilt, degrees
    pub roll: f64,
    pub pitch: f64,
    /// Last compensation applied to the legs, degrees after deadband and limit
    #[serde(default)]
    pub roll_compensation: f64,
    #[serde(default)]
    pub pitch_compensation: f64,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    #[default]
    Ok,
    /// Contact sensors or accelerometer missing; adaptive features are off.
    Degraded,
}

// Snapshot published by the motion loop after every tick
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Telemetry {
    pub mode: RobotMode,
    pub requested_mode: RobotMode,
    pub gait: GaitPattern,
    pub balance: BalanceStatus,
    pub grounded: [Option<bool>; LEG_COUNT],
    pub joints: [[i32; JOINTS_PER_LEG]; LEG_COUNT],
    pub health: RuntimeHealth,
    pub uptime_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_tokens() {
        assert_eq!(RobotCommand::parse(b"FORWARD").unwrap(), RobotCommand::Forward);
        assert_eq!(RobotCommand::parse(b"  LAY_DOWN\n").unwrap(), RobotCommand::LayDown);
        assert_eq!(
            RobotCommand::parse(b"WAVE_GAIT").unwrap(),
            RobotCommand::Gait {
                pattern: GaitPattern::Wave
            }
        );
    }

    #[test]
    fn test_parse_json() {
        assert_eq!(
            RobotCommand::parse(br#"{"cmd":"left"}"#).unwrap(),
            RobotCommand::Left
        );
        assert_eq!(
            RobotCommand::parse(br#"{"cmd":"gait","pattern":"ripple"}"#).unwrap(),
            RobotCommand::Gait {
                pattern: GaitPattern::Ripple
            }
        );
        let cmd = RobotCommand::parse(
            br#"{"cmd":"set_balance_gains","roll":{"kp":1.0,"ki":0.1,"kd":0.2},"pitch":{"kp":2.0,"ki":0.0,"kd":0.0}}"#,
        )
        .unwrap();
        assert!(matches!(cmd, RobotCommand::SetBalanceGains { roll, .. } if roll.kp == 1.0));
    }

    #[test]
    fn test_unknown_commands_rejected() {
        assert!(matches!(
            RobotCommand::parse(b"STAIRCASE_MODE"),
            Err(ParseCommandError::Unknown(token)) if token == "STAIRCASE_MODE"
        ));
        assert!(matches!(RobotCommand::parse(b"   "), Err(ParseCommandError::Empty)));
        assert!(matches!(
            RobotCommand::parse(br#"{"cmd":"fly"}"#),
            Err(ParseCommandError::Json(_))
        ));
        assert!(matches!(
            RobotCommand::parse(&[0xff, 0xfe]),
            Err(ParseCommandError::Utf8(_))
        ));
    }

    #[test]
    fn test_command_modes() {
        assert_eq!(RobotCommand::Stop.requested_mode(), Some(RobotMode::Idle));
        assert_eq!(RobotCommand::Stand.requested_mode(), Some(RobotMode::StandUp));
        assert_eq!(RobotCommand::Calibrate.requested_mode(), None);
    }

    #[test]
    fn test_mode_u8_conversion() {
        for value in 0..=9u8 {
            let mode = RobotMode::from_u8(value).unwrap();
            assert_eq!(mode as u8, value);
        }
        assert_eq!(RobotMode::from_u8(10), None);
        assert_eq!(GaitPattern::from_u8(1), Some(GaitPattern::Wave));
    }
}
