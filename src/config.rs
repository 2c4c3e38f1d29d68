// Joint limits, gait timing, balance tuning and runtime settings
//
// Every value has a compile-time default below; a TOML file can override any
// subset of them at startup (see `HexapodConfig::load`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use crate::robot::leg::{Leg, PartitionError, Side, Tripod, TripodPair};

// Motion loop frequency (also the balance control period: 50 Hz = 20 ms)
pub const LOOP_HZ: u64 = 50;

// Telemetry publish rate for the command bridge
pub const STATE_HZ: u64 = 10;

// Zenoh topics
pub const TOPIC_CMD: &str = "hexapod/cmd"; // commands
pub const TOPIC_STATE: &str = "hexapod/state"; // telemetry

// Serial port for the LX-16A servo bus
pub const SERVO_PORT: &str = "/dev/ttyUSB0";

// Joint positions, centi-degrees on the servo scale (0..24000)
pub const COXA_DEFAULT: i32 = 12000;
pub const COXA_FORWARD: i32 = 14500;
pub const COXA_BACKWARD: i32 = 9500;
pub const COXA_ROTATE_FORWARD: i32 = 15000;
pub const COXA_ROTATE_BACKWARD: i32 = 9000;

pub const FEMUR_DOWN: i32 = 17000;
pub const FEMUR_UP: i32 = 18500;
pub const TIBIA_DOWN: i32 = 7000;
pub const TIBIA_UP: i32 = 10000;

// Support pose while rotating in place (wider, lower stance for yaw stability)
pub const FEMUR_STANCE_ROTATE: i32 = 17300;
pub const TIBIA_STANCE_ROTATE: i32 = 7200;

pub const BALANCE_FEMUR_DEFAULT: i32 = 17000;
pub const BALANCE_TIBIA_DEFAULT: i32 = 7000;

// Tripod partitions by leg id (actuator base index = id * 3)
pub const TRIPOD_A: [u8; 3] = [5, 4, 2];
pub const TRIPOD_B: [u8; 3] = [0, 1, 3];
pub const ROTATE_TRIPOD_A: [u8; 3] = [0, 4, 2];
pub const ROTATE_TRIPOD_B: [u8; 3] = [5, 1, 3];

pub const WAVE_ORDER: [u8; 6] = [0, 1, 2, 3, 4, 5];
pub const BODY_PUSH_DELTA: i32 = 800;

// Ground contact
pub const DEBOUNCE_SAMPLES: usize = 5;
pub const CONTACT_STEP: i32 = 100;
pub const TRIPOD_MAX_STEPS: usize = 50;

/// Inclusive safe envelope for one joint. Every commanded angle is clamped into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointRange {
    pub min: i32,
    pub max: i32,
}

impl JointRange {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, angle: i32) -> i32 {
        angle.clamp(self.min, self.max)
    }

    pub fn contains(&self, angle: i32) -> bool {
        (self.min..=self.max).contains(&angle)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoxaConfig {
    pub default: i32,
    pub forward: i32,
    pub backward: i32,
    pub rotate_forward: i32,
    pub rotate_backward: i32,
    pub safe: JointRange,
}

impl Default for CoxaConfig {
    fn default() -> Self {
        Self {
            default: COXA_DEFAULT,
            forward: COXA_FORWARD,
            backward: COXA_BACKWARD,
            rotate_forward: COXA_ROTATE_FORWARD,
            rotate_backward: COXA_ROTATE_BACKWARD,
            safe: JointRange::new(COXA_ROTATE_BACKWARD, COXA_ROTATE_FORWARD),
        }
    }
}

/// Femur or tibia: the two joints that raise and lower the foot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LiftJointConfig {
    pub down: i32,
    pub up: i32,
    pub safe: JointRange,
}

impl LiftJointConfig {
    pub fn femur() -> Self {
        Self {
            down: FEMUR_DOWN,
            up: FEMUR_UP,
            safe: JointRange::new(FEMUR_DOWN - 600, FEMUR_UP),
        }
    }

    pub fn tibia() -> Self {
        Self {
            down: TIBIA_DOWN,
            up: TIBIA_UP,
            safe: JointRange::new(TIBIA_DOWN, TIBIA_UP + 500),
        }
    }

    /// Sign of travel that lowers the foot (from `up` towards `down`).
    pub fn lowering_sign(&self) -> i32 {
        (self.down - self.up).signum()
    }
}

// Femur and tibia share a type but not their defaults, so a partial table is
// read as overrides on top of the right joint.
#[derive(Deserialize)]
struct LiftJointOverrides {
    down: Option<i32>,
    up: Option<i32>,
    safe: Option<JointRange>,
}

impl LiftJointOverrides {
    fn over(self, base: LiftJointConfig) -> LiftJointConfig {
        LiftJointConfig {
            down: self.down.unwrap_or(base.down),
            up: self.up.unwrap_or(base.up),
            safe: self.safe.unwrap_or(base.safe),
        }
    }
}

fn femur_table<'de, D: Deserializer<'de>>(deserializer: D) -> Result<LiftJointConfig, D::Error> {
    LiftJointOverrides::deserialize(deserializer).map(|table| table.over(LiftJointConfig::femur()))
}

fn tibia_table<'de, D: Deserializer<'de>>(deserializer: D) -> Result<LiftJointConfig, D::Error> {
    LiftJointOverrides::deserialize(deserializer).map(|table| table.over(LiftJointConfig::tibia()))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoseConfig {
    pub femur: i32,
    pub tibia: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StanceConfig {
    pub rotation: PoseConfig,
    pub balance: PoseConfig,
    pub lay_down: PoseConfig,
    pub idle_move_ms: u64,
    pub posture_move_ms: u64,
    pub startup_move_ms: u64,
}

impl Default for StanceConfig {
    fn default() -> Self {
        Self {
            rotation: PoseConfig {
                femur: FEMUR_STANCE_ROTATE,
                tibia: TIBIA_STANCE_ROTATE,
            },
            balance: PoseConfig {
                femur: BALANCE_FEMUR_DEFAULT,
                tibia: BALANCE_TIBIA_DEFAULT,
            },
            lay_down: PoseConfig {
                femur: FEMUR_UP,
                tibia: TIBIA_UP,
            },
            idle_move_ms: 200,
            posture_move_ms: 1000,
            startup_move_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TripodConfig {
    pub walk_a: [u8; 3],
    pub walk_b: [u8; 3],
    pub rotate_a: [u8; 3],
    pub rotate_b: [u8; 3],
}

impl Default for TripodConfig {
    fn default() -> Self {
        Self {
            walk_a: TRIPOD_A,
            walk_b: TRIPOD_B,
            rotate_a: ROTATE_TRIPOD_A,
            rotate_b: ROTATE_TRIPOD_B,
        }
    }
}

impl TripodConfig {
    pub fn walking(&self) -> Result<TripodPair, ConfigError> {
        pair_from_ids(self.walk_a, self.walk_b)
    }

    pub fn rotation(&self) -> Result<TripodPair, ConfigError> {
        pair_from_ids(self.rotate_a, self.rotate_b)
    }
}

fn pair_from_ids(a: [u8; 3], b: [u8; 3]) -> Result<TripodPair, ConfigError> {
    let a = Tripod::from_ids(a)?;
    let b = Tripod::from_ids(b)?;
    Ok(TripodPair::new(a, b)?)
}

/// Physical mounting of one leg: which hip extreme means "forward" and how the
/// leg's height responds to body roll and pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegConfig {
    pub side: Side,
    pub roll_sign: i8,
    pub pitch_sign: i8,
}

pub const LEGS: [LegConfig; 6] = [
    LegConfig { side: Side::Right, roll_sign: 1, pitch_sign: -1 },
    LegConfig { side: Side::Right, roll_sign: -1, pitch_sign: -1 },
    LegConfig { side: Side::Right, roll_sign: -1, pitch_sign: -1 },
    LegConfig { side: Side::Left, roll_sign: 1, pitch_sign: 1 },
    LegConfig { side: Side::Left, roll_sign: 1, pitch_sign: 1 },
    LegConfig { side: Side::Left, roll_sign: -1, pitch_sign: 1 },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackwardMode {
    /// Rotate 180 degrees, then walk forward.
    #[default]
    TurnAround,
    /// Walk with mirrored hip extremes.
    Reverse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GaitConfig {
    pub adaptive_lowering: bool,
    pub backward_mode: BackwardMode,
    pub hip_trim_left: i32,
    pub hip_trim_right: i32,
    pub half_turn_cycles: u32,
}

impl Default for GaitConfig {
    fn default() -> Self {
        Self {
            adaptive_lowering: true,
            backward_mode: BackwardMode::TurnAround,
            hip_trim_left: 0,
            hip_trim_right: 0,
            half_turn_cycles: 6,
        }
    }
}

/// Durations of the five steps of one tripod phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub reassert_ms: u64,
    pub lift_ms: u64,
    pub swing_ms: u64,
    pub lower_ms: u64,
    pub push_ms: u64,
    pub settle_ms: u64,
}

impl PhaseTiming {
    pub fn walking() -> Self {
        Self {
            reassert_ms: 50,
            lift_ms: 140,
            swing_ms: 270,
            lower_ms: 180,
            push_ms: 270,
            settle_ms: 20,
        }
    }

    pub fn rotation() -> Self {
        Self {
            reassert_ms: 50,
            lift_ms: 240,
            swing_ms: 350,
            lower_ms: 260,
            push_ms: 350,
            settle_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveConfig {
    pub order: [u8; 6],
    pub body_push_delta: i32,
    pub lift_ms: u64,
    pub swing_ms: u64,
    pub lower_ms: u64,
    pub push_ms: u64,
    pub settle_ms: u64,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            order: WAVE_ORDER,
            body_push_delta: BODY_PUSH_DELTA,
            lift_ms: 100,
            swing_ms: 120,
            lower_ms: 100,
            push_ms: 100,
            settle_ms: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub tripod: PhaseTiming,
    pub rotation: PhaseTiming,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tripod: PhaseTiming::walking(),
            rotation: PhaseTiming::rotation(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    pub debounce_samples: usize,
    pub sample_interval_ms: u64,
    pub step_size: i32,
    pub step_delay_ms: u64,
    pub hip_snap_ms: u64,
    pub lower_timeout_ms: u64,
    pub tripod_max_steps: usize,
    pub wait_timeout_ms: u64,
    pub wait_interval_ms: u64,
    pub level_envelope: i32,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            debounce_samples: DEBOUNCE_SAMPLES,
            sample_interval_ms: 2,
            step_size: CONTACT_STEP,
            step_delay_ms: 30,
            hip_snap_ms: 150,
            lower_timeout_ms: 3000,
            tripod_max_steps: TRIPOD_MAX_STEPS,
            wait_timeout_ms: 3000,
            wait_interval_ms: 30,
            level_envelope: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub max_compensation_deg: f64,
    pub deadband_deg: f64,
    pub ramp_secs: f64,
    pub filter_alpha: f64,
    pub femur_units_per_deg: f64,
    pub tibia_units_per_deg: f64,
    pub compensation_move_ms: u64,
    pub stance_move_ms: u64,
    pub stance_settle_ms: u64,
    pub calibration_samples: usize,
    pub calibration_interval_ms: u64,
    pub autotune_on_start: bool,
    pub autotune_trials: usize,
    pub autotune_trial_ms: u64,
    pub autotune_amplitude_deg: f64,
    pub autotune_frequency_hz: f64,
    pub debug_interval_ms: u64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            kp: 1.2,
            ki: 0.02,
            kd: 0.3,
            max_compensation_deg: 15.0,
            deadband_deg: 0.6,
            ramp_secs: 1.2,
            filter_alpha: 0.4,
            femur_units_per_deg: 80.0,
            tibia_units_per_deg: 50.0,
            compensation_move_ms: 35,
            stance_move_ms: 200,
            stance_settle_ms: 500,
            calibration_samples: 50,
            calibration_interval_ms: 20,
            autotune_on_start: true,
            autotune_trials: 5,
            autotune_trial_ms: 2000,
            autotune_amplitude_deg: 5.0,
            autotune_frequency_hz: 1.0,
            debug_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub loop_hz: u64,
    pub state_hz: u64,
    pub cmd_topic: String,
    pub state_topic: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            loop_hz: LOOP_HZ,
            state_hz: STATE_HZ,
            cmd_topic: TOPIC_CMD.to_string(),
            state_topic: TOPIC_STATE.to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn loop_period(&self) -> Duration {
        Duration::from_millis(1000 / self.loop_hz.max(1))
    }

    pub fn state_period(&self) -> Duration {
        Duration::from_millis(1000 / self.state_hz.max(1))
    }
}

/// Whole configuration surface, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HexapodConfig {
    pub coxa: CoxaConfig,
    #[serde(deserialize_with = "femur_table")]
    pub femur: LiftJointConfig,
    #[serde(deserialize_with = "tibia_table")]
    pub tibia: LiftJointConfig,
    pub stance: StanceConfig,
    pub tripods: TripodConfig,
    pub legs: [LegConfig; 6],
    pub gait: GaitConfig,
    pub timing: TimingConfig,
    pub wave: WaveConfig,
    pub contact: ContactConfig,
    pub balance: BalanceConfig,
    pub runtime: RuntimeConfig,
}

impl Default for HexapodConfig {
    fn default() -> Self {
        Self {
            coxa: CoxaConfig::default(),
            femur: LiftJointConfig::femur(),
            tibia: LiftJointConfig::tibia(),
            stance: StanceConfig::default(),
            tripods: TripodConfig::default(),
            legs: LEGS,
            gait: GaitConfig::default(),
            timing: TimingConfig::default(),
            wave: WaveConfig::default(),
            contact: ContactConfig::default(),
            balance: BalanceConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl HexapodConfig {
    /// Read a TOML file; missing keys fall back to the defaults above.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: HexapodConfig = toml::from_str(&text)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tripods.walking()?;
        self.tripods.rotation()?;

        let mut seen = [false; 6];
        for &id in &self.wave.order {
            let leg = Leg::new(id).ok_or(ConfigError::InvalidLeg(id))?;
            if std::mem::replace(&mut seen[leg.index()], true) {
                return Err(ConfigError::InvalidWaveOrder(self.wave.order));
            }
        }

        check_range("coxa", self.coxa.safe)?;
        check_range("femur", self.femur.safe)?;
        check_range("tibia", self.tibia.safe)?;

        if self.contact.debounce_samples == 0 {
            return Err(ConfigError::InvalidValue {
                field: "contact.debounce_samples".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.contact.step_size <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "contact.step_size".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.balance.max_compensation_deg <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "balance.max_compensation_deg".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if !self.balance.ramp_secs.is_finite() || self.balance.ramp_secs < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "balance.ramp_secs".to_string(),
                message: "must be a finite number of seconds, zero or more".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.balance.filter_alpha) {
            return Err(ConfigError::InvalidValue {
                field: "balance.filter_alpha".to_string(),
                message: "must lie in [0, 1]".to_string(),
            });
        }
        for leg in &self.legs {
            if leg.roll_sign.abs() > 1 || leg.pitch_sign.abs() > 1 {
                return Err(ConfigError::InvalidValue {
                    field: "legs".to_string(),
                    message: "roll_sign and pitch_sign must be -1, 0 or 1".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn check_range(joint: &'static str, range: JointRange) -> Result<(), ConfigError> {
    if range.min > range.max {
        return Err(ConfigError::InvertedRange {
            joint,
            min: range.min,
            max: range.max,
        });
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid tripod partition: {0}")]
    Partition(#[from] PartitionError),

    #[error("Invalid leg id {0} (expected 0..=5)")]
    InvalidLeg(u8),

    #[error("Wave order {0:?} must visit every leg exactly once")]
    InvalidWaveOrder([u8; 6]),

    #[error("Safe range of {joint} is inverted: min={min}, max={max}")]
    InvertedRange { joint: &'static str, min: i32, max: i32 },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
