// Body leveling from accelerometer tilt.
//
// Each control tick the tilt is read, low-pass filtered and fed to one PID
// per axis with a level (0°) setpoint. The outputs are scaled by a ramp-in
// factor, pass a deadband, are clamped to the maximum compensation and then
// turned into femur/tibia targets for every leg using its roll/pitch signs.

use std::f64::consts::PI;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{BalanceConfig, HexapodConfig, JointRange, LegConfig};
use crate::control::pid::{PidController, PidGains};
use crate::messages::BalanceStatus;
use crate::robot::context::RobotContext;
use crate::robot::leg::{LEG_COUNT, Leg};
use crate::robot::posture::LegPose;

/// Share of the femur compensation mirrored onto the tibia to keep the foot flat.
const TIBIA_SHARE: f64 = 0.5;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Roll and pitch in degrees from a gravity vector.
pub fn tilt_from_acceleration([x, y, z]: [f32; 3]) -> (f64, f64) {
    let (x, y, z) = (f64::from(x), f64::from(y), f64::from(z));
    let roll = y.atan2(z).to_degrees();
    let pitch = (-x).atan2((y * y + z * z).sqrt()).to_degrees();
    (roll, pitch)
}

/// 0 at enable time, rising linearly to 1 over `window`.
pub fn ramp_factor(elapsed: Duration, window: Duration) -> f64 {
    if window.is_zero() || elapsed >= window {
        1.0
    } else {
        elapsed.as_secs_f64() / window.as_secs_f64()
    }
}

pub fn apply_deadband(value: f64, band: f64) -> f64 {
    if value.abs() < band { 0.0 } else { value }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Roll,
    Pitch,
}

pub struct BalanceController {
    config: BalanceConfig,
    legs: [LegConfig; LEG_COUNT],
    balance_stance: LegPose,
    standard_stance: LegPose,
    femur_safe: JointRange,
    tibia_safe: JointRange,

    roll_pid: PidController,
    pitch_pid: PidController,

    initialized: bool,
    active: bool,
    tuned: bool,
    missing_logged: bool,

    roll_offset: f64,
    pitch_offset: f64,
    // low-pass filter state; also the latest reported tilt
    roll: f64,
    pitch: f64,
    // last compensation sent to the legs
    roll_compensation: f64,
    pitch_compensation: f64,

    entered_at: Duration,
    last_update: Option<Duration>,
    last_debug: Option<Duration>,
    activations: u32,
}

impl BalanceController {
    pub fn new(config: &HexapodConfig) -> Self {
        let balance = config.balance.clone();
        let gains = PidGains::new(balance.kp, balance.ki, balance.kd);
        let limit = balance.max_compensation_deg;
        Self {
            legs: config.legs,
            balance_stance: LegPose::with_lift(config.coxa.default, config.stance.balance),
            standard_stance: LegPose::new(config.coxa.default, config.femur.down, config.tibia.down),
            femur_safe: config.femur.safe,
            tibia_safe: config.tibia.safe,
            roll_pid: PidController::new(gains).with_output_limit(limit),
            pitch_pid: PidController::new(gains).with_output_limit(limit),
            config: balance,
            initialized: false,
            active: false,
            tuned: false,
            missing_logged: false,
            roll_offset: 0.0,
            pitch_offset: 0.0,
            roll: 0.0,
            pitch: 0.0,
            roll_compensation: 0.0,
            pitch_compensation: 0.0,
            entered_at: Duration::ZERO,
            last_update: None,
            last_debug: None,
            activations: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of times balance mode has been entered.
    pub fn activations(&self) -> u32 {
        self.activations
    }

    pub fn status(&self) -> BalanceStatus {
        BalanceStatus {
            active: self.active,
            roll: self.roll,
            pitch: self.pitch,
            roll_compensation: self.roll_compensation,
            pitch_compensation: self.pitch_compensation,
        }
    }

    pub fn gains(&self) -> (PidGains, PidGains) {
        (self.roll_pid.gains(), self.pitch_pid.gains())
    }

    fn default_gains(&self) -> PidGains {
        PidGains::new(self.config.kp, self.config.ki, self.config.kd)
    }

    fn period(&self) -> Duration {
        // the PID sample time matches the motion loop period
        ms(20)
    }

    /// Check for the accelerometer, calibrate and load default gains.
    pub fn begin(&mut self, ctx: &mut RobotContext) -> bool {
        info!("Initializing balance controller");
        if !ctx.has_accelerometer() {
            if !self.missing_logged {
                warn!("Accelerometer not present, balance mode disabled");
                self.missing_logged = true;
            }
            return false;
        }
        ctx.sleep(ms(100));
        if !self.calibrate(ctx) {
            return false;
        }
        let gains = self.default_gains();
        self.set_pid_parameters(gains, gains);
        self.initialized = true;
        info!("Balance controller initialized");
        true
    }

    /// Average the tilt over a still period and store it as the level reference.
    pub fn calibrate(&mut self, ctx: &mut RobotContext) -> bool {
        info!("Calibrating level position, keep the robot still on a flat surface");
        let (mut roll_sum, mut pitch_sum, mut samples) = (0.0, 0.0, 0u32);
        for _ in 0..self.config.calibration_samples {
            if let Some(acceleration) = ctx.read_acceleration() {
                let (roll, pitch) = tilt_from_acceleration(acceleration);
                roll_sum += roll;
                pitch_sum += pitch;
                samples += 1;
            }
            ctx.sleep(ms(self.config.calibration_interval_ms));
        }
        if samples == 0 {
            warn!("No accelerometer samples during calibration, keeping previous offsets");
            return false;
        }
        self.roll_offset = roll_sum / f64::from(samples);
        self.pitch_offset = pitch_sum / f64::from(samples);
        self.roll = 0.0;
        self.pitch = 0.0;
        info!(
            "Calibration complete. Roll offset: {:.2}°, Pitch offset: {:.2}°",
            self.roll_offset, self.pitch_offset
        );
        true
    }

    pub fn set_pid_parameters(&mut self, roll: PidGains, pitch: PidGains) {
        self.roll_pid.set_gains(roll);
        self.pitch_pid.set_gains(pitch);
        info!(?roll, ?pitch, "Updated balance PID parameters");
    }

    /// Drive the balance stance and start the PIDs. Autotunes on the first
    /// entry when configured to.
    pub fn enter(&mut self, ctx: &mut RobotContext) {
        self.activations += 1;
        if !self.initialized {
            warn!("Balance controller not initialized, staying passive");
            return;
        }
        info!("Entering balance mode");
        self.drive_stance(ctx, self.balance_stance);
        ctx.sleep(ms(self.config.stance_settle_ms));

        self.roll_pid.enable();
        self.pitch_pid.enable();
        self.active = true;
        if self.config.autotune_on_start && !self.tuned {
            info!("Autotune on first start");
            self.autotune(ctx);
        }
        self.entered_at = ctx.now();
        self.last_update = None;
        info!("Balance mode active");
    }

    pub fn exit(&mut self, ctx: &mut RobotContext) {
        info!("Exiting balance mode");
        self.active = false;
        self.roll_pid.disable();
        self.pitch_pid.disable();
        self.roll_compensation = 0.0;
        self.pitch_compensation = 0.0;
        self.drive_stance(ctx, self.standard_stance);
    }

    fn drive_stance(&self, ctx: &mut RobotContext, stance: LegPose) {
        for leg in Leg::ALL {
            ctx.move_leg(leg, stance, ms(self.config.stance_move_ms));
        }
    }

    /// Read, filter and store the tilt. False when the sensor gives nothing.
    fn read_tilt(&mut self, ctx: &mut RobotContext) -> bool {
        let Some(acceleration) = ctx.read_acceleration() else {
            return false;
        };
        let (roll, pitch) = tilt_from_acceleration(acceleration);
        let alpha = self.config.filter_alpha;
        self.roll = alpha * (roll - self.roll_offset) + (1.0 - alpha) * self.roll;
        self.pitch = alpha * (pitch - self.pitch_offset) + (1.0 - alpha) * self.pitch;
        true
    }

    /// One control step. False when inactive or when the sensor read fails.
    pub fn update(&mut self, ctx: &mut RobotContext) -> bool {
        if !self.active || !self.initialized {
            return false;
        }
        if !self.read_tilt(ctx) {
            return false;
        }

        let now = ctx.now();
        let dt = self
            .last_update
            .map_or(self.period(), |previous| now.saturating_sub(previous));
        self.last_update = Some(now);

        // an unusable window means no ramp
        let window = Duration::try_from_secs_f64(self.config.ramp_secs).unwrap_or(Duration::ZERO);
        let ramp = ramp_factor(now.saturating_sub(self.entered_at), window);
        let roll_output = self.roll_pid.compute(0.0, self.roll, dt);
        let pitch_output = self.pitch_pid.compute(0.0, self.pitch, dt);
        if let (Some(roll_output), Some(pitch_output)) = (roll_output, pitch_output) {
            self.apply_compensation(ctx, roll_output * ramp, pitch_output * ramp);

            if self
                .last_debug
                .is_none_or(|last| now.saturating_sub(last) >= ms(self.config.debug_interval_ms))
            {
                debug!(
                    "Balance: Roll={:.2}° (out={:.2}), Pitch={:.2}° (out={:.2})",
                    self.roll, roll_output, self.pitch, pitch_output
                );
                self.last_debug = Some(now);
            }
        }
        true
    }

    /// Femur/tibia targets for every leg for the given compensation angles.
    pub fn compensation_targets(&self, roll: f64, pitch: f64) -> [LegPose; LEG_COUNT] {
        let (roll, pitch) = (self.limit(roll), self.limit(pitch));

        Leg::ALL.map(|leg| {
            let signs = self.legs[leg];
            let degrees = f64::from(signs.roll_sign) * roll + f64::from(signs.pitch_sign) * pitch;
            let femur_adjust = (degrees * self.config.femur_units_per_deg) as i32;
            let tibia_adjust = (degrees * TIBIA_SHARE * self.config.tibia_units_per_deg) as i32;
            LegPose::new(
                self.balance_stance.coxa,
                self.femur_safe.clamp(self.balance_stance.femur + femur_adjust),
                self.tibia_safe.clamp(self.balance_stance.tibia - tibia_adjust),
            )
        })
    }

    /// Deadband, then the maximum compensation.
    fn limit(&self, degrees: f64) -> f64 {
        let max = self.config.max_compensation_deg;
        apply_deadband(degrees, self.config.deadband_deg).clamp(-max, max)
    }

    fn apply_compensation(&mut self, ctx: &mut RobotContext, roll: f64, pitch: f64) {
        let duration = ms(self.config.compensation_move_ms);
        for (leg, target) in Leg::ALL.into_iter().zip(self.compensation_targets(roll, pitch)) {
            ctx.move_lift(leg, target.femur, target.tibia, duration);
        }
        self.roll_compensation = self.limit(roll);
        self.pitch_compensation = self.limit(pitch);
    }

    /// Apply a manual compensation once, for bench testing the leg mapping.
    pub fn test_compensation(&mut self, ctx: &mut RobotContext, roll: f64, pitch: f64) {
        info!(roll, pitch, "Testing balance compensation");
        self.apply_compensation(ctx, roll, pitch);
    }

    /// Try scaled versions of the default gains against a sine reference on
    /// each axis and keep the ones with the lowest mean absolute error.
    pub fn autotune(&mut self, ctx: &mut RobotContext) -> bool {
        if !self.initialized {
            warn!("Balance controller not initialized, cannot autotune");
            return false;
        }
        info!("Starting PID autotuning");
        let was_active = self.active;
        self.active = false;
        let (previous_roll, previous_pitch) = self.gains();

        let roll = self.tune_axis(ctx, Axis::Roll);
        let pitch = self.tune_axis(ctx, Axis::Pitch);
        self.set_pid_parameters(roll.unwrap_or(previous_roll), pitch.unwrap_or(previous_pitch));

        for pid in [&mut self.roll_pid, &mut self.pitch_pid] {
            pid.disable();
            if was_active {
                pid.enable();
            }
        }
        self.active = was_active;
        self.entered_at = ctx.now();
        self.last_update = None;

        // a failed tune is retried on the next entry
        let ok = roll.is_some() && pitch.is_some();
        self.tuned = ok;
        if ok {
            info!("Autotuning complete");
        } else {
            warn!("Autotuning got no sensor data, keeping previous gains");
        }
        ok
    }

    fn tune_axis(&mut self, ctx: &mut RobotContext, axis: Axis) -> Option<PidGains> {
        let trials = self.config.autotune_trials.max(1);
        let duration = ms(self.config.autotune_trial_ms);
        let amplitude = self.config.autotune_amplitude_deg;
        let frequency = self.config.autotune_frequency_hz;
        let mut best: Option<(PidGains, f64)> = None;

        for trial in 0..trials {
            let gains = self
                .default_gains()
                .scaled(0.5 + (trial as f64 / trials as f64) * 1.5);
            {
                let pid = self.pid_mut(axis);
                pid.set_gains(gains);
                pid.disable();
                pid.enable();
            }

            let start = ctx.now();
            let mut last = start;
            let mut total_error = 0.0;
            let mut samples = 0u32;
            while ctx.elapsed_since(start) < duration {
                let t = ctx.elapsed_since(start).as_secs_f64();
                let setpoint = amplitude * (2.0 * PI * frequency * t).sin();
                if self.read_tilt(ctx) {
                    let now = ctx.now();
                    let dt = now.saturating_sub(last).max(self.period());
                    last = now;
                    let input = match axis {
                        Axis::Roll => self.roll,
                        Axis::Pitch => self.pitch,
                    };
                    if let Some(output) = self.pid_mut(axis).compute(setpoint, input, dt) {
                        match axis {
                            Axis::Roll => self.apply_compensation(ctx, output, 0.0),
                            Axis::Pitch => self.apply_compensation(ctx, 0.0, output),
                        }
                        total_error += (setpoint - input).abs();
                        samples += 1;
                    }
                }
                ctx.sleep(self.period());
            }

            if samples == 0 {
                continue;
            }
            let error = total_error / f64::from(samples);
            info!(
                "{:?} test {}: Kp={:.2}, Ki={:.3}, Kd={:.2}, Error={:.2}",
                axis, trial, gains.kp, gains.ki, gains.kd, error
            );
            if best.is_none_or(|(_, best_error)| error < best_error) {
                best = Some((gains, error));
            }
        }
        best.map(|(gains, _)| gains)
    }

    fn pid_mut(&mut self, axis: Axis) -> &mut PidController {
        match axis {
            Axis::Roll => &mut self.roll_pid,
            Axis::Pitch => &mut self.pitch_pid,
        }
    }
}
