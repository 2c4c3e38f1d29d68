// Scalar PID controller used for roll and pitch stabilisation.
//
//     output = Kp * e + ∫ Ki * e dt - Kd * d(input)/dt
//
// - The integral term stores `Ki * e * dt` sums, so changing gains at runtime
//   does not cause a jump in output, and it is clamped to `integral_limit`.
// - The derivative acts on the measurement rather than on the error; a
//   setpoint step (as during autotune) does not kick the output.
// - The output is clamped to `±output_limit`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl PidGains {
    pub const fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }

    pub fn scaled(self, factor: f64) -> Self {
        Self::new(self.kp * factor, self.ki * factor, self.kd * factor)
    }
}

#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,

    /// Accumulated `Ki * e * dt`
    integral: f64,

    /// Previous measurement, `None` right after a reset
    last_input: Option<f64>,

    integral_limit: f64,
    output_limit: f64,
    enabled: bool,
}

impl PidController {
    /// Disabled controller with the given gains and a ±100 output limit.
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral: 0.0,
            last_input: None,
            integral_limit: 100.0,
            output_limit: 100.0,
            enabled: false,
        }
    }

    /// Sets both the output limit and the integral limit.
    pub fn with_output_limit(mut self, limit: f64) -> Self {
        self.output_limit = limit.abs();
        self.integral_limit = limit.abs();
        self
    }

    pub fn with_integral_limit(mut self, limit: f64) -> Self {
        self.integral_limit = limit.abs();
        self
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
    }

    pub fn output_limit(&self) -> f64 {
        self.output_limit
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Switching from disabled to enabled starts from a clean state.
    pub fn enable(&mut self) {
        if !self.enabled {
            self.reset();
            self.enabled = true;
        }
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_input = None;
    }

    /// One control step. `None` while disabled.
    pub fn compute(&mut self, setpoint: f64, input: f64, dt: Duration) -> Option<f64> {
        if !self.enabled {
            return None;
        }
        let dt_sec = dt.as_secs_f64();
        if dt_sec <= 0.0 || !input.is_finite() || !setpoint.is_finite() {
            warn!(?dt, input, setpoint, "PID received an unusable sample, holding at zero");
            return Some(0.0);
        }

        let error = setpoint - input;

        self.integral = (self.integral + self.gains.ki * error * dt_sec)
            .clamp(-self.integral_limit, self.integral_limit);

        let derivative = match self.last_input {
            Some(previous) => (input - previous) / dt_sec,
            None => 0.0,
        };
        self.last_input = Some(input);

        let output = self.gains.kp * error + self.integral - self.gains.kd * derivative;
        Some(output.clamp(-self.output_limit, self.output_limit))
    }
}
