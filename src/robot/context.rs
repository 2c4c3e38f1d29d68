// Hardware seams and the context every controller drives the robot through
//
// Controllers never touch a serial port or a sensor directly. They receive a
// `RobotContext`, which owns boxed trait objects for the actuators, the
// optional foot switches, the optional accelerometer and a clock. The real
// binary plugs in the servo bus; tests plug in `crate::sim`.

use std::time::{Duration, Instant};

use tracing::trace;

use crate::config::{HexapodConfig, JointRange};
use crate::robot::leg::{JOINTS_PER_LEG, Joint, LEG_COUNT, Leg};
use crate::robot::posture::LegPose;

/// Position servos addressed by (leg, joint). Angles are centi-degrees.
pub trait Actuators: Send {
    /// Start moving towards `angle`, arriving after `duration`. Returns immediately.
    fn move_joint(&mut self, leg: Leg, joint: Joint, angle: i32, duration: Duration);

    /// Current position. Implementations fall back to the last commanded
    /// angle when the hardware read fails.
    fn read_joint(&mut self, leg: Leg, joint: Joint) -> i32;
}

/// One raw foot switch per leg (true = pressed).
pub trait ContactSensors: Send {
    fn read_contact(&mut self, leg: Leg) -> bool;
}

pub trait Accelerometer: Send {
    fn is_present(&mut self) -> bool;

    /// Acceleration in any consistent unit, `None` when the read fails.
    fn read_acceleration(&mut self) -> Option<[f32; 3]>;
}

pub trait Clock: Send {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;
    fn sleep(&mut self, duration: Duration);
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JointLimits {
    pub coxa: JointRange,
    pub femur: JointRange,
    pub tibia: JointRange,
}

impl JointLimits {
    pub fn from_config(config: &HexapodConfig) -> Self {
        Self {
            coxa: config.coxa.safe,
            femur: config.femur.safe,
            tibia: config.tibia.safe,
        }
    }

    pub fn range(&self, joint: Joint) -> JointRange {
        match joint {
            Joint::Coxa => self.coxa,
            Joint::Femur => self.femur,
            Joint::Tibia => self.tibia,
        }
    }
}

pub struct RobotContext {
    actuators: Box<dyn Actuators>,
    contacts: Option<Box<dyn ContactSensors>>,
    accelerometer: Option<Box<dyn Accelerometer>>,
    clock: Box<dyn Clock>,
    limits: JointLimits,
    commanded: [[i32; JOINTS_PER_LEG]; LEG_COUNT],
}

impl RobotContext {
    pub fn new(mut actuators: Box<dyn Actuators>, clock: Box<dyn Clock>, limits: JointLimits) -> Self {
        let mut commanded = [[0; JOINTS_PER_LEG]; LEG_COUNT];
        for leg in Leg::ALL {
            for joint in Joint::ALL {
                commanded[leg][joint] = actuators.read_joint(leg, joint);
            }
        }
        Self {
            actuators,
            contacts: None,
            accelerometer: None,
            clock,
            limits,
            commanded,
        }
    }

    pub fn with_contacts(mut self, contacts: Box<dyn ContactSensors>) -> Self {
        self.contacts = Some(contacts);
        self
    }

    pub fn with_accelerometer(mut self, accelerometer: Box<dyn Accelerometer>) -> Self {
        self.accelerometer = Some(accelerometer);
        self
    }

    pub fn limits(&self) -> &JointLimits {
        &self.limits
    }

    /// Command one joint. Out-of-range angles are clamped to the safe envelope.
    pub fn move_joint(&mut self, leg: Leg, joint: Joint, angle: i32, duration: Duration) {
        let clamped = self.limits.range(joint).clamp(angle);
        if clamped != angle {
            trace!(%leg, %joint, requested = angle, clamped, "clamped joint command");
        }
        self.commanded[leg][joint] = clamped;
        self.actuators.move_joint(leg, joint, clamped, duration);
    }

    pub fn move_leg(&mut self, leg: Leg, pose: LegPose, duration: Duration) {
        self.move_joint(leg, Joint::Coxa, pose.coxa, duration);
        self.move_joint(leg, Joint::Femur, pose.femur, duration);
        self.move_joint(leg, Joint::Tibia, pose.tibia, duration);
    }

    /// Femur and tibia only; the hip is left where it is.
    pub fn move_lift(&mut self, leg: Leg, femur: i32, tibia: i32, duration: Duration) {
        self.move_joint(leg, Joint::Femur, femur, duration);
        self.move_joint(leg, Joint::Tibia, tibia, duration);
    }

    pub fn read_joint(&mut self, leg: Leg, joint: Joint) -> i32 {
        self.actuators.read_joint(leg, joint)
    }

    /// Last angle commanded to every joint (after clamping).
    pub fn commanded(&self) -> [[i32; JOINTS_PER_LEG]; LEG_COUNT] {
        self.commanded
    }

    pub fn has_contact_sensors(&self) -> bool {
        self.contacts.is_some()
    }

    /// Single raw switch sample, `None` when the robot has no foot switches.
    pub fn read_contact(&mut self, leg: Leg) -> Option<bool> {
        self.contacts.as_mut().map(|contacts| contacts.read_contact(leg))
    }

    pub fn has_accelerometer(&mut self) -> bool {
        self.accelerometer
            .as_mut()
            .is_some_and(|accelerometer| accelerometer.is_present())
    }

    pub fn read_acceleration(&mut self) -> Option<[f32; 3]> {
        self.accelerometer.as_mut()?.read_acceleration()
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn sleep(&mut self, duration: Duration) {
        if !duration.is_zero() {
            self.clock.sleep(duration);
        }
    }

    pub fn elapsed_since(&self, start: Duration) -> Duration {
        self.now().saturating_sub(start)
    }
}
