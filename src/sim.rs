// In-memory hexapod for tests and `--sim` runs.
//
// A `SimHexapod` owns a shared world and hands out handles implementing the
// hardware traits. Moves land instantly and are recorded. Foot switches
// either replay a scripted sequence or report contact once the femur has
// been lowered past a per-leg ground height. The virtual clock only moves
// when something sleeps, so timing-heavy sequences run in microseconds.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::HexapodConfig;
use crate::robot::context::{
    Accelerometer, Actuators, Clock, ContactSensors, JointLimits, RobotContext,
};
use crate::robot::leg::{JOINTS_PER_LEG, Joint, LEG_COUNT, Leg};
use crate::robot::posture::LegPose;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveRecord {
    pub at: Duration,
    pub leg: Leg,
    pub joint: Joint,
    pub angle: i32,
    pub duration: Duration,
}

#[derive(Debug, Default)]
struct SimFoot {
    script: VecDeque<bool>,
    forced: Option<bool>,
    ground_femur: Option<i32>,
}

#[derive(Debug)]
struct SimWorld {
    now: Duration,
    joints: [[i32; JOINTS_PER_LEG]; LEG_COUNT],
    history: Vec<MoveRecord>,
    feet: [SimFoot; LEG_COUNT],
    lowering_sign: i32,
    acceleration: Option<[f32; 3]>,
    accelerometer_present: bool,
}

impl SimWorld {
    fn contact(&mut self, leg: Leg) -> bool {
        let femur = self.joints[leg][Joint::Femur];
        let sign = self.lowering_sign;
        let foot = &mut self.feet[leg];
        if let Some(sample) = foot.script.pop_front() {
            return sample;
        }
        if let Some(forced) = foot.forced {
            return forced;
        }
        foot.ground_femur
            .is_some_and(|ground| femur * sign >= ground * sign)
    }
}

#[derive(Clone)]
pub struct SimHexapod {
    world: Arc<Mutex<SimWorld>>,
}

impl SimHexapod {
    pub fn new(initial: LegPose, lowering_sign: i32) -> Self {
        let world = SimWorld {
            now: Duration::ZERO,
            joints: [initial.as_array(); LEG_COUNT],
            history: Vec::new(),
            feet: Default::default(),
            lowering_sign,
            acceleration: Some([0.0, 0.0, 1.0]),
            accelerometer_present: true,
        };
        Self {
            world: Arc::new(Mutex::new(world)),
        }
    }

    /// All legs in the standard stance, feet touching the ground exactly at
    /// the nominal down pose.
    pub fn standing(config: &HexapodConfig) -> Self {
        let stance = LegPose::new(config.coxa.default, config.femur.down, config.tibia.down);
        let sim = Self::new(stance, config.femur.lowering_sign());
        for leg in Leg::ALL {
            sim.set_ground_femur(leg, Some(config.femur.down));
        }
        sim
    }

    fn world(&self) -> MutexGuard<'_, SimWorld> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Context with foot switches, accelerometer and the virtual clock.
    pub fn context(&self, config: &HexapodConfig) -> RobotContext {
        self.bare_context(config)
            .with_contacts(Box::new(self.contacts()))
            .with_accelerometer(Box::new(self.accelerometer()))
    }

    /// Context with actuators and the virtual clock only.
    pub fn bare_context(&self, config: &HexapodConfig) -> RobotContext {
        self.context_with_clock(config, Box::new(self.clock()))
    }

    pub fn context_with_clock(&self, config: &HexapodConfig, clock: Box<dyn Clock>) -> RobotContext {
        RobotContext::new(Box::new(self.actuators()), clock, JointLimits::from_config(config))
    }

    pub fn actuators(&self) -> SimActuators {
        SimActuators { sim: self.clone() }
    }

    pub fn contacts(&self) -> SimContacts {
        SimContacts { sim: self.clone() }
    }

    pub fn accelerometer(&self) -> SimAccelerometer {
        SimAccelerometer { sim: self.clone() }
    }

    pub fn clock(&self) -> VirtualClock {
        VirtualClock { sim: self.clone() }
    }

    pub fn now(&self) -> Duration {
        self.world().now
    }

    pub fn joint(&self, leg: Leg, joint: Joint) -> i32 {
        self.world().joints[leg][joint]
    }

    pub fn pose(&self, leg: Leg) -> LegPose {
        let [coxa, femur, tibia] = self.world().joints[leg];
        LegPose::new(coxa, femur, tibia)
    }

    pub fn set_pose(&self, leg: Leg, pose: LegPose) {
        self.world().joints[leg] = pose.as_array();
    }

    pub fn history(&self) -> Vec<MoveRecord> {
        self.world().history.clone()
    }

    pub fn clear_history(&self) {
        self.world().history.clear();
    }

    pub fn moves_of(&self, leg: Leg, joint: Joint) -> usize {
        self.world()
            .history
            .iter()
            .filter(|record| record.leg == leg && record.joint == joint)
            .count()
    }

    /// Queue raw switch samples; they are consumed before any other model.
    pub fn script_contact(&self, leg: Leg, samples: &[bool]) {
        self.world().feet[leg].script.extend(samples.iter().copied());
    }

    pub fn force_contact(&self, leg: Leg, pressed: Option<bool>) {
        self.world().feet[leg].forced = pressed;
    }

    /// Femur angle at which the foot touches the ground; `None` = never.
    pub fn set_ground_femur(&self, leg: Leg, femur: Option<i32>) {
        self.world().feet[leg].ground_femur = femur;
    }

    /// Tilt the body. The reported gravity vector yields exactly these angles.
    pub fn set_tilt(&self, roll_deg: f32, pitch_deg: f32) {
        let (roll, pitch) = (roll_deg.to_radians(), pitch_deg.to_radians());
        let acceleration = [
            -pitch.sin(),
            pitch.cos() * roll.sin(),
            pitch.cos() * roll.cos(),
        ];
        self.world().acceleration = Some(acceleration);
    }

    pub fn set_acceleration(&self, acceleration: Option<[f32; 3]>) {
        self.world().acceleration = acceleration;
    }

    pub fn set_accelerometer_present(&self, present: bool) {
        self.world().accelerometer_present = present;
    }
}

pub struct SimActuators {
    sim: SimHexapod,
}

impl Actuators for SimActuators {
    fn move_joint(&mut self, leg: Leg, joint: Joint, angle: i32, duration: Duration) {
        let mut world = self.sim.world();
        world.joints[leg][joint] = angle;
        let at = world.now;
        world.history.push(MoveRecord {
            at,
            leg,
            joint,
            angle,
            duration,
        });
    }

    fn read_joint(&mut self, leg: Leg, joint: Joint) -> i32 {
        self.sim.world().joints[leg][joint]
    }
}

pub struct SimContacts {
    sim: SimHexapod,
}

impl ContactSensors for SimContacts {
    fn read_contact(&mut self, leg: Leg) -> bool {
        self.sim.world().contact(leg)
    }
}

pub struct SimAccelerometer {
    sim: SimHexapod,
}

impl Accelerometer for SimAccelerometer {
    fn is_present(&mut self) -> bool {
        self.sim.world().accelerometer_present
    }

    fn read_acceleration(&mut self) -> Option<[f32; 3]> {
        let world = self.sim.world();
        if world.accelerometer_present {
            world.acceleration
        } else {
            None
        }
    }
}

pub struct VirtualClock {
    sim: SimHexapod,
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        self.sim.world().now
    }

    fn sleep(&mut self, duration: Duration) {
        self.sim.world().now += duration;
    }
}
