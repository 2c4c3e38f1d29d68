// Robot model: leg identities, poses and the hardware seams
pub mod context;
pub mod leg;
pub mod posture;

pub use context::{
    Accelerometer, Actuators, Clock, ContactSensors, JointLimits, RobotContext, SystemClock,
};
pub use leg::{Joint, Leg, Side, Tripod, TripodPair};
pub use posture::{Direction, HipMap, LegPose, Turn};
