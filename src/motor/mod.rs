// Servo hardware for the hexapod legs
//
// - LX-16A serial bus protocol
// - `Actuators` adapter mapping legs and joints onto servo ids

pub mod driver;
pub mod lx16a;

pub use driver::{ServoBusActuators, servo_id};
pub use lx16a::{Lx16aBus, Lx16aError};
