// Motion control: ground contact, gaits, balance and the mode state machine
pub mod balance;
pub mod contact;
pub mod gait;
pub mod mode;
pub mod pid;

pub use balance::BalanceController;
pub use contact::{GroundContactController, TripodLanding};
pub use gait::GaitEngine;
pub use mode::RobotModeController;
pub use pid::{PidController, PidGains};
