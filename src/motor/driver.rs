// Servo bus adapter for the hexapod legs
//
// Maps (leg, joint) onto LX-16A servo ids and centi-degree angles onto servo
// units, so the controllers can drive the robot through `Actuators`.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info, warn};

use super::lx16a::{BROADCAST_ID, Lx16aBus, Lx16aError, MAX_MOVE_TIME_MS, MAX_POSITION};
use crate::robot::{Actuators, Joint, Leg};
use crate::robot::leg::{JOINTS_PER_LEG, LEG_COUNT};

/// Centi-degrees per servo unit (240 degrees over 1000 units).
pub const CENTIDEG_PER_UNIT: i32 = 24;

pub fn servo_id(leg: Leg, joint: Joint) -> u8 {
    (leg.actuator_index(joint) + 1) as u8
}

pub fn centideg_to_units(angle: i32) -> u16 {
    (angle / CENTIDEG_PER_UNIT).clamp(0, i32::from(MAX_POSITION)) as u16
}

pub fn units_to_centideg(units: i16) -> i32 {
    i32::from(units) * CENTIDEG_PER_UNIT
}

fn duration_to_ms(duration: Duration) -> u16 {
    duration.as_millis().min(u128::from(MAX_MOVE_TIME_MS)) as u16
}

pub struct ServoBusActuators<P: Read + Write + Send = Box<dyn SerialPort>> {
    bus: Lx16aBus<P>,
    commanded: [[i32; JOINTS_PER_LEG]; LEG_COUNT],
}

impl ServoBusActuators {
    pub fn open(port: &str, baudrate: u32, discard_echo: bool) -> Result<Self, Lx16aError> {
        info!("Opening servo bus on {} at {} baud", port, baudrate);
        let bus = Lx16aBus::open_with_baudrate(port, baudrate)?.with_echo_discard(discard_echo);
        Ok(Self::new(bus))
    }
}

impl<P: Read + Write + Send> ServoBusActuators<P> {
    pub fn new(bus: Lx16aBus<P>) -> Self {
        Self {
            bus,
            commanded: [[0; JOINTS_PER_LEG]; LEG_COUNT],
        }
    }

    /// Check every servo answers, power them and seed the commanded cache
    /// from their present positions.
    pub fn initialize(&mut self) -> Result<(), Lx16aError> {
        info!("Initializing {} leg servos", LEG_COUNT * JOINTS_PER_LEG);

        for leg in Leg::ALL {
            for joint in Joint::ALL {
                let id = servo_id(leg, joint);
                match self.bus.ping(id) {
                    Ok(true) => debug!("Servo {} ({} {}) responding", id, leg, joint),
                    Ok(false) => {
                        warn!("Servo {} ({} {}) not responding to ping", id, leg, joint);
                        return Err(Lx16aError::Timeout { id });
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        for leg in Leg::ALL {
            for joint in Joint::ALL {
                let id = servo_id(leg, joint);
                self.bus.set_torque(id, true)?;
                let units = self.bus.read_position(id)?;
                self.commanded[leg.index()][joint as usize] = units_to_centideg(units);
            }
        }

        info!("Servos initialized");
        Ok(())
    }

    /// Supply voltage as seen by the first servo, in millivolts.
    pub fn supply_voltage(&mut self) -> Result<u16, Lx16aError> {
        self.bus.read_voltage(servo_id(Leg::ALL[0], Joint::Coxa))
    }

    pub fn stop_all(&mut self) -> Result<(), Lx16aError> {
        info!("Stopping all servos");
        self.bus.stop(BROADCAST_ID)
    }
}

impl<P: Read + Write + Send> Actuators for ServoBusActuators<P> {
    fn move_joint(&mut self, leg: Leg, joint: Joint, angle: i32, duration: Duration) {
        let id = servo_id(leg, joint);
        self.commanded[leg.index()][joint as usize] = angle;
        if let Err(e) = self
            .bus
            .move_time_write(id, centideg_to_units(angle), duration_to_ms(duration))
        {
            warn!("Move of servo {} ({} {}) failed: {}", id, leg, joint, e);
        }
    }

    fn read_joint(&mut self, leg: Leg, joint: Joint) -> i32 {
        let id = servo_id(leg, joint);
        match self.bus.read_position(id) {
            Ok(units) => units_to_centideg(units),
            Err(e) => {
                let fallback = self.commanded[leg.index()][joint as usize];
                warn!(
                    "Position read of servo {} failed ({}), using commanded {}",
                    id, e, fallback
                );
                fallback
            }
        }
    }
}

impl<P: Read + Write + Send> Drop for ServoBusActuators<P> {
    fn drop(&mut self) {
        if let Err(e) = self.stop_all() {
            warn!("Failed to stop servos on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::lx16a::Command;
    use crate::motor::lx16a::tests::{MockPort, reply};

    fn leg(id: u8) -> Leg {
        Leg::new(id).unwrap()
    }

    #[test]
    fn test_servo_ids() {
        assert_eq!(servo_id(leg(0), Joint::Coxa), 1);
        assert_eq!(servo_id(leg(0), Joint::Tibia), 3);
        assert_eq!(servo_id(leg(2), Joint::Femur), 8);
        assert_eq!(servo_id(leg(5), Joint::Tibia), 18);
    }

    #[test]
    fn test_unit_conversion() {
        assert_eq!(centideg_to_units(12000), 500);
        assert_eq!(centideg_to_units(-100), 0);
        assert_eq!(centideg_to_units(30000), MAX_POSITION);
        assert_eq!(units_to_centideg(500), 12000);
        assert_eq!(units_to_centideg(-2), -48);
    }

    #[test]
    fn test_move_writes_servo_frame() {
        let mut actuators = ServoBusActuators::new(Lx16aBus::with_port(MockPort::default()));
        actuators.move_joint(leg(1), Joint::Femur, 17040, Duration::from_millis(140));

        // id 5, 17040 / 24 = 710 units, 140 ms
        let expected = reply(5, Command::MoveTimeWrite, &[0xC6, 0x02, 0x8C, 0x00]);
        assert_eq!(actuators.bus.port().tx, expected);
    }

    #[test]
    fn test_read_falls_back_to_commanded() {
        let mut actuators = ServoBusActuators::new(Lx16aBus::with_port(MockPort::default()));
        actuators.move_joint(leg(3), Joint::Tibia, 7000, Duration::from_millis(100));
        assert_eq!(actuators.read_joint(leg(3), Joint::Tibia), 7000);
    }

    #[test]
    fn test_read_joint_converts_units() {
        let mut port = MockPort::default();
        port.rx.extend(reply(10, Command::PosRead, &500i16.to_le_bytes()));
        let mut actuators = ServoBusActuators::new(Lx16aBus::with_port(port));
        assert_eq!(actuators.read_joint(leg(3), Joint::Coxa), 12000);
    }

    #[test]
    fn test_initialize_fails_on_missing_servo() {
        let mut port = MockPort::default();
        port.rx.extend(reply(1, Command::IdRead, &[1]));
        let mut actuators = ServoBusActuators::new(Lx16aBus::with_port(port));
        assert!(matches!(
            actuators.initialize(),
            Err(Lx16aError::Timeout { id: 2 })
        ));
    }
}
