// LewanSoul / Hiwonder LX-16A serial bus servo protocol
//
// Half-duplex UART, 115200 8N1.
// Packet format: [0x55, 0x55, ID, Length, Command, Params..., Checksum]
// Length counts itself, the command, the params and the checksum.
// Checksum = !(ID + Length + Command + Params) & 0xFF
//
// Positions are servo units 0..=1000 over 0..240 degrees.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tracing::debug;

pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 50;

pub const BROADCAST_ID: u8 = 0xFE;
pub const MAX_POSITION: u16 = 1000;
pub const MAX_MOVE_TIME_MS: u16 = 30_000;

const HEADER: [u8; 2] = [0x55, 0x55];

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    MoveTimeWrite = 1,
    MoveStop = 12,
    IdRead = 14,
    VinRead = 27,
    PosRead = 28,
    LoadOrUnloadWrite = 31,
}

#[derive(Debug, thiserror::Error)]
pub enum Lx16aError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from servo {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for servo {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Timeout waiting for response from servo {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, Lx16aError>;

/// One LX-16A bus. Generic over the port so tests can script the wire.
pub struct Lx16aBus<P = Box<dyn SerialPort>> {
    port: P,
    discard_echo: bool,
}

impl Lx16aBus {
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;
        Ok(Self::with_port(port))
    }
}

impl<P: Read + Write> Lx16aBus<P> {
    pub fn with_port(port: P) -> Self {
        Self {
            port,
            discard_echo: false,
        }
    }

    /// One-wire adapters that tie TX to RX read back every byte they send.
    pub fn with_echo_discard(mut self, discard: bool) -> Self {
        self.discard_echo = discard;
        self
    }

    fn checksum(data: &[u8]) -> u8 {
        let sum: u32 = data.iter().map(|&b| u32::from(b)).sum();
        !(sum as u8)
    }

    fn build_packet(id: u8, command: Command, params: &[u8]) -> Vec<u8> {
        let length = (params.len() + 3) as u8;
        let mut packet = Vec::with_capacity(6 + params.len());

        packet.extend_from_slice(&HEADER);
        packet.push(id);
        packet.push(length);
        packet.push(command as u8);
        packet.extend_from_slice(params);

        let checksum = Self::checksum(&packet[2..]);
        packet.push(checksum);
        packet
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        if self.discard_echo {
            let mut echo = vec![0u8; packet.len()];
            self.port.read_exact(&mut echo)?;
        }
        Ok(())
    }

    fn read_exact_or_timeout(&mut self, buf: &mut [u8], id: u8) -> Result<()> {
        self.port.read_exact(buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::UnexpectedEof => {
                Lx16aError::Timeout { id }
            }
            _ => Lx16aError::Io(e),
        })
    }

    /// Read a reply and return its params (without command and checksum).
    fn read_response(&mut self, expected_id: u8, expected_command: Command) -> Result<Vec<u8>> {
        let mut head = [0u8; 4];
        self.read_exact_or_timeout(&mut head, expected_id)?;

        if head[..2] != HEADER {
            return Err(Lx16aError::InvalidResponse {
                id: expected_id,
                reason: format!("Invalid header: {:02X?}", &head[..2]),
            });
        }
        let id = head[2];
        let length = head[3] as usize;
        if id != expected_id {
            return Err(Lx16aError::InvalidResponse {
                id: expected_id,
                reason: format!("ID mismatch: expected {}, got {}", expected_id, id),
            });
        }
        if length < 3 {
            return Err(Lx16aError::InvalidResponse {
                id,
                reason: format!("Length {} too short", length),
            });
        }

        // command + params + checksum
        let mut body = vec![0u8; length - 1];
        self.read_exact_or_timeout(&mut body, id)?;

        let (checksum, payload) = body.split_last().ok_or(Lx16aError::Timeout { id })?;
        let mut checked = vec![id, length as u8];
        checked.extend_from_slice(payload);
        if Self::checksum(&checked) != *checksum {
            return Err(Lx16aError::ChecksumMismatch { id });
        }
        if payload[0] != expected_command as u8 {
            return Err(Lx16aError::InvalidResponse {
                id,
                reason: format!(
                    "Command mismatch: expected {}, got {}",
                    expected_command as u8, payload[0]
                ),
            });
        }
        Ok(payload[1..].to_vec())
    }

    fn query(&mut self, id: u8, command: Command, expected_len: usize) -> Result<Vec<u8>> {
        let packet = Self::build_packet(id, command, &[]);
        self.send_packet(&packet)?;
        let params = self.read_response(id, command)?;
        if params.len() < expected_len {
            return Err(Lx16aError::InvalidResponse {
                id,
                reason: format!("Expected {} bytes, got {}", expected_len, params.len()),
            });
        }
        Ok(params)
    }

    /// Move to `position` (0..=1000) over `time_ms`. No reply.
    pub fn move_time_write(&mut self, id: u8, position: u16, time_ms: u16) -> Result<()> {
        let position = position.min(MAX_POSITION).to_le_bytes();
        let time = time_ms.min(MAX_MOVE_TIME_MS).to_le_bytes();
        let packet = Self::build_packet(
            id,
            Command::MoveTimeWrite,
            &[position[0], position[1], time[0], time[1]],
        );
        self.send_packet(&packet)
    }

    pub fn stop(&mut self, id: u8) -> Result<()> {
        let packet = Self::build_packet(id, Command::MoveStop, &[]);
        self.send_packet(&packet)
    }

    /// Present position in servo units. Can be slightly negative near 0.
    pub fn read_position(&mut self, id: u8) -> Result<i16> {
        let params = self.query(id, Command::PosRead, 2)?;
        Ok(i16::from_le_bytes([params[0], params[1]]))
    }

    /// Supply voltage in millivolts.
    pub fn read_voltage(&mut self, id: u8) -> Result<u16> {
        let params = self.query(id, Command::VinRead, 2)?;
        Ok(u16::from_le_bytes([params[0], params[1]]))
    }

    /// True when a servo with this id answers.
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        match self.query(id, Command::IdRead, 1) {
            Ok(params) => Ok(params[0] == id),
            Err(Lx16aError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn set_torque(&mut self, id: u8, enabled: bool) -> Result<()> {
        debug!("Servo {}: torque {}", id, if enabled { "on" } else { "off" });
        let packet = Self::build_packet(id, Command::LoadOrUnloadWrite, &[u8::from(enabled)]);
        self.send_packet(&packet)
    }

    #[cfg(test)]
    pub(crate) fn port(&self) -> &P {
        &self.port
    }
}
