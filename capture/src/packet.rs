//! Result transport packets
//!
//! # Design
//! All packets start with a common [Header], little-endian and packed:
//!
//! * **Check code 250130** (u32): a constant identifying valid frames.
//! * **Command** (u8): the packet type, see [Command].
//! * **Parameters** (3 x u8): reserved, zero.
//!
//! ## Data (`0x09`)
//! The header is followed by eight `i32` channel delays. Slots beyond the active channel count
//! are zero.
//!
//! ## About (`0x01`)
//! The header is followed by the device identifier (u64), the firmware version (3 x u8), the
//! channel count (u8) and the timestamp rate in Hz (u32). A peer requests it by sending a bare
//! `0x01` header.
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{ResultVector, MAX_CHANNELS};

/// Constant leading every valid frame.
pub const CHECK_CODE: u32 = 250_130;

pub const HEADER_SIZE: usize = 8;
pub const DATA_SIZE: usize = HEADER_SIZE + MAX_CHANNELS * 4;
pub const ABOUT_SIZE: usize = HEADER_SIZE + 8 + 3 + 1 + 4;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum Command {
    /// Device identification.
    About = 0x01,
    /// Detection result.
    Data = 0x09,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Frame too short ({0} bytes)")]
    TooShort(usize),
    #[error("Invalid check code {0}")]
    CheckCode(u32),
    #[error("Unknown command {0:#04x}")]
    UnknownCommand(u8),
    #[error("Unexpected command {0:?}")]
    UnexpectedCommand(Command),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Header {
    pub command: Command,
    pub params: [u8; 3],
}

impl Header {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            params: [0; 3],
        }
    }

    /// Parse and validate the header of a frame.
    pub fn parse(frame: &[u8]) -> Result<Self, Error> {
        let header: &[u8; HEADER_SIZE] = frame
            .get(..HEADER_SIZE)
            .and_then(|header| header.try_into().ok())
            .ok_or(Error::TooShort(frame.len()))?;

        let [c0, c1, c2, c3, command, p0, p1, p2] = *header;
        let code = u32::from_le_bytes([c0, c1, c2, c3]);
        if code != CHECK_CODE {
            return Err(Error::CheckCode(code));
        }

        let command =
            Command::try_from(command).map_err(|e| Error::UnknownCommand(e.number))?;

        Ok(Self {
            command,
            params: [p0, p1, p2],
        })
    }

    fn write(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&CHECK_CODE.to_le_bytes());
        buf[4] = self.command.into();
        buf[5..HEADER_SIZE].copy_from_slice(&self.params);
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0; HEADER_SIZE];
        self.write(&mut buf);
        buf
    }
}

/// A detection result on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Data {
    pub delays: [i32; MAX_CHANNELS],
}

impl From<&ResultVector> for Data {
    fn from(result: &ResultVector) -> Self {
        let mut delays = [0; MAX_CHANNELS];
        delays[..result.channels()].copy_from_slice(result.delays());
        Self { delays }
    }
}

impl Data {
    pub fn encode(&self) -> [u8; DATA_SIZE] {
        let mut buf = [0; DATA_SIZE];
        Header::new(Command::Data).write(&mut buf);
        for (chunk, delay) in buf[HEADER_SIZE..].chunks_exact_mut(4).zip(self.delays) {
            chunk.copy_from_slice(&delay.to_le_bytes());
        }
        buf
    }

    pub fn decode(frame: &[u8]) -> Result<Self, Error> {
        let header = Header::parse(frame)?;
        if header.command != Command::Data {
            return Err(Error::UnexpectedCommand(header.command));
        }
        let body = frame
            .get(HEADER_SIZE..DATA_SIZE)
            .ok_or(Error::TooShort(frame.len()))?;

        let mut delays = [0; MAX_CHANNELS];
        for (delay, chunk) in delays.iter_mut().zip(body.chunks_exact(4)) {
            *delay = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(Self { delays })
    }
}

/// Device identification.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct About {
    pub device_id: u64,
    pub version: [u8; 3],
    pub channels: u8,
    pub sample_rate: u32,
}

impl About {
    pub fn encode(&self) -> [u8; ABOUT_SIZE] {
        let mut buf = [0; ABOUT_SIZE];
        Header::new(Command::About).write(&mut buf);
        buf[8..16].copy_from_slice(&self.device_id.to_le_bytes());
        buf[16..19].copy_from_slice(&self.version);
        buf[19] = self.channels;
        buf[20..24].copy_from_slice(&self.sample_rate.to_le_bytes());
        buf
    }

    pub fn decode(frame: &[u8]) -> Result<Self, Error> {
        let header = Header::parse(frame)?;
        if header.command != Command::About {
            return Err(Error::UnexpectedCommand(header.command));
        }
        let body: &[u8; ABOUT_SIZE - HEADER_SIZE] = frame
            .get(HEADER_SIZE..ABOUT_SIZE)
            .and_then(|body| body.try_into().ok())
            .ok_or(Error::TooShort(frame.len()))?;

        let [i0, i1, i2, i3, i4, i5, i6, i7, v0, v1, v2, channels, r0, r1, r2, r3] = *body;
        Ok(Self {
            device_id: u64::from_le_bytes([i0, i1, i2, i3, i4, i5, i6, i7]),
            version: [v0, v1, v2],
            channels,
            sample_rate: u32::from_le_bytes([r0, r1, r2, r3]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let header = Header::new(Command::Data).encode();
        assert_eq!(header, [0x12, 0xd1, 0x03, 0x00, 0x09, 0, 0, 0]);
        assert_eq!(Header::parse(&header), Ok(Header::new(Command::Data)));
    }

    #[test]
    fn reject_frames() {
        assert_eq!(Header::parse(&[0x12, 0xd1, 0x03]), Err(Error::TooShort(3)));

        let mut frame = Header::new(Command::About).encode();
        frame[0] ^= 1;
        assert_eq!(Header::parse(&frame), Err(Error::CheckCode(250_131)));

        let mut frame = Header::new(Command::About).encode();
        frame[4] = 0x42;
        assert_eq!(Header::parse(&frame), Err(Error::UnknownCommand(0x42)));
    }

    #[test]
    fn data_padding() {
        let result = ResultVector::from_timestamps(&[1050, 1000, 1200]).unwrap();
        let frame = Data::from(&result).encode();
        assert_eq!(frame.len(), 40);
        assert_eq!(frame[8..12], 50i32.to_le_bytes());
        assert_eq!(frame[20..], [0; 20]);

        let data = Data::decode(&frame).unwrap();
        assert_eq!(data.delays, [50, 0, 200, 0, 0, 0, 0, 0]);
        assert_eq!(Data::decode(&frame[..30]), Err(Error::TooShort(30)));
    }

    #[test]
    fn about_layout() {
        let about = About {
            device_id: 0x0480_e102_0304,
            version: [1, 0, 0],
            channels: 4,
            sample_rate: 10_000,
        };
        let frame = about.encode();
        assert_eq!(frame.len(), 24);
        assert_eq!(frame[4], 0x01);
        assert_eq!(frame[16..20], [1, 0, 0, 4]);
        assert_eq!(About::decode(&frame), Ok(about));
        assert_eq!(
            About::decode(&Data::default().encode()),
            Err(Error::UnexpectedCommand(Command::Data))
        );
    }
}
