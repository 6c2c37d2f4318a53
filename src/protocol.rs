//! Frame codec for the module's binary protocol.
//!
//! Requests are always 8 bytes long:
//! ```text
//! [addr][func][field2 hi][field2 lo][field3 hi][field3 lo][crc lo][crc hi]
//! ```
//! For a read (`0x03`), `field2` is the first register and `field3` the register count; the
//! response is `[addr][0x03][bytecount][count x 2 bytes][crc]`. For a write (`0x06`), `field2`
//! is the register and `field3` the value; the response echoes the request.

use crate::constants::*;
use crate::data::Register;
use crate::errors::*;
use crate::num_utils::{be_u16, crc16, hex_dump};

/// Length of every request frame, and of a write echo.
pub const FRAME_LEN: usize = 8;

/// A validated response, classified by function code and address echo.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// The 9-register telemetry bundle, raw wire values.
    Telemetry([u16; 9]),
    /// Echo of a single-register write the module accepted.
    WriteEcho(Register, u16),
    /// A valid frame which doesn't match anything we ask for.
    Unrecognized(Vec<u8>)
}

fn request (slave: u8, function: u8, field2: u16, field3: u16) -> [u8; FRAME_LEN] {
    let mut frame = [0_u8; FRAME_LEN];
    frame[0] = slave;
    frame[1] = function;
    frame[2..4].copy_from_slice (&field2.to_be_bytes());
    frame[4..6].copy_from_slice (&field3.to_be_bytes());
    let crc = crc16 (&frame[..FRAME_LEN - 2]);
    frame[6..8].copy_from_slice (&crc.to_le_bytes());
    frame
}

/// Builds a "read holding registers" request.
///
/// # Example
/// ```
/// # use dpsctl::protocol::read_request;
/// assert_eq!(read_request (1, 0x00, 9), [0x01, 0x03, 0x00, 0x00, 0x00, 0x09, 0x85, 0xCC]);
/// ```
pub fn read_request (slave: u8, start: u16, count: u16) -> [u8; FRAME_LEN] {
    request (slave, FN_READ_HOLDING, start, count)
}

/// Builds a "write single register" request.
pub fn write_request (slave: u8, register: u16, value: u16) -> [u8; FRAME_LEN] {
    request (slave, FN_WRITE_SINGLE, register, value)
}

/// Total length of the response to a read of `count` registers.
pub fn read_response_len (count: u16) -> usize {
    5 + 2 * count as usize
}

/// Whether `frame` is (the start of) an exception response, which is always 5 bytes long.
pub fn is_exception (frame: &[u8]) -> bool {
    frame.len() >= 5 && frame[1] & 0x80 != 0
}

/// Validates the checksum of a complete frame and classifies it.
///
/// Nothing in the payload is looked at before the checksum matches.
pub fn decode (frame: &[u8]) -> Result<Response> {
    if frame.len() < 4 {
        bail!(ErrorKind::ShortFrame (frame.len()));
    }
    let (body, tail) = frame.split_at (frame.len() - 2);
    let computed = crc16 (body);
    let received = u16::from_le_bytes ([tail[0], tail[1]]);
    if computed != received {
        bail!(ErrorKind::BadChecksum (computed, received));
    }

    match body[1] {
        FN_READ_HOLDING if body.len() == read_response_len (TELEMETRY_COUNT) - 2
            && body[2] as usize == 2 * TELEMETRY_COUNT as usize =>
        {
            let mut raw = [0_u16; 9];
            for (index, value) in raw.iter_mut().enumerate() {
                *value = be_u16 (&body[3 + 2 * index..]);
            }
            Ok(Response::Telemetry (raw))
        },
        FN_WRITE_SINGLE if body.len() == FRAME_LEN - 2 => {
            match Register::writable (be_u16 (&body[2..])) {
                Some(register) => Ok(Response::WriteEcho (register, be_u16 (&body[4..]))),
                None => Ok(Response::Unrecognized (frame.to_vec()))
            }
        },
        function if function & 0x80 != 0 && body.len() == 3 => {
            bail!(ErrorKind::DeviceException (function & 0x7F, body[2]))
        },
        _ => Ok(Response::Unrecognized (frame.to_vec()))
    }
}

impl Response {
    /// Hex dump of an unrecognized frame, empty for everything else.
    pub fn dump (&self) -> String {
        match *self {
            Response::Unrecognized (ref frame) => hex_dump (frame),
            _ => String::new()
        }
    }
}
