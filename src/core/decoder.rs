//! Wire frame decoding.
//!
//! Frame layout (integers little-endian):
//!
//! ```text
//! offset  size  field
//! 0       2     command: FF FA = PPG, FF FB = accelerometer
//! 2       4     timestamp (u32)
//! 6       1     payload length L
//! 7       L     payload
//! 7+L     1     checksum = XOR of bytes [0, 7+L)
//! ```
//!
//! Decoding is pure. A rejected frame is never partially decoded.

use crate::core::types::{AccelBatch, AccelSample, PpgBatch, SampleBatch};

/// Command bytes of a PPG frame.
pub const PPG_COMMAND: [u8; 2] = [0xFF, 0xFA];

/// Command bytes of an accelerometer frame.
pub const ACCEL_COMMAND: [u8; 2] = [0xFF, 0xFB];

/// Header size: command, timestamp and length byte.
pub const HEADER_LEN: usize = 7;

/// Minimum PPG frame: header, one sample, checksum.
pub const PPG_MIN_FRAME_LEN: usize = 10;

/// Minimum accelerometer frame: header, one triple, checksum.
pub const ACCEL_MIN_FRAME_LEN: usize = 14;

const PPG_SAMPLE_BYTES: usize = 2;
const ACCEL_SAMPLE_BYTES: usize = 6;

/// Why a frame was rejected (or could not be built).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    UnknownCommand([u8; 2]),
    TooShort { len: usize, min: usize },
    Truncated { declared: usize, available: usize },
    ChecksumMismatch { expected: u8, actual: u8 },
    BadPayloadLength { len: usize, multiple: usize },
    PayloadTooLong(usize),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::UnknownCommand(cmd) => {
                write!(f, "Unknown command {:02X} {:02X}", cmd[0], cmd[1])
            }
            FrameError::TooShort { len, min } => {
                write!(f, "Frame too short: {len} bytes, need at least {min}")
            }
            FrameError::Truncated {
                declared,
                available,
            } => write!(
                f,
                "Frame truncated: payload declares {declared} bytes, {available} available"
            ),
            FrameError::ChecksumMismatch { expected, actual } => write!(
                f,
                "Checksum mismatch: computed {expected:#04x}, frame carries {actual:#04x}"
            ),
            FrameError::BadPayloadLength { len, multiple } => {
                write!(f, "Payload length {len} is not a multiple of {multiple}")
            }
            FrameError::PayloadTooLong(len) => {
                write!(f, "Payload of {len} bytes does not fit a frame")
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// XOR of all bytes.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Decode a frame, dropping the rejection reason.
pub fn decode(bytes: &[u8]) -> Option<SampleBatch> {
    decode_frame(bytes).ok()
}

/// Decode a frame into a sample batch.
pub fn decode_frame(bytes: &[u8]) -> Result<SampleBatch, FrameError> {
    if bytes.len() < 2 {
        return Err(FrameError::TooShort {
            len: bytes.len(),
            min: PPG_MIN_FRAME_LEN,
        });
    }

    let command = [bytes[0], bytes[1]];
    let min = match command {
        PPG_COMMAND => PPG_MIN_FRAME_LEN,
        ACCEL_COMMAND => ACCEL_MIN_FRAME_LEN,
        other => return Err(FrameError::UnknownCommand(other)),
    };
    if bytes.len() < min {
        return Err(FrameError::TooShort {
            len: bytes.len(),
            min,
        });
    }

    let timestamp = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
    let len = bytes[6] as usize;
    let end = HEADER_LEN + len;
    if end >= bytes.len() {
        return Err(FrameError::Truncated {
            declared: len,
            available: bytes.len().saturating_sub(HEADER_LEN + 1),
        });
    }

    let expected = checksum(&bytes[..end]);
    let actual = bytes[end];
    if expected != actual {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }

    let payload = &bytes[HEADER_LEN..end];
    match command {
        PPG_COMMAND => decode_ppg(timestamp, payload),
        _ => decode_accel(timestamp, payload),
    }
}

fn decode_ppg(timestamp: u32, payload: &[u8]) -> Result<SampleBatch, FrameError> {
    if payload.len() % PPG_SAMPLE_BYTES != 0 {
        return Err(FrameError::BadPayloadLength {
            len: payload.len(),
            multiple: PPG_SAMPLE_BYTES,
        });
    }

    let samples = payload
        .chunks_exact(PPG_SAMPLE_BYTES)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();

    Ok(SampleBatch::Ppg(PpgBatch { timestamp, samples }))
}

fn decode_accel(timestamp: u32, payload: &[u8]) -> Result<SampleBatch, FrameError> {
    if payload.len() % ACCEL_SAMPLE_BYTES != 0 {
        return Err(FrameError::BadPayloadLength {
            len: payload.len(),
            multiple: ACCEL_SAMPLE_BYTES,
        });
    }

    let samples = payload
        .chunks_exact(ACCEL_SAMPLE_BYTES)
        .map(|c| {
            AccelSample::new(
                i16::from_le_bytes([c[0], c[1]]),
                i16::from_le_bytes([c[2], c[3]]),
                i16::from_le_bytes([c[4], c[5]]),
            )
        })
        .collect();

    Ok(SampleBatch::Accel(AccelBatch { timestamp, samples }))
}

/// Build a PPG frame.
pub fn encode_ppg(timestamp: u32, samples: &[u16]) -> Result<Vec<u8>, FrameError> {
    let payload: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    encode(PPG_COMMAND, timestamp, &payload)
}

/// Build an accelerometer frame.
pub fn encode_accel(timestamp: u32, samples: &[AccelSample]) -> Result<Vec<u8>, FrameError> {
    let payload: Vec<u8> = samples
        .iter()
        .flat_map(|s| {
            let [x0, x1] = s.x.to_le_bytes();
            let [y0, y1] = s.y.to_le_bytes();
            let [z0, z1] = s.z.to_le_bytes();
            [x0, x1, y0, y1, z0, z1]
        })
        .collect();
    encode(ACCEL_COMMAND, timestamp, &payload)
}

fn encode(command: [u8; 2], timestamp: u32, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u8::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLong(payload.len()))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + 1);
    frame.extend_from_slice(&command);
    frame.extend_from_slice(&timestamp.to_le_bytes());
    frame.push(len);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame));
    Ok(frame)
}
