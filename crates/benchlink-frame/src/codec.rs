use std::fmt;

use bytes::BufMut;

use crate::error::{FrameError, Result};

/// Total wire size of every frame.
pub const FRAME_LEN: usize = 26;

/// Payload bytes carried by a frame.
pub const PAYLOAD_LEN: usize = 20;

/// First byte of every frame.
pub const START_MARKER: u8 = 0xAA;

/// Offset of the trailing checksum byte.
pub const CHECKSUM_OFFSET: usize = FRAME_LEN - 1;

const ADDRESS_OFFSET: usize = 1;
const COMMAND_OFFSET: usize = 2;
const PAYLOAD_OFFSET: usize = 3;

/// Fixed-width frame payload.
pub type Payload = [u8; PAYLOAD_LEN];

/// One start-aligned frame, valid or not.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    bytes: [u8; FRAME_LEN],
}

impl Frame {
    /// Wrap raw bytes received from the wire.
    pub fn from_bytes(bytes: [u8; FRAME_LEN]) -> Self {
        Self { bytes }
    }

    /// The wire representation.
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    pub fn address(&self) -> u8 {
        self.bytes[ADDRESS_OFFSET]
    }

    pub fn command(&self) -> u8 {
        self.bytes[COMMAND_OFFSET]
    }

    pub fn payload(&self) -> Payload {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(&self.bytes[PAYLOAD_OFFSET..PAYLOAD_OFFSET + PAYLOAD_LEN]);
        payload
    }

    pub fn checksum(&self) -> u8 {
        self.bytes[CHECKSUM_OFFSET]
    }

    /// Whether the trailing checksum matches the rest of the frame.
    pub fn is_valid(&self) -> bool {
        verify_checksum(&self.bytes)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("address", &self.address())
            .field("command", &format_args!("{:#04x}", self.command()))
            .field("payload", &format_args!("{:02x?}", self.payload()))
            .field("checksum", &format_args!("{:#04x}", self.checksum()))
            .finish()
    }
}

/// Fields extracted from a frame, with the checksum verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    /// Command code echoed by the device.
    pub command: u8,
    pub payload: Payload,
    pub checksum_ok: bool,
}

/// Modulo-256 sum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Check the trailing checksum of a raw frame.
pub fn verify_checksum(bytes: &[u8; FRAME_LEN]) -> bool {
    checksum(&bytes[..CHECKSUM_OFFSET]) == bytes[CHECKSUM_OFFSET]
}

/// Build a frame.
///
/// Wire format:
/// ```text
/// ┌───────┬─────────┬─────────┬──────────────┬──────────┬──────────┐
/// │ Start │ Address │ Command │ Payload      │ Reserved │ Checksum │
/// │ 0xAA  │ (1B)    │ (1B)    │ (20B LE)     │ (2B, 0)  │ (1B)     │
/// └───────┴─────────┴─────────┴──────────────┴──────────┴──────────┘
/// ```
pub fn encode_frame(address: u8, command: u8, payload: &Payload) -> Frame {
    let mut bytes = [0u8; FRAME_LEN];
    {
        let mut dst = &mut bytes[..];
        dst.put_u8(START_MARKER);
        dst.put_u8(address);
        dst.put_u8(command);
        dst.put_slice(payload);
    }
    bytes[CHECKSUM_OFFSET] = checksum(&bytes[..CHECKSUM_OFFSET]);
    Frame { bytes }
}

/// Extract command and payload, trusted or not.
pub fn decode_frame(frame: &Frame) -> Decoded {
    Decoded {
        command: frame.command(),
        payload: frame.payload(),
        checksum_ok: frame.is_valid(),
    }
}

/// Zero-pad a short payload to [`PAYLOAD_LEN`] bytes.
pub fn pad_payload(data: &[u8]) -> Result<Payload> {
    if data.len() > PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge {
            size: data.len(),
            max: PAYLOAD_LEN,
        });
    }
    let mut payload = [0u8; PAYLOAD_LEN];
    payload[..data.len()].copy_from_slice(data);
    Ok(payload)
}
