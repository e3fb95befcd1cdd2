//! Fixed-length checksummed packet framing for programmable loads.
//!
//! Every packet on the wire is exactly [`FRAME_LEN`] bytes:
//! - A start marker (`0xAA`) for stream synchronization
//! - A bus address and a command code
//! - A 20-byte little-endian payload, zero padded
//! - A trailing modulo-256 sum of everything before it
//!
//! [`FrameReader`] realigns on the start marker when the stream carries
//! leading garbage, so callers always get a start-aligned frame.

pub mod codec;
pub mod error;
pub mod locator;
pub mod reader;
pub mod writer;

pub use codec::{
    checksum, decode_frame, encode_frame, pad_payload, verify_checksum, Decoded, Frame, Payload,
    CHECKSUM_OFFSET, FRAME_LEN, PAYLOAD_LEN, START_MARKER,
};
pub use error::{FrameError, Result};
pub use locator::locate_frame;
pub use reader::FrameReader;
pub use writer::FrameWriter;
