use crate::codec::{Frame, FRAME_LEN, START_MARKER};
use crate::error::{FrameError, Result};

/// Align a received window on its first start marker.
///
/// `window` holds exactly one frame length of bytes read from the channel.
/// When the marker sits at offset `k > 0`, the `k` bytes before it are
/// discarded and `refill` is asked for exactly `k` further bytes to complete
/// the frame. A window without any marker is a framing failure; nothing is
/// pulled from the channel in that case.
///
/// The link never duplicates bytes, so the first marker is taken as the
/// frame start. A marker inside leading garbage yields a misaligned frame
/// that fails checksum verification downstream.
pub fn locate_frame<F>(window: [u8; FRAME_LEN], refill: F) -> Result<Frame>
where
    F: FnOnce(&mut [u8]) -> Result<()>,
{
    let offset = window
        .iter()
        .position(|b| *b == START_MARKER)
        .ok_or(FrameError::MarkerNotFound { len: FRAME_LEN })?;

    if offset == 0 {
        return Ok(Frame::from_bytes(window));
    }

    let kept = FRAME_LEN - offset;
    let mut aligned = [0u8; FRAME_LEN];
    aligned[..kept].copy_from_slice(&window[offset..]);
    refill(&mut aligned[kept..])?;

    tracing::debug!(discarded = offset, "realigned frame on start marker");
    Ok(Frame::from_bytes(aligned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_frame, PAYLOAD_LEN};

    fn valid_frame() -> Frame {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[..4].copy_from_slice(&12_345u32.to_le_bytes());
        encode_frame(0x01, 0x23, &payload)
    }

    /// Simulate a stream of `garbage ++ frame ++ trailer` and align on it.
    fn locate_after_garbage(garbage: &[u8]) -> (Frame, usize) {
        let frame = valid_frame();
        let mut stream = garbage.to_vec();
        stream.extend_from_slice(frame.as_bytes());
        stream.extend_from_slice(&[0x00; FRAME_LEN]);

        let mut window = [0u8; FRAME_LEN];
        window.copy_from_slice(&stream[..FRAME_LEN]);
        let mut consumed = FRAME_LEN;

        let located = locate_frame(window, |dst| {
            dst.copy_from_slice(&stream[consumed..consumed + dst.len()]);
            consumed += dst.len();
            Ok(())
        })
        .unwrap();
        (located, consumed)
    }

    #[test]
    fn aligned_window_is_returned_unchanged() {
        let (located, consumed) = locate_after_garbage(&[]);
        assert_eq!(located, valid_frame());
        assert_eq!(consumed, FRAME_LEN);
    }

    #[test]
    fn recovers_frame_after_leading_garbage() {
        for k in [1usize, 5, 24] {
            let garbage: Vec<u8> = (0..k).map(|i| (i as u8).wrapping_mul(3) | 0x01).collect();
            assert!(!garbage.contains(&START_MARKER));

            let (located, consumed) = locate_after_garbage(&garbage);
            assert_eq!(located, valid_frame(), "k = {k}");
            assert!(located.is_valid());
            assert_eq!(consumed, FRAME_LEN + k, "k = {k}");
        }
    }

    #[test]
    fn window_without_marker_is_framing_failure() {
        let window = [0x55u8; FRAME_LEN];
        let mut refilled = false;
        let result = locate_frame(window, |_| {
            refilled = true;
            Ok(())
        });
        assert!(matches!(
            result,
            Err(FrameError::MarkerNotFound { len: FRAME_LEN })
        ));
        assert!(!refilled);
    }

    #[test]
    fn refill_error_propagates() {
        let mut window = [0u8; FRAME_LEN];
        window[3] = START_MARKER;
        let result = locate_frame(window, |_| Err(FrameError::ConnectionClosed));
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }

    #[test]
    fn marker_inside_garbage_yields_invalid_frame() {
        let (located, _) = locate_after_garbage(&[0x01, START_MARKER, 0x02]);
        assert!(!located.is_valid());
    }
}
