/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! A synthetic decoder with a fully predictable consumption rule.

use super::{DecodeOutput, FrameDecoder, VideoCodec};
use crate::frame::FrameView;
use anyhow::bail;

pub const DEFAULT_MOCK_FRAME_BYTES: usize = 4096;

/// The 2x2 luma pattern every mock frame carries.
pub const MOCK_PATTERN: [u8; 4] = [0x00, 0x40, 0x80, 0xFF];

/// A unit starting with this byte is rejected as a corrupt packet.
pub const MOCK_CORRUPT_MARKER: u8 = 0xEE;

/// Emits one frame for every `frame_bytes` bytes it is offered.
///
/// Each call takes at most enough bytes to complete the current unit, so a
/// chunk of `C` bytes fed from an empty state produces `C / frame_bytes`
/// frames. A partial unit left at end-of-stream is released by a drain call.
pub struct MockDecoder {
    frame_bytes: usize,
    pending: usize,
    frames: u64,
    pattern: [u8; 4],
}

impl MockDecoder {
    pub fn new(frame_bytes: usize) -> Self {
        assert!(frame_bytes > 0, "mock frame size must be non-zero");
        Self {
            frame_bytes,
            pending: 0,
            frames: 0,
            pattern: MOCK_PATTERN,
        }
    }

    fn emit(&mut self, consumed: usize) -> anyhow::Result<DecodeOutput<'_>> {
        self.pending = 0;
        self.frames += 1;
        let view = FrameView::new(&self.pattern, 2, 2, 2)?;
        Ok(DecodeOutput::with_frame(consumed, view))
    }
}

impl FrameDecoder for MockDecoder {
    fn codec(&self) -> VideoCodec {
        VideoCodec::Mock
    }

    fn decode(&mut self, data: &[u8]) -> anyhow::Result<DecodeOutput<'_>> {
        if data.is_empty() {
            if self.pending > 0 {
                return self.emit(0);
            }
            return Ok(DecodeOutput::consumed(0));
        }

        if self.pending == 0 && data[0] == MOCK_CORRUPT_MARKER {
            bail!("corrupt packet marker at start of unit {}", self.frames);
        }

        let take = data.len().min(self.frame_bytes - self.pending);
        self.pending += take;
        if self.pending == self.frame_bytes {
            self.emit(take)
        } else {
            Ok(DecodeOutput::consumed(take))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_frame_per_unit() {
        let mut decoder = MockDecoder::new(4);
        let data = [0u8; 10];

        let out = decoder.decode(&data).unwrap();
        assert_eq!(out.consumed, 4);
        let frame = out.frame.unwrap();
        assert_eq!((frame.width(), frame.height()), (2, 2));
        assert_eq!(frame.to_packed(), MOCK_PATTERN.to_vec());

        let out = decoder.decode(&data[4..]).unwrap();
        assert_eq!(out.consumed, 4);
        assert!(out.frame.is_some());

        let out = decoder.decode(&data[8..]).unwrap();
        assert_eq!(out.consumed, 2);
        assert!(out.frame.is_none());
        assert_eq!(decoder.pending, 2);
    }

    #[test]
    fn units_span_calls() {
        let mut decoder = MockDecoder::new(5);
        assert!(decoder.decode(&[0; 3]).unwrap().frame.is_none());
        let out = decoder.decode(&[0; 3]).unwrap();
        assert_eq!(out.consumed, 2);
        assert!(out.frame.is_some());
    }

    #[test]
    fn drain_releases_partial_unit_once() {
        let mut decoder = MockDecoder::new(8);
        decoder.decode(&[1, 2, 3]).unwrap();
        assert!(decoder.decode(&[]).unwrap().frame.is_some());
        assert!(decoder.decode(&[]).unwrap().frame.is_none());
        assert_eq!(decoder.frames, 1);
    }

    #[test]
    fn drain_without_input_yields_nothing() {
        let mut decoder = MockDecoder::new(8);
        let out = decoder.decode(&[]).unwrap();
        assert_eq!(out.consumed, 0);
        assert!(out.frame.is_none());
    }

    #[test]
    fn corrupt_marker_is_rejected_at_unit_start_only() {
        let mut decoder = MockDecoder::new(4);
        assert!(decoder.decode(&[MOCK_CORRUPT_MARKER, 0]).is_err());
        decoder.decode(&[0, 0]).unwrap();
        // Mid-unit, the marker is just payload.
        assert!(decoder
            .decode(&[MOCK_CORRUPT_MARKER, 0])
            .unwrap()
            .frame
            .is_some());
    }
}
