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

//! A decode session drives one decoder over the chunks of one input stream.
//!
//! Per round the session is refilled with a chunk, then [`DecodeSession::step`]
//! is called until [`DecodeSession::has_pending_input`] turns false. After
//! the stream ends, [`DecodeSession::drain`] is called until it yields nothing
//! so frames the decoder still holds for reordering are not lost.

use crate::chunk::{ChunkLoader, CompressedChunk};
use crate::decoder::{open_decoder, DecoderConfig, FrameDecoder, VideoCodec};
use crate::error::{Result, StitchError};
use crate::frame::{FrameView, StreamId};
use serde::Serialize;
use std::io::Read;
use tracing::{trace, warn};

/// Consecutive calls that neither consume bytes nor produce a frame before the
/// rest of the chunk is abandoned.
pub const MAX_STALLED_STEPS: u32 = 3;

/// The bytes of the current chunk not yet offered to the decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketCursor {
    offset: usize,
    remaining: usize,
}

impl PacketCursor {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    fn reset(&mut self, len: usize) {
        self.offset = 0;
        self.remaining = len;
    }

    fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.remaining);
        self.offset += n;
        self.remaining -= n;
    }

    /// Moves to the end of the chunk and returns how many bytes were passed over.
    fn skip_to_end(&mut self) -> usize {
        let skipped = self.remaining;
        self.advance(skipped);
        skipped
    }
}

/// Counters kept for the lifetime of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub bytes_loaded: u64,
    pub bytes_consumed: u64,
    /// Bytes abandoned after a stall, a skipped chunk or end-of-stream.
    pub bytes_skipped: u64,
    pub decode_calls: u64,
    pub drain_calls: u64,
    pub frames_decoded: u64,
    pub frames_emitted: u64,
    pub decode_errors: u64,
    /// `step()` calls made with nothing left to offer. Always zero when the
    /// session is driven correctly.
    pub empty_steps: u64,
}

/// Sizes of the buffers owned by a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub chunk_size: usize,
    pub padding: usize,
    pub decoder: DecoderConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::chunk::DEFAULT_CHUNK_SIZE,
            padding: crate::chunk::DEFAULT_PADDING,
            decoder: DecoderConfig::default(),
        }
    }
}

pub struct DecodeSession {
    stream: StreamId,
    decoder: Box<dyn FrameDecoder>,
    chunk: CompressedChunk,
    cursor: PacketCursor,
    /// Index of the next frame to be emitted; also the emitted-frame count.
    frame_count: u64,
    stalled: u32,
    flushed: bool,
    stats: SessionStats,
}

impl DecodeSession {
    /// Opens a decoder for `codec` and allocates the session's chunk buffer.
    pub fn open(stream: StreamId, codec: VideoCodec, config: &SessionConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(StitchError::InvalidConfig(
                "chunk size must be at least one byte".to_string(),
            ));
        }
        let decoder = open_decoder(codec, &config.decoder)?;
        Ok(Self::new(stream, decoder, config.chunk_size, config.padding))
    }

    pub fn new(
        stream: StreamId,
        decoder: Box<dyn FrameDecoder>,
        chunk_size: usize,
        padding: usize,
    ) -> Self {
        Self {
            stream,
            decoder,
            chunk: CompressedChunk::new(chunk_size, padding),
            cursor: PacketCursor::default(),
            frame_count: 0,
            stalled: 0,
            flushed: false,
            stats: SessionStats::default(),
        }
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub fn codec(&self) -> VideoCodec {
        self.decoder.codec()
    }

    pub fn cursor(&self) -> PacketCursor {
        self.cursor
    }

    pub fn chunk(&self) -> &CompressedChunk {
        &self.chunk
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// The index the next emitted frame will carry.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn has_pending_input(&self) -> bool {
        !self.cursor.is_exhausted()
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Loads the next chunk of the stream and starts a round over it.
    /// Returns the number of bytes loaded; zero means the stream is exhausted.
    pub fn refill<R: Read>(&mut self, loader: &mut ChunkLoader<R>) -> Result<usize> {
        if self.has_pending_input() {
            self.discard_pending("a new chunk was loaded");
        }
        let loaded = loader.load(&mut self.chunk)?;
        self.feed_round();
        Ok(loaded)
    }

    /// Resets the cursor to cover the whole current chunk. Does not decode.
    pub fn feed_round(&mut self) {
        let len = self.chunk.len();
        self.cursor.reset(len);
        self.stalled = 0;
        self.stats.bytes_loaded += len as u64;
        if len > 0 {
            self.flushed = false;
        }
    }

    /// Offers the rest of the current chunk to the decoder once.
    ///
    /// Returns the frame completed by this call, if any. Must only be called
    /// while [`has_pending_input`](Self::has_pending_input) is true.
    pub fn step(&mut self) -> Result<Option<FrameView<'_>>> {
        if self.cursor.is_exhausted() {
            self.stats.empty_steps += 1;
            warn!(
                "Stream {}: step() called with an exhausted cursor",
                self.stream
            );
            return Ok(None);
        }

        let stream = self.stream;
        let remaining = self.cursor.remaining;
        let start = self.cursor.offset;
        self.stats.decode_calls += 1;

        let output = match self
            .decoder
            .decode(&self.chunk.data()[start..start + remaining])
        {
            Ok(output) => output,
            Err(e) => {
                self.stats.decode_errors += 1;
                return Err(StitchError::DecodeFailure {
                    stream,
                    frame: self.frame_count,
                    message: format!("{e:#}"),
                });
            }
        };

        if output.consumed > remaining {
            self.stats.decode_errors += 1;
            return Err(StitchError::DecodeFailure {
                stream,
                frame: self.frame_count,
                message: format!(
                    "decoder reported consuming {} bytes but only {remaining} were offered",
                    output.consumed
                ),
            });
        }

        self.cursor.advance(output.consumed);
        self.stats.bytes_consumed += output.consumed as u64;
        trace!(
            "Stream {stream}: decoder consumed {} of {remaining} bytes",
            output.consumed
        );

        if output.frame.is_some() {
            self.stalled = 0;
            self.stats.frames_decoded += 1;
        } else if output.consumed == 0 {
            self.stalled += 1;
            if self.stalled > MAX_STALLED_STEPS {
                let skipped = self.cursor.skip_to_end();
                self.stats.bytes_skipped += skipped as u64;
                self.stalled = 0;
                warn!(
                    "Stream {stream}: decoder made no progress after {MAX_STALLED_STEPS} calls, skipping {skipped} bytes"
                );
            }
        } else {
            self.stalled = 0;
        }

        Ok(output.frame)
    }

    /// Offers the decoder empty input so it releases a frame it is holding.
    ///
    /// Call repeatedly until it returns `None`. After the first `None` the
    /// session is flushed and further calls return `None` without reaching
    /// the decoder.
    pub fn drain(&mut self) -> Result<Option<FrameView<'_>>> {
        if self.flushed {
            return Ok(None);
        }
        if self.has_pending_input() {
            self.discard_pending("the stream is being drained");
        }

        let stream = self.stream;
        self.stats.drain_calls += 1;
        let output = match self.decoder.decode(&[]) {
            Ok(output) => output,
            Err(e) => {
                self.stats.decode_errors += 1;
                self.flushed = true;
                return Err(StitchError::DecodeFailure {
                    stream,
                    frame: self.frame_count,
                    message: format!("{e:#}"),
                });
            }
        };

        if output.frame.is_some() {
            self.stats.frames_decoded += 1;
        } else {
            self.flushed = true;
        }
        Ok(output.frame)
    }

    /// Abandons the rest of the current chunk, e.g. after a decode error.
    pub fn skip_round(&mut self) {
        let skipped = self.cursor.skip_to_end();
        self.stats.bytes_skipped += skipped as u64;
        self.stalled = 0;
    }

    /// Records that the frame numbered [`frame_count`](Self::frame_count) was
    /// written and returns its index.
    pub fn record_emitted(&mut self) -> u64 {
        let index = self.frame_count;
        self.frame_count += 1;
        self.stats.frames_emitted += 1;
        index
    }

    fn discard_pending(&mut self, reason: &str) {
        let skipped = self.cursor.skip_to_end();
        self.stats.bytes_skipped += skipped as u64;
        warn!(
            "Stream {}: discarding {skipped} undecoded bytes because {reason}",
            self.stream
        );
    }
}
