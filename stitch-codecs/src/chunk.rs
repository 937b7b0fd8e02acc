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

//! Fixed-size input chunks and the loader that refills them from a stream.

use crate::error::{Result, StitchError};
use crate::frame::StreamId;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use tracing::trace;

/// Number of payload bytes read from a stream per round.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;
/// Zeroed bytes kept after the payload so a decoder that reads ahead past the
/// end of its input never sees stale data.
pub const DEFAULT_PADDING: usize = 64;

/// An owned input buffer: `chunk_size` payload bytes followed by `padding`
/// bytes that are always zero past the valid length.
pub struct CompressedChunk {
    buf: Vec<u8>,
    len: usize,
    chunk_size: usize,
}

impl CompressedChunk {
    pub fn new(chunk_size: usize, padding: usize) -> Self {
        Self {
            buf: vec![0; chunk_size + padding],
            len: 0,
            chunk_size,
        }
    }

    /// Maximum number of payload bytes a single load can place in the chunk.
    pub fn capacity(&self) -> usize {
        self.chunk_size
    }

    /// Number of valid payload bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The valid payload.
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.chunk_size);
        self.len = len;
        self.buf[len..].fill(0);
    }
}

/// Reads fixed-size chunks from one input stream.
///
/// Short reads from the underlying reader are retried until the chunk is full
/// or the reader reports end-of-stream, so only the final chunk of a stream
/// can be short. Once end-of-stream is seen every later load yields zero bytes.
pub struct ChunkLoader<R> {
    reader: R,
    stream: StreamId,
    eof: bool,
    bytes_loaded: u64,
}

impl ChunkLoader<File> {
    /// Opens an input file for binary reading.
    pub fn open(stream: StreamId, path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| StitchError::ResourceUnavailable {
            what: "input stream",
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(stream, file))
    }
}

impl<R: Read> ChunkLoader<R> {
    pub fn new(stream: StreamId, reader: R) -> Self {
        Self {
            reader,
            stream,
            eof: false,
            bytes_loaded: 0,
        }
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn bytes_loaded(&self) -> u64 {
        self.bytes_loaded
    }

    /// Refills `chunk` with the next bytes of the stream and returns how many
    /// were read. Zero means the stream is exhausted; it is not an error.
    pub fn load(&mut self, chunk: &mut CompressedChunk) -> Result<usize> {
        if self.eof {
            chunk.set_len(0);
            return Ok(0);
        }

        let capacity = chunk.capacity();
        let mut filled = 0;
        while filled < capacity {
            match self.reader.read(&mut chunk.buf[filled..capacity]) {
                Ok(0) => {
                    trace!(
                        "Stream {}: end of input after {} bytes",
                        self.stream,
                        self.bytes_loaded + filled as u64
                    );
                    self.eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    chunk.set_len(0);
                    return Err(StitchError::Read {
                        stream: self.stream,
                        source,
                    });
                }
            }
        }

        chunk.set_len(filled);
        if filled > 0 {
            self.bytes_loaded += filled as u64;
        }
        Ok(filled)
    }
}
