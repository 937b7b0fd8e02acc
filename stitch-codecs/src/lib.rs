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

//! Decodes two compressed video streams side by side and writes the selected
//! luma planes out as grayscale images.
//!
//! A [`Coordinator`] owns one [`DecodeSession`] per input. Each round it loads
//! a chunk into both sessions, steps each session until its chunk is used up,
//! and hands the frames its [`SelectionPolicy`] picks to a [`FrameSink`].

pub mod chunk;
pub mod coordinator;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod policy;
pub mod session;
pub mod writer;

pub use chunk::{ChunkLoader, CompressedChunk, DEFAULT_CHUNK_SIZE, DEFAULT_PADDING};
pub use coordinator::{Coordinator, StitchConfig, StitchReport, StreamInput, StreamReport};
pub use decoder::{open_decoder, DecoderConfig, FrameDecoder, VideoCodec};
pub use error::{Result, StitchError};
pub use frame::{DecodedFrame, FrameView, StreamId};
pub use policy::{DecodeErrorPolicy, EndPolicy, SelectionMode, SelectionPolicy};
pub use session::{DecodeSession, SessionConfig, SessionStats};
pub use writer::{FrameSink, FrameWriter, MemorySink, OutputFormat, OutputTarget};
