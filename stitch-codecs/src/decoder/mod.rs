/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! The common interface for frame decoders.
//!
//! A decoder is opened with [`open_decoder`], fed through
//! [`FrameDecoder::decode`] and closed when dropped.

use crate::error::{Result, StitchError};
use crate::frame::FrameView;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::info;

mod mock;
pub use self::mock::{MockDecoder, DEFAULT_MOCK_FRAME_BYTES, MOCK_CORRUPT_MARKER, MOCK_PATTERN};

#[cfg(not(target_arch = "wasm32"))]
mod native;
#[cfg(not(target_arch = "wasm32"))]
pub use self::native::VpxDecoder;

/// An enumeration of the supported video codecs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    /// VP8, using libvpx.
    Vp8,
    /// VP9, using libvpx.
    #[default]
    Vp9,
    /// A synthetic decoder with a deterministic consumption rule, for testing
    /// and dry runs.
    Mock,
}

impl VideoCodec {
    pub fn name(self) -> &'static str {
        match self {
            VideoCodec::Vp8 => "vp8",
            VideoCodec::Vp9 => "vp9",
            VideoCodec::Mock => "mock",
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vp8" => Ok(VideoCodec::Vp8),
            "vp9" => Ok(VideoCodec::Vp9),
            "mock" => Ok(VideoCodec::Mock),
            _ => Err(format!("Unknown codec {s:?}, please use one of [vp8, vp9, mock]")),
        }
    }
}

/// Options passed to a decoder when it is opened.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Worker threads the codec library may use internally.
    pub threads: u32,
    /// Bytes the mock decoder consumes per produced frame.
    pub mock_frame_bytes: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            mock_frame_bytes: DEFAULT_MOCK_FRAME_BYTES,
        }
    }
}

/// The result of offering bytes to a decoder once.
pub struct DecodeOutput<'a> {
    /// How many of the offered bytes the decoder took. Never more than offered.
    pub consumed: usize,
    /// A complete frame, if one finished during this call.
    pub frame: Option<FrameView<'a>>,
}

impl<'a> DecodeOutput<'a> {
    pub fn consumed(consumed: usize) -> Self {
        Self {
            consumed,
            frame: None,
        }
    }

    pub fn with_frame(consumed: usize, frame: FrameView<'a>) -> Self {
        Self {
            consumed,
            frame: Some(frame),
        }
    }
}

/// The decoder capability driven by a decode session.
pub trait FrameDecoder: Send {
    fn codec(&self) -> VideoCodec;

    /// Offers `data` to the decoder.
    ///
    /// The decoder may take any prefix of `data`, including none of it, and
    /// keeps its own parse position across calls. An empty `data` asks the
    /// decoder to flush a frame it is still holding. The returned frame
    /// borrows the decoder and is only valid until the next call.
    fn decode(&mut self, data: &[u8]) -> anyhow::Result<DecodeOutput<'_>>;
}

/// The set of codecs this process can open.
#[derive(Debug)]
pub struct CodecRegistry {
    codecs: Vec<VideoCodec>,
}

impl CodecRegistry {
    pub fn available(&self) -> &[VideoCodec] {
        &self.codecs
    }

    pub fn supports(&self, codec: VideoCodec) -> bool {
        self.codecs.contains(&codec)
    }
}

static REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();

/// Returns the process-wide codec registry, building it on first use.
///
/// The registry is immutable once built and lives until the process exits;
/// libvpx keeps no global state that needs tearing down.
pub fn registry() -> &'static CodecRegistry {
    REGISTRY.get_or_init(|| {
        let mut codecs = Vec::new();
        #[cfg(not(target_arch = "wasm32"))]
        codecs.extend([VideoCodec::Vp8, VideoCodec::Vp9]);
        codecs.push(VideoCodec::Mock);
        let names: Vec<&str> = codecs.iter().map(|c| c.name()).collect();
        info!("Registered decoders: {}", names.join(", "));
        CodecRegistry { codecs }
    })
}

/// Opens a decoder for `codec`.
pub fn open_decoder(codec: VideoCodec, config: &DecoderConfig) -> Result<Box<dyn FrameDecoder>> {
    if !registry().supports(codec) {
        return Err(StitchError::DecoderInit {
            codec,
            message: "codec is not available on this platform".to_string(),
        });
    }
    match codec {
        VideoCodec::Mock => {
            if config.mock_frame_bytes == 0 {
                return Err(StitchError::DecoderInit {
                    codec,
                    message: "mock frame size must be at least one byte".to_string(),
                });
            }
            Ok(Box::new(MockDecoder::new(config.mock_frame_bytes)))
        }
        #[cfg(not(target_arch = "wasm32"))]
        VideoCodec::Vp8 | VideoCodec::Vp9 => {
            let decoder =
                VpxDecoder::new(codec, config.threads).map_err(|e| StitchError::DecoderInit {
                    codec,
                    message: format!("{e:#}"),
                })?;
            Ok(Box::new(decoder))
        }
        #[cfg(target_arch = "wasm32")]
        VideoCodec::Vp8 | VideoCodec::Vp9 => unreachable!("registry excludes native codecs"),
    }
}
