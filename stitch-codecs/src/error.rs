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

//! Error taxonomy shared by every stage of the stitching pipeline.

use crate::decoder::VideoCodec;
use crate::frame::StreamId;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StitchError {
    /// An input could not be opened or an output could not be created.
    #[error("Could not open {what} {}: {source}", path.display())]
    ResourceUnavailable {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Read error on stream {stream}: {source}")]
    Read {
        stream: StreamId,
        #[source]
        source: io::Error,
    },

    #[error("Write error on {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The decoder rejected the bitstream offered by a session.
    #[error("Error while decoding frame {frame} of stream {stream}: {message}")]
    DecodeFailure {
        stream: StreamId,
        frame: u64,
        message: String,
    },

    #[error("Could not open {codec} decoder: {message}")]
    DecoderInit { codec: VideoCodec, message: String },

    #[error("Invalid output template {template:?}: {reason}")]
    InvalidTemplate {
        template: String,
        reason: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Image encoding error: {0}")]
    Image(String),
}

impl From<image::ImageError> for StitchError {
    fn from(err: image::ImageError) -> Self {
        StitchError::Image(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StitchError>;
