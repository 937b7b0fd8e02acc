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

//! Contains the fundamental data structures for decoded video frames.

use anyhow::{bail, Result};
use serde::Serialize;
use std::fmt;

/// Identifies which of the two inputs a session or frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamId {
    First,
    Second,
}

impl StreamId {
    pub const ALL: [StreamId; 2] = [StreamId::First, StreamId::Second];

    /// The numeric tag used in logs and output filenames (1 or 2).
    pub fn tag(self) -> u8 {
        match self {
            StreamId::First => 1,
            StreamId::Second => 2,
        }
    }

    pub fn index(self) -> usize {
        self.tag() as usize - 1
    }

    pub fn other(self) -> StreamId {
        match self {
            StreamId::First => StreamId::Second,
            StreamId::Second => StreamId::First,
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// A borrowed view of the luma plane of a frame held by a decoder.
///
/// The view borrows the decoder, so it cannot outlive the next decode call on
/// the same session. Anything that needs the pixels afterwards must copy them
/// (see [`FrameView::to_decoded`]).
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    luma: &'a [u8],
    stride: usize,
    width: u32,
    height: u32,
}

impl<'a> FrameView<'a> {
    /// Wraps a luma plane. `stride` may exceed `width` when rows are padded
    /// for alignment; only the first `width` bytes of every row are pixels.
    pub fn new(luma: &'a [u8], stride: usize, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("frame has empty dimensions {width}x{height}");
        }
        if stride < width as usize {
            bail!("stride {stride} is smaller than frame width {width}");
        }
        let required = stride * (height as usize - 1) + width as usize;
        if luma.len() < required {
            bail!(
                "luma plane holds {} bytes, {width}x{height} with stride {stride} needs {required}",
                luma.len()
            );
        }
        Ok(Self {
            luma,
            stride,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Iterates over the visible part of every row, top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &'a [u8]> + 'a {
        let luma = self.luma;
        let stride = self.stride;
        let width = self.width as usize;
        (0..self.height as usize).map(move |row| {
            let start = row * stride;
            &luma[start..start + width]
        })
    }

    /// Copies the visible pixels into a tightly packed buffer.
    pub fn to_packed(&self) -> Vec<u8> {
        let mut packed = Vec::with_capacity(self.width as usize * self.height as usize);
        for row in self.rows() {
            packed.extend_from_slice(row);
        }
        packed
    }

    pub fn to_decoded(&self, stream: StreamId, index: u64) -> DecodedFrame {
        DecodedFrame {
            stream,
            index,
            width: self.width,
            height: self.height,
            data: self.to_packed(),
        }
    }
}

/// An owned copy of a frame's luma plane, tightly packed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedFrame {
    pub stream: StreamId,
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}
