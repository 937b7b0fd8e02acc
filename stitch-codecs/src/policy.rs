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

//! Policies that shape how the two decoded streams are combined.

use crate::frame::StreamId;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Decides which decoded frames become output.
///
/// Frames that are not selected are still decoded, so the decoder's reference
/// state keeps advancing, but they are not written and do not consume an
/// output index.
pub trait SelectionPolicy: Send {
    fn name(&self) -> &str;

    /// Whether a frame decoded from `stream` during `round` (0-based) is written.
    /// `other_finished` is set once the other stream has ended and been drained.
    fn select(&mut self, round: u64, stream: StreamId, other_finished: bool) -> bool;
}

/// The built-in selection policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionMode {
    /// Every frame from both streams is written.
    #[default]
    EmitBoth,
    /// Even rounds write the first stream, odd rounds the second. Once one
    /// stream has finished, every frame of the other is written.
    Alternate,
    /// Only the first stream is written.
    FirstOnly,
}

impl SelectionMode {
    pub fn name(self) -> &'static str {
        match self {
            SelectionMode::EmitBoth => "emit-both",
            SelectionMode::Alternate => "alternate",
            SelectionMode::FirstOnly => "first-only",
        }
    }
}

impl SelectionPolicy for SelectionMode {
    fn name(&self) -> &str {
        SelectionMode::name(*self)
    }

    fn select(&mut self, round: u64, stream: StreamId, other_finished: bool) -> bool {
        match self {
            SelectionMode::EmitBoth => true,
            SelectionMode::Alternate if other_finished => true,
            SelectionMode::Alternate => {
                let active = if round % 2 == 0 {
                    StreamId::First
                } else {
                    StreamId::Second
                };
                stream == active
            }
            SelectionMode::FirstOnly => stream == StreamId::First,
        }
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "emit-both" | "both" => Ok(SelectionMode::EmitBoth),
            "alternate" => Ok(SelectionMode::Alternate),
            "first-only" | "first" => Ok(SelectionMode::FirstOnly),
            _ => Err(format!(
                "Invalid policy {s:?}, please use one of [emit-both, alternate, first-only]"
            )),
        }
    }
}

/// When the round loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndPolicy {
    /// Stop as soon as either stream returns no data.
    #[default]
    Shortest,
    /// Keep decoding the other stream alone until it runs out too.
    Longest,
}

impl fmt::Display for EndPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndPolicy::Shortest => f.write_str("shortest"),
            EndPolicy::Longest => f.write_str("longest"),
        }
    }
}

impl FromStr for EndPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shortest" => Ok(EndPolicy::Shortest),
            "longest" => Ok(EndPolicy::Longest),
            _ => Err(format!(
                "Invalid end policy {s:?}, please use one of [shortest, longest]"
            )),
        }
    }
}

/// What happens when a decoder rejects a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecodeErrorPolicy {
    /// The run fails with the decode error.
    #[default]
    Abort,
    /// The rest of the offending chunk is dropped and decoding resumes with
    /// the next chunk of that stream.
    SkipChunk,
}

impl fmt::Display for DecodeErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeErrorPolicy::Abort => f.write_str("abort"),
            DecodeErrorPolicy::SkipChunk => f.write_str("skip"),
        }
    }
}

impl FromStr for DecodeErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort" => Ok(DecodeErrorPolicy::Abort),
            "skip" | "skip-chunk" => Ok(DecodeErrorPolicy::SkipChunk),
            _ => Err(format!(
                "Invalid decode error policy {s:?}, please use one of [abort, skip]"
            )),
        }
    }
}
