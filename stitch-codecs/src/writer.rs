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

//! Writing decoded luma planes to disk.

use crate::error::{Result, StitchError};
use crate::frame::{DecodedFrame, FrameView, StreamId};
use image::{GrayImage, ImageFormat};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Widest zero or space padding a placeholder may ask for.
const MAX_PLACEHOLDER_WIDTH: usize = 32;

/// Receives the frames selected for output.
pub trait FrameSink {
    /// `index` is the stream's running output counter for this frame.
    fn emit(&mut self, stream: StreamId, index: u64, frame: &FrameView<'_>) -> Result<()>;
}

/// A filename template with exactly one printf-style integer placeholder
/// (`%d`, `%5d` or `%05d`; `%%` is a literal percent sign).
///
/// The placeholder expands to `<stream>-<index>`, the index padded as the
/// placeholder asks, so both streams can share one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    prefix: String,
    suffix: String,
    width: usize,
    zero_pad: bool,
}

impl OutputTarget {
    pub fn parse(template: &str) -> Result<Self> {
        let invalid = |reason| StitchError::InvalidTemplate {
            template: template.to_string(),
            reason,
        };

        let mut prefix = String::new();
        let mut suffix = String::new();
        let mut placeholder: Option<(usize, bool)> = None;
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            let out = if placeholder.is_some() {
                &mut suffix
            } else {
                &mut prefix
            };
            if c != '%' {
                out.push(c);
                continue;
            }
            if chars.peek() == Some(&'%') {
                chars.next();
                out.push('%');
                continue;
            }

            let zero_pad = chars.peek() == Some(&'0');
            if zero_pad {
                chars.next();
            }
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            match chars.next() {
                Some('d') | Some('i') | Some('u') => {}
                Some(_) => return Err(invalid("only integer placeholders are supported")),
                None => return Err(invalid("template ends inside a placeholder")),
            }
            if placeholder.is_some() {
                return Err(invalid("more than one integer placeholder"));
            }
            let width = if digits.is_empty() {
                0
            } else {
                digits
                    .parse::<usize>()
                    .ok()
                    .filter(|&w| w <= MAX_PLACEHOLDER_WIDTH)
                    .ok_or_else(|| invalid("placeholder width is larger than 32"))?
            };
            placeholder = Some((width, zero_pad));
        }

        let (width, zero_pad) = placeholder.ok_or_else(|| invalid("missing integer placeholder"))?;
        Ok(Self {
            prefix,
            suffix,
            width,
            zero_pad,
        })
    }

    /// The concrete path for frame `index` of `stream`.
    pub fn resolve(&self, stream: StreamId, index: u64) -> PathBuf {
        let width = self.width;
        let count = if self.zero_pad {
            format!("{index:0width$}")
        } else {
            format!("{index:width$}")
        };
        PathBuf::from(format!(
            "{}{}-{}{}",
            self.prefix,
            stream.tag(),
            count,
            self.suffix
        ))
    }
}

/// The raster format frames are written in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Binary grayscale PGM (`P5`), written byte for byte.
    #[default]
    Pgm,
    /// 8-bit grayscale PNG.
    Png,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Pgm => f.write_str("pgm"),
            OutputFormat::Png => f.write_str("png"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pgm" => Ok(OutputFormat::Pgm),
            "png" => Ok(OutputFormat::Png),
            _ => Err(format!("Invalid format {s:?}, please use one of [pgm, png]")),
        }
    }
}

/// Writes `frame` as a binary PGM: the `P5` magic, `width height`, the
/// maximum value `255`, then the visible part of each luma row.
pub fn encode_pgm<W: Write>(out: &mut W, frame: &FrameView<'_>) -> std::io::Result<()> {
    write!(out, "P5\n{} {}\n{}\n", frame.width(), frame.height(), 255)?;
    for row in frame.rows() {
        out.write_all(row)?;
    }
    Ok(())
}

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|source| StitchError::ResourceUnavailable {
        what: "output file",
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufWriter::new(file))
}

/// Creates (or truncates) `path` and writes `frame` to it as PGM.
pub fn write_pgm(frame: &FrameView<'_>, path: &Path) -> Result<()> {
    let mut out = create_output(path)?;
    encode_pgm(&mut out, frame)
        .and_then(|_| out.flush())
        .map_err(|source| StitchError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes `frame` as an 8-bit grayscale PNG.
pub fn write_png(frame: &FrameView<'_>, path: &Path) -> Result<()> {
    let gray = GrayImage::from_raw(frame.width(), frame.height(), frame.to_packed())
        .ok_or_else(|| StitchError::Image("luma plane does not match frame size".to_string()))?;
    let mut out = create_output(path)?;
    gray.write_to(&mut out, ImageFormat::Png)?;
    out.flush().map_err(|source| StitchError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// The production sink: one file per selected frame.
pub struct FrameWriter {
    target: OutputTarget,
    format: OutputFormat,
    written: u64,
}

impl FrameWriter {
    pub fn new(target: OutputTarget, format: OutputFormat) -> Self {
        Self {
            target,
            format,
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl FrameSink for FrameWriter {
    fn emit(&mut self, stream: StreamId, index: u64, frame: &FrameView<'_>) -> Result<()> {
        let path = self.target.resolve(stream, index);
        debug!(
            "Saving frame {index:3} of stream {stream} to {}",
            path.display()
        );
        match self.format {
            OutputFormat::Pgm => write_pgm(frame, &path)?,
            OutputFormat::Png => write_png(frame, &path)?,
        }
        self.written += 1;
        Ok(())
    }
}

/// Keeps owned copies of every emitted frame in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub frames: Vec<DecodedFrame>,
}

impl MemorySink {
    pub fn frames_of(&self, stream: StreamId) -> impl Iterator<Item = &DecodedFrame> {
        self.frames.iter().filter(move |f| f.stream == stream)
    }
}

impl FrameSink for MemorySink {
    fn emit(&mut self, stream: StreamId, index: u64, frame: &FrameView<'_>) -> Result<()> {
        self.frames.push(frame.to_decoded(stream, index));
        Ok(())
    }
}
