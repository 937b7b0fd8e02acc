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

use std::path::PathBuf;

use clap::Parser;
use stitch_codecs::{
    decoder::DEFAULT_MOCK_FRAME_BYTES, DecodeErrorPolicy, DecoderConfig, EndPolicy, OutputFormat,
    SelectionMode, SessionConfig, StitchConfig, VideoCodec, DEFAULT_CHUNK_SIZE, DEFAULT_PADDING,
};

/// Stitch
///
/// Decodes two compressed video streams in lock-step and writes the luma plane
/// of every selected frame as a grayscale image.
///
/// The integer placeholder in OUTPUT_TEMPLATE expands to `<stream>-<index>`,
/// so `frames/out-%04d.pgm` produces `frames/out-1-0000.pgm`,
/// `frames/out-2-0000.pgm` and so on.
#[derive(Parser, Debug, Clone)]
#[clap(name = "stitch", version)]
pub struct Opt {
    /// First compressed input stream.
    pub input1: PathBuf,

    /// Second compressed input stream.
    pub input2: PathBuf,

    /// printf-style output filename template with one integer placeholder.
    pub output_template: String,

    /// Codec both inputs are encoded with. IVF framing is expected for vp8 and vp9.
    #[arg(long, default_value_t = VideoCodec::Vp9)]
    pub codec: VideoCodec,

    /// Which decoded frames are written: emit-both, alternate or first-only.
    #[arg(long, default_value_t = SelectionMode::EmitBoth)]
    pub policy: SelectionMode,

    /// Stop when the shortest input ends, or keep going until the longest does.
    #[arg(long = "end", default_value_t = EndPolicy::Shortest)]
    pub end_policy: EndPolicy,

    /// Abort on a decode error, or skip the rest of the offending chunk.
    #[arg(long, default_value_t = DecodeErrorPolicy::Abort)]
    pub on_decode_error: DecodeErrorPolicy,

    /// Bytes read from each input per round.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, value_parser = parse_chunk_size)]
    pub chunk_size: usize,

    /// Zeroed bytes kept after every chunk.
    #[arg(long, default_value_t = DEFAULT_PADDING)]
    pub padding: usize,

    /// Bytes the mock codec consumes per frame.
    #[arg(long, default_value_t = DEFAULT_MOCK_FRAME_BYTES, value_parser = parse_chunk_size)]
    pub mock_frame_bytes: usize,

    /// Decoder worker threads for libvpx.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=64))]
    pub threads: u32,

    /// Image format of the written frames.
    #[arg(long, default_value_t = OutputFormat::Pgm)]
    pub format: OutputFormat,

    /// Print a JSON summary of the run to stdout when done.
    #[clap(long = "summary-json")]
    pub summary_json: bool,
}

impl Opt {
    pub fn stitch_config(&self) -> StitchConfig {
        StitchConfig {
            codec: self.codec,
            session: SessionConfig {
                chunk_size: self.chunk_size,
                padding: self.padding,
                decoder: DecoderConfig {
                    threads: self.threads,
                    mock_frame_bytes: self.mock_frame_bytes,
                },
            },
            selection: self.policy,
            end_policy: self.end_policy,
            on_decode_error: self.on_decode_error,
        }
    }
}

fn parse_chunk_size(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("must be at least 1 byte".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("{s:?} is not a byte count: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opt = Opt::try_parse_from(["stitch", "a.ivf", "b.ivf", "out-%d.pgm"]).unwrap();
        assert_eq!(opt.codec, VideoCodec::Vp9);
        assert_eq!(opt.policy, SelectionMode::EmitBoth);
        assert_eq!(opt.end_policy, EndPolicy::Shortest);
        assert_eq!(opt.on_decode_error, DecodeErrorPolicy::Abort);
        assert_eq!(opt.format, OutputFormat::Pgm);

        let config = opt.stitch_config();
        assert_eq!(config.session.chunk_size, 4096);
        assert_eq!(config.session.padding, 64);
        assert_eq!(config.session.decoder.threads, 1);
    }

    #[test]
    fn options_map_onto_the_config() {
        let opt = Opt::try_parse_from([
            "stitch",
            "a.bin",
            "b.bin",
            "out-%d.png",
            "--codec",
            "mock",
            "--policy",
            "alternate",
            "--end",
            "longest",
            "--on-decode-error",
            "skip",
            "--chunk-size",
            "100",
            "--mock-frame-bytes",
            "10",
            "--format",
            "png",
        ])
        .unwrap();

        let config = opt.stitch_config();
        assert_eq!(config.codec, VideoCodec::Mock);
        assert_eq!(config.selection, SelectionMode::Alternate);
        assert_eq!(config.end_policy, EndPolicy::Longest);
        assert_eq!(config.on_decode_error, DecodeErrorPolicy::SkipChunk);
        assert_eq!(config.session.chunk_size, 100);
        assert_eq!(config.session.decoder.mock_frame_bytes, 10);
        assert_eq!(opt.format, OutputFormat::Png);
    }

    #[test]
    fn rejects_bad_values() {
        for args in [
            vec!["stitch", "a", "b"],
            vec!["stitch", "a", "b", "c", "--chunk-size", "0"],
            vec!["stitch", "a", "b", "c", "--codec", "h264"],
            vec!["stitch", "a", "b", "c", "--policy", "interleave"],
        ] {
            assert!(Opt::try_parse_from(args.iter().copied()).is_err(), "{args:?}");
        }
    }
}
