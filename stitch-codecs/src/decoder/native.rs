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

//! The native VP8/VP9 decoder using libvpx.
//!
//! Input is an IVF-framed elementary stream: a 32-byte file header followed by
//! frames, each prefixed with a 12-byte header whose first four bytes are the
//! little-endian payload size. Bytes are accepted incrementally and buffered
//! until a whole compressed frame is available, so chunk boundaries may fall
//! anywhere in the stream.

use super::{DecodeOutput, FrameDecoder, VideoCodec};
use crate::frame::FrameView;
use anyhow::{anyhow, bail, Result};
use std::ffi::CStr;
use std::mem::MaybeUninit;
use std::ptr;
use tracing::{debug, warn};
use vpx_sys::*;

const IVF_SIGNATURE: &[u8; 4] = b"DKIF";
const IVF_FILE_HEADER_LEN: usize = 32;
const IVF_FRAME_HEADER_LEN: usize = 12;
/// Upper bound on a single compressed frame; anything larger is a damaged header.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

macro_rules! vpx_ptr {
    ($f:expr) => {{
        let res = unsafe { $f };
        if res.is_null() {
            return Err(anyhow!("vpx function returned null pointer."));
        }
        res
    }};
}

/// Where the parser is inside the IVF framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    FileHeader,
    /// Extra file header bytes announced by a header length above 32.
    HeaderExtension(usize),
    FrameHeader,
    Payload(usize),
}

impl ParseState {
    /// Bytes that must be buffered before this state can be parsed.
    fn needed(self) -> usize {
        match self {
            ParseState::FileHeader => IVF_FILE_HEADER_LEN,
            ParseState::HeaderExtension(len) => len,
            ParseState::FrameHeader => IVF_FRAME_HEADER_LEN,
            ParseState::Payload(len) => len,
        }
    }
}

pub struct VpxDecoder {
    codec: VideoCodec,
    context: vpx_codec_ctx_t,
    iter: vpx_codec_iter_t,
    state: ParseState,
    /// Bytes of the unit currently being assembled.
    pending: Vec<u8>,
    /// The last decode call may still have images queued behind `iter`.
    images_pending: bool,
    flush_sent: bool,
    frames_submitted: u64,
}

// The codec context is only ever touched through `&mut self`.
unsafe impl Send for VpxDecoder {}

impl VpxDecoder {
    pub fn new(codec: VideoCodec, threads: u32) -> Result<Self> {
        let iface = match codec {
            VideoCodec::Vp8 => vpx_ptr!(vpx_codec_vp8_dx()),
            VideoCodec::Vp9 => vpx_ptr!(vpx_codec_vp9_dx()),
            VideoCodec::Mock => bail!("{codec} is not a libvpx codec"),
        };
        let cfg = vpx_codec_dec_cfg_t {
            threads: threads.max(1),
            w: 0,
            h: 0,
        };
        let mut context = unsafe { MaybeUninit::zeroed().assume_init() };
        let ret = unsafe {
            vpx_codec_dec_init_ver(
                &mut context,
                iface,
                &cfg,
                0,
                VPX_DECODER_ABI_VERSION as i32,
            )
        };
        if error_code(ret) != 0 {
            bail!(
                "Failed to initialize {codec} decoder: {}",
                error_string(ret)
            );
        }
        debug!("Opened libvpx {codec} decoder with {} thread(s)", cfg.threads);
        Ok(Self {
            codec,
            context,
            iter: ptr::null(),
            state: ParseState::FileHeader,
            pending: Vec::new(),
            images_pending: false,
            flush_sent: false,
            frames_submitted: 0,
        })
    }

    fn check(&self, ret: vpx_codec_err_t) -> Result<()> {
        if error_code(ret) == 0 {
            return Ok(());
        }
        let detail = unsafe {
            let detail = vpx_codec_error_detail(&self.context as *const _ as *mut _);
            if detail.is_null() {
                None
            } else {
                Some(CStr::from_ptr(detail).to_string_lossy().into_owned())
            }
        };
        match detail {
            Some(detail) => bail!("VPX Decode failed: {} ({detail})", error_string(ret)),
            None => bail!("VPX Decode failed: {}", error_string(ret)),
        }
    }

    fn parse_file_header(&mut self) -> Result<()> {
        let header = &self.pending;
        if &header[0..4] != IVF_SIGNATURE {
            bail!("missing IVF signature, expected an IVF-framed {} stream", self.codec);
        }
        let header_len = u16::from_le_bytes([header[6], header[7]]) as usize;
        if header_len < IVF_FILE_HEADER_LEN {
            bail!("IVF header length {header_len} is shorter than {IVF_FILE_HEADER_LEN}");
        }
        let fourcc = &header[8..12];
        let expected: &[u8] = match self.codec {
            VideoCodec::Vp8 => b"VP80",
            _ => b"VP90",
        };
        if fourcc != expected {
            warn!(
                "IVF fourcc {:?} does not match the {} decoder",
                String::from_utf8_lossy(fourcc),
                self.codec
            );
        }
        let width = u16::from_le_bytes([header[12], header[13]]);
        let height = u16::from_le_bytes([header[14], header[15]]);
        debug!("IVF stream header: {width}x{height}");

        self.pending.clear();
        self.state = match header_len - IVF_FILE_HEADER_LEN {
            0 => ParseState::FrameHeader,
            extra => ParseState::HeaderExtension(extra),
        };
        Ok(())
    }

    fn parse_frame_header(&mut self) -> Result<()> {
        let size = u32::from_le_bytes([
            self.pending[0],
            self.pending[1],
            self.pending[2],
            self.pending[3],
        ]) as usize;
        self.pending.clear();
        if size > MAX_FRAME_BYTES {
            bail!("IVF frame header announces {size} bytes, stream is damaged");
        }
        if size == 0 {
            debug!("Skipping empty IVF frame");
            return Ok(());
        }
        self.state = ParseState::Payload(size);
        Ok(())
    }

    /// Hands the buffered compressed frame to libvpx.
    fn submit(&mut self) -> Result<()> {
        let ret = unsafe {
            vpx_codec_decode(
                &mut self.context,
                self.pending.as_ptr(),
                self.pending.len() as u32,
                ptr::null_mut(),
                0,
            )
        };
        self.pending.clear();
        self.state = ParseState::FrameHeader;
        self.iter = ptr::null();
        self.flush_sent = false;
        self.frames_submitted += 1;
        self.check(ret)
    }

    fn flush(&mut self) -> Result<()> {
        let ret = unsafe { vpx_codec_decode(&mut self.context, ptr::null(), 0, ptr::null_mut(), 0) };
        self.iter = ptr::null();
        self.flush_sent = true;
        self.check(ret)
    }

    fn next_image(&mut self) -> *mut vpx_image_t {
        unsafe { vpx_codec_get_frame(&mut self.context, &mut self.iter) }
    }

    /// Wraps the luma plane of an image returned by `vpx_codec_get_frame`.
    /// libvpx keeps the image alive until the next decode call, which the
    /// borrow of `self` enforces.
    fn view(&self, img: *const vpx_image_t) -> Result<FrameView<'_>> {
        let (plane, stride, width, height, bit_depth) = unsafe {
            (
                (*img).planes[0],
                (*img).stride[0],
                (*img).d_w,
                (*img).d_h,
                (*img).bit_depth,
            )
        };
        if bit_depth > 8 {
            bail!("{bit_depth}-bit images are not supported");
        }
        if plane.is_null() || stride <= 0 || width == 0 || height == 0 {
            bail!("decoder returned an empty image");
        }
        let stride = stride as usize;
        let len = stride * (height as usize - 1) + width as usize;
        let luma = unsafe { std::slice::from_raw_parts(plane as *const u8, len) };
        FrameView::new(luma, stride, width, height)
    }

    fn drain(&mut self) -> Result<DecodeOutput<'_>> {
        if self.images_pending {
            let img = self.next_image();
            if !img.is_null() {
                return Ok(DecodeOutput::with_frame(0, self.view(img)?));
            }
            self.images_pending = false;
        }
        if self.flush_sent {
            return Ok(DecodeOutput::consumed(0));
        }
        if !self.pending.is_empty() {
            warn!(
                "Discarding {} bytes of an incomplete {} frame at end of stream",
                self.pending.len(),
                self.codec
            );
            self.pending.clear();
            if let ParseState::Payload(_) = self.state {
                self.state = ParseState::FrameHeader;
            }
        }
        self.flush()?;
        let img = self.next_image();
        if img.is_null() {
            return Ok(DecodeOutput::consumed(0));
        }
        self.images_pending = true;
        Ok(DecodeOutput::with_frame(0, self.view(img)?))
    }
}

impl FrameDecoder for VpxDecoder {
    fn codec(&self) -> VideoCodec {
        self.codec
    }

    fn decode(&mut self, data: &[u8]) -> Result<DecodeOutput<'_>> {
        if data.is_empty() {
            return self.drain();
        }

        // A single compressed frame can yield several images; hand those out
        // before taking more input.
        if self.images_pending {
            let img = self.next_image();
            if !img.is_null() {
                return Ok(DecodeOutput::with_frame(0, self.view(img)?));
            }
            self.images_pending = false;
        }

        let mut consumed = 0;
        while consumed < data.len() {
            let needed = self.state.needed() - self.pending.len();
            let take = needed.min(data.len() - consumed);
            self.pending
                .extend_from_slice(&data[consumed..consumed + take]);
            consumed += take;
            if self.pending.len() < self.state.needed() {
                break;
            }

            match self.state {
                ParseState::FileHeader => self.parse_file_header()?,
                ParseState::HeaderExtension(_) => {
                    self.pending.clear();
                    self.state = ParseState::FrameHeader;
                }
                ParseState::FrameHeader => self.parse_frame_header()?,
                ParseState::Payload(_) => {
                    self.submit()?;
                    let img = self.next_image();
                    if !img.is_null() {
                        self.images_pending = true;
                        return Ok(DecodeOutput::with_frame(consumed, self.view(img)?));
                    }
                }
            }
        }
        Ok(DecodeOutput::consumed(consumed))
    }
}

impl Drop for VpxDecoder {
    fn drop(&mut self) {
        debug!(
            "Closing {} decoder after {} frames",
            self.codec, self.frames_submitted
        );
        unsafe {
            vpx_codec_destroy(&mut self.context);
        }
    }
}

fn error_code(ret: vpx_codec_err_t) -> i32 {
    unsafe { std::mem::transmute::<vpx_codec_err_t, i32>(ret) }
}

fn error_string(ret: vpx_codec_err_t) -> String {
    unsafe {
        let error_cstr = vpx_codec_err_to_string(ret);
        if error_cstr.is_null() {
            "Unknown codec error".to_string()
        } else {
            CStr::from_ptr(error_cstr).to_string_lossy().into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ivf_header(fourcc: &[u8; 4], header_len: u16) -> Vec<u8> {
        let mut header = Vec::with_capacity(header_len as usize);
        header.extend_from_slice(IVF_SIGNATURE);
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(&header_len.to_le_bytes());
        header.extend_from_slice(fourcc);
        header.extend_from_slice(&320u16.to_le_bytes());
        header.extend_from_slice(&240u16.to_le_bytes());
        header.extend_from_slice(&30u32.to_le_bytes());
        header.extend_from_slice(&1u32.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        header.resize(header_len as usize, 0);
        header
    }

    const ENC_WIDTH: u32 = 64;
    const ENC_HEIGHT: u32 = 48;

    fn collect_packets(ctx: &mut vpx_codec_ctx_t, packets: &mut Vec<Vec<u8>>) {
        let mut iter: vpx_codec_iter_t = ptr::null();
        loop {
            unsafe {
                let pkt = vpx_codec_get_cx_data(ctx, &mut iter);
                if pkt.is_null() {
                    return;
                }
                if (*pkt).kind == vpx_codec_cx_pkt_kind::VPX_CODEC_CX_FRAME_PKT {
                    let f = &(*pkt).data.frame;
                    packets.push(std::slice::from_raw_parts(f.buf as *const u8, f.sz as usize).to_vec());
                }
            }
        }
    }

    /// Encodes `count` small frames with libvpx and wraps them in IVF framing.
    /// Returns the stream and the offset just past each frame.
    fn encode_ivf(codec: VideoCodec, count: usize) -> (Vec<u8>, Vec<usize>) {
        let (iface, fourcc) = match codec {
            VideoCodec::Vp8 => (unsafe { vpx_codec_vp8_cx() }, b"VP80"),
            _ => (unsafe { vpx_codec_vp9_cx() }, b"VP90"),
        };
        let mut cfg: vpx_codec_enc_cfg_t = unsafe { MaybeUninit::zeroed().assume_init() };
        assert_eq!(error_code(unsafe { vpx_codec_enc_config_default(iface, &mut cfg, 0) }), 0);
        cfg.g_w = ENC_WIDTH;
        cfg.g_h = ENC_HEIGHT;
        cfg.g_timebase.num = 1;
        cfg.g_timebase.den = 30;
        cfg.rc_target_bitrate = 200;
        cfg.g_threads = 1;
        cfg.g_lag_in_frames = 0;

        let mut ctx: vpx_codec_ctx_t = unsafe { MaybeUninit::zeroed().assume_init() };
        let ret = unsafe {
            vpx_codec_enc_init_ver(&mut ctx, iface, &cfg, 0, VPX_ENCODER_ABI_VERSION as i32)
        };
        assert_eq!(error_code(ret), 0, "{}", error_string(ret));

        let mut packets = Vec::new();
        let mut pixels = vec![0u8; (ENC_WIDTH * ENC_HEIGHT * 3 / 2) as usize];
        for i in 0..count {
            for (n, p) in pixels.iter_mut().enumerate() {
                *p = ((n + i * 16) % 251) as u8;
            }
            let mut image: vpx_image_t = unsafe { MaybeUninit::zeroed().assume_init() };
            let wrapped = unsafe {
                vpx_img_wrap(
                    &mut image,
                    vpx_img_fmt::VPX_IMG_FMT_I420,
                    ENC_WIDTH as _,
                    ENC_HEIGHT as _,
                    1,
                    pixels.as_mut_ptr() as _,
                )
            };
            assert!(!wrapped.is_null());
            let ret = unsafe {
                vpx_codec_encode(&mut ctx, &image, i as i64, 1, 0, VPX_DL_REALTIME as _)
            };
            assert_eq!(error_code(ret), 0, "{}", error_string(ret));
            collect_packets(&mut ctx, &mut packets);
        }
        let ret = unsafe {
            vpx_codec_encode(&mut ctx, ptr::null(), count as i64, 1, 0, VPX_DL_REALTIME as _)
        };
        assert_eq!(error_code(ret), 0, "{}", error_string(ret));
        collect_packets(&mut ctx, &mut packets);
        unsafe {
            vpx_codec_destroy(&mut ctx);
        }
        assert_eq!(packets.len(), count);

        let mut ivf = ivf_header(fourcc, 32);
        let mut ends = Vec::new();
        for (pts, packet) in packets.iter().enumerate() {
            ivf.extend_from_slice(&(packet.len() as u32).to_le_bytes());
            ivf.extend_from_slice(&(pts as u64).to_le_bytes());
            ivf.extend_from_slice(packet);
            ends.push(ivf.len());
        }
        (ivf, ends)
    }

    /// Feeds `ivf` in chunks of `chunk_size`, offering the rest of each chunk
    /// until it is used up. Returns the stream offset at which every frame
    /// was completed.
    fn decode_in_chunks(decoder: &mut VpxDecoder, ivf: &[u8], chunk_size: usize) -> Vec<usize> {
        let mut boundaries = Vec::new();
        let mut pos = 0;
        for chunk in ivf.chunks(chunk_size) {
            let mut offset = 0;
            while offset < chunk.len() {
                let out = decoder.decode(&chunk[offset..]).unwrap();
                if let Some(frame) = &out.frame {
                    assert_eq!((frame.width(), frame.height()), (ENC_WIDTH, ENC_HEIGHT));
                    assert!(frame.stride() >= ENC_WIDTH as usize);
                    boundaries.push(pos + offset + out.consumed);
                }
                offset += out.consumed;
            }
            pos += chunk.len();
        }
        boundaries
    }

    #[test]
    fn header_is_accepted_across_calls() {
        let mut decoder = VpxDecoder::new(VideoCodec::Vp9, 1).unwrap();
        let header = ivf_header(b"VP90", 32);

        let out = decoder.decode(&header[..10]).unwrap();
        assert_eq!(out.consumed, 10);
        assert!(out.frame.is_none());
        let out = decoder.decode(&header[10..]).unwrap();
        assert_eq!(out.consumed, 22);
        assert!(out.frame.is_none());
        assert_eq!(decoder.state, ParseState::FrameHeader);
    }

    #[test]
    fn header_extension_is_skipped() {
        let mut decoder = VpxDecoder::new(VideoCodec::Vp8, 1).unwrap();
        let mut data = ivf_header(b"VP80", 40);
        // An empty frame is skipped without reaching libvpx.
        data.extend_from_slice(&[0u8; IVF_FRAME_HEADER_LEN]);

        let out = decoder.decode(&data).unwrap();
        assert_eq!(out.consumed, data.len());
        assert_eq!(decoder.state, ParseState::FrameHeader);
        assert_eq!(decoder.frames_submitted, 0);
    }

    #[test]
    fn missing_signature_is_an_error() {
        let mut decoder = VpxDecoder::new(VideoCodec::Vp9, 1).unwrap();
        let mut data = ivf_header(b"VP90", 32);
        data[0] = b'X';
        assert!(decoder.decode(&data).is_err());
    }

    #[test]
    fn oversized_frame_header_is_an_error() {
        let mut decoder = VpxDecoder::new(VideoCodec::Vp9, 1).unwrap();
        let mut data = ivf_header(b"VP90", 32);
        data.extend_from_slice(&u32::MAX.to_le_bytes());
        data.extend_from_slice(&[0u8; 8]);
        assert!(decoder.decode(&data).is_err());
    }

    #[test]
    fn drain_of_fresh_decoder_yields_nothing() {
        let mut decoder = VpxDecoder::new(VideoCodec::Vp9, 1).unwrap();
        assert!(decoder.decode(&[]).unwrap().frame.is_none());
        assert!(decoder.decode(&[]).unwrap().frame.is_none());
    }

    #[test]
    fn mock_is_not_a_libvpx_codec() {
        assert!(VpxDecoder::new(VideoCodec::Mock, 1).is_err());
    }

    #[test]
    fn frames_split_across_chunks_stop_at_frame_boundaries() {
        let (ivf, ends) = encode_ivf(VideoCodec::Vp8, 5);
        for chunk_size in [7, 64, ivf.len()] {
            let mut decoder = VpxDecoder::new(VideoCodec::Vp8, 1).unwrap();
            let boundaries = decode_in_chunks(&mut decoder, &ivf, chunk_size);
            assert_eq!(boundaries, ends, "chunk size {chunk_size}");
            assert_eq!(decoder.frames_submitted, 5);
            assert!(decoder.pending.is_empty());
        }
    }

    #[test]
    fn drain_after_last_frame_flushes_once() {
        let (ivf, ends) = encode_ivf(VideoCodec::Vp9, 3);
        let mut decoder = VpxDecoder::new(VideoCodec::Vp9, 1).unwrap();
        let stepped = decode_in_chunks(&mut decoder, &ivf, 4096).len();

        let mut drained = 0;
        loop {
            let out = decoder.decode(&[]).unwrap();
            assert_eq!(out.consumed, 0);
            match out.frame {
                Some(frame) => {
                    assert_eq!((frame.width(), frame.height()), (ENC_WIDTH, ENC_HEIGHT));
                    drained += 1;
                }
                None => break,
            }
        }
        assert_eq!(stepped + drained, ends.len());
        assert!(decoder.flush_sent);
        assert!(!decoder.images_pending);
        assert!(decoder.decode(&[]).unwrap().frame.is_none());
    }

    #[test]
    fn truncated_last_frame_is_dropped_at_drain() {
        let (ivf, ends) = encode_ivf(VideoCodec::Vp8, 3);
        let mut decoder = VpxDecoder::new(VideoCodec::Vp8, 1).unwrap();
        let cut = ends[2] - 5;
        let boundaries = decode_in_chunks(&mut decoder, &ivf[..cut], 16);
        assert_eq!(boundaries, &ends[..2]);
        assert!(!decoder.pending.is_empty());

        assert!(decoder.decode(&[]).unwrap().frame.is_none());
        assert!(decoder.pending.is_empty());
        assert_eq!(decoder.state, ParseState::FrameHeader);
        assert_eq!(decoder.frames_submitted, 2);
    }
}
