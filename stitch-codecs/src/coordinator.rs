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

//! The Coordinator, which drives two decode sessions in lock-step rounds and
//! decides which of their frames become output.

use crate::chunk::ChunkLoader;
use crate::decoder::VideoCodec;
use crate::error::{Result, StitchError};
use crate::frame::{FrameView, StreamId};
use crate::policy::{DecodeErrorPolicy, EndPolicy, SelectionMode, SelectionPolicy};
use crate::session::{DecodeSession, SessionConfig, SessionStats};
use crate::writer::FrameSink;
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Upper bound on frames released by a single drain, guarding against a
/// decoder that never reports it is empty.
const MAX_DRAIN_FRAMES: u32 = 256;

/// Everything needed to set up a stitching run.
#[derive(Debug, Clone, Default)]
pub struct StitchConfig {
    pub codec: VideoCodec,
    pub session: SessionConfig,
    pub selection: SelectionMode,
    pub end_policy: EndPolicy,
    pub on_decode_error: DecodeErrorPolicy,
}

/// One input: the stream it reads from and the session decoding it.
pub struct StreamInput<R> {
    loader: ChunkLoader<R>,
    session: DecodeSession,
    finished: bool,
}

impl<R: Read> StreamInput<R> {
    pub fn new(loader: ChunkLoader<R>, session: DecodeSession) -> Self {
        debug_assert_eq!(loader.stream(), session.stream());
        Self {
            loader,
            session,
            finished: false,
        }
    }

    pub fn session(&self) -> &DecodeSession {
        &self.session
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Per-stream counters reported at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct StreamReport {
    pub stream: StreamId,
    pub codec: String,
    #[serde(flatten)]
    pub stats: SessionStats,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct StitchReport {
    pub rounds: u64,
    pub policy: String,
    pub end_policy: EndPolicy,
    pub streams: Vec<StreamReport>,
}

impl StitchReport {
    pub fn frames_written(&self) -> u64 {
        self.streams.iter().map(|s| s.stats.frames_emitted).sum()
    }

    pub fn stream(&self, stream: StreamId) -> &StreamReport {
        &self.streams[stream.index()]
    }
}

pub struct Coordinator<R> {
    inputs: [StreamInput<R>; 2],
    policy: Box<dyn SelectionPolicy>,
    end_policy: EndPolicy,
    on_decode_error: DecodeErrorPolicy,
    round: u64,
}

impl Coordinator<File> {
    /// Opens both input files and a decoder for each.
    pub fn open(first: &Path, second: &Path, config: &StitchConfig) -> Result<Self> {
        let codec = config.codec;
        let inputs = [
            StreamInput::new(
                ChunkLoader::open(StreamId::First, first)?,
                DecodeSession::open(StreamId::First, codec, &config.session)?,
            ),
            StreamInput::new(
                ChunkLoader::open(StreamId::Second, second)?,
                DecodeSession::open(StreamId::Second, codec, &config.session)?,
            ),
        ];
        Ok(Self::with_inputs(inputs, config))
    }
}

impl<R: Read> Coordinator<R> {
    pub fn new(first: StreamInput<R>, second: StreamInput<R>, config: &StitchConfig) -> Result<Self> {
        if first.session.stream() != StreamId::First || second.session.stream() != StreamId::Second {
            return Err(StitchError::InvalidConfig(
                "inputs must be given in stream order".to_string(),
            ));
        }
        Ok(Self::with_inputs([first, second], config))
    }

    fn with_inputs(inputs: [StreamInput<R>; 2], config: &StitchConfig) -> Self {
        Self {
            inputs,
            policy: Box::new(config.selection),
            end_policy: config.end_policy,
            on_decode_error: config.on_decode_error,
            round: 0,
        }
    }

    /// Replaces the selection policy with a custom one.
    pub fn with_policy(mut self, policy: Box<dyn SelectionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn input(&self, stream: StreamId) -> &StreamInput<R> {
        &self.inputs[stream.index()]
    }

    /// Runs rounds until the end policy says stop, drains every session still
    /// active, and tears both sessions down.
    pub fn run(mut self, sink: &mut dyn FrameSink) -> Result<StitchReport> {
        info!(
            "Stitching with policy {}, ending on the {} stream",
            self.policy.name(),
            self.end_policy
        );

        loop {
            let mut loaded = [0usize; 2];
            for (slot, input) in loaded.iter_mut().zip(self.inputs.iter_mut()) {
                if !input.finished {
                    *slot = input.session.refill(&mut input.loader)?;
                }
            }

            let starved: Vec<StreamId> = StreamId::ALL
                .into_iter()
                .filter(|s| !self.inputs[s.index()].finished && loaded[s.index()] == 0)
                .collect();

            match self.end_policy {
                EndPolicy::Shortest => {
                    if let Some(stream) = starved.first() {
                        info!("Stream {stream} is exhausted after {} rounds", self.round);
                        break;
                    }
                }
                EndPolicy::Longest => {
                    for stream in starved {
                        info!("Stream {stream} is exhausted after {} rounds", self.round);
                        let other_finished = self.inputs[stream.other().index()].finished;
                        self.drain_input(stream, sink, other_finished)?;
                    }
                    if self.inputs.iter().all(|input| input.finished) {
                        break;
                    }
                }
            }

            debug!(
                "Round {}: loaded {} and {} bytes",
                self.round, loaded[0], loaded[1]
            );
            for stream in StreamId::ALL {
                if !self.inputs[stream.index()].finished {
                    self.exhaust_round(stream, sink)?;
                }
            }
            self.round += 1;
        }

        let finished = [self.inputs[0].finished, self.inputs[1].finished];
        for stream in StreamId::ALL {
            if !finished[stream.index()] {
                self.drain_input(stream, sink, finished[stream.other().index()])?;
            }
        }

        let report = self.report();
        info!(
            "Finished after {} rounds: stream 1 wrote {} frames, stream 2 wrote {} frames",
            report.rounds,
            report.streams[0].stats.frames_emitted,
            report.streams[1].stats.frames_emitted
        );
        Ok(report)
    }

    /// Steps one session until its current chunk is used up.
    fn exhaust_round(&mut self, stream: StreamId, sink: &mut dyn FrameSink) -> Result<()> {
        let round = self.round;
        let on_decode_error = self.on_decode_error;
        let other_finished = self.inputs[stream.other().index()].finished;
        let policy = &mut *self.policy;
        let session = &mut self.inputs[stream.index()].session;

        while session.has_pending_input() {
            let index = session.frame_count();
            let emitted = match session.step() {
                Ok(Some(frame)) => {
                    offer(policy, sink, round, stream, index, &frame, other_finished)?
                }
                Ok(None) => false,
                Err(e) => {
                    if on_decode_error == DecodeErrorPolicy::Abort {
                        error!("{e}");
                        return Err(e);
                    }
                    warn!("{e}; skipping the rest of the chunk");
                    session.skip_round();
                    false
                }
            };
            if emitted {
                session.record_emitted();
            }
        }
        Ok(())
    }

    /// Flushes a session until it yields nothing and marks it finished.
    fn drain_input(
        &mut self,
        stream: StreamId,
        sink: &mut dyn FrameSink,
        other_finished: bool,
    ) -> Result<()> {
        let round = self.round;
        let on_decode_error = self.on_decode_error;
        let policy = &mut *self.policy;
        let input = &mut self.inputs[stream.index()];
        input.finished = true;
        let session = &mut input.session;

        let mut drained = 0;
        loop {
            if drained == MAX_DRAIN_FRAMES {
                warn!("Stream {stream}: decoder still releasing frames after {MAX_DRAIN_FRAMES} drain calls, giving up");
                break;
            }
            let index = session.frame_count();
            let emitted = match session.drain() {
                Ok(Some(frame)) => {
                    offer(policy, sink, round, stream, index, &frame, other_finished)?
                }
                Ok(None) => break,
                Err(e) => {
                    if on_decode_error == DecodeErrorPolicy::Abort {
                        error!("{e}");
                        return Err(e);
                    }
                    warn!("{e}; abandoning the drain");
                    break;
                }
            };
            drained += 1;
            if emitted {
                session.record_emitted();
            }
        }

        info!(
            "Stream {stream} drained: {drained} buffered frames released, {} frames written in total",
            session.frame_count()
        );
        Ok(())
    }

    fn report(&self) -> StitchReport {
        StitchReport {
            rounds: self.round,
            policy: self.policy.name().to_string(),
            end_policy: self.end_policy,
            streams: self
                .inputs
                .iter()
                .map(|input| StreamReport {
                    stream: input.session.stream(),
                    codec: input.session.codec().to_string(),
                    stats: input.session.stats().clone(),
                })
                .collect(),
        }
    }
}

/// Passes a frame to the sink if the policy selects it. Returns whether it was written.
fn offer(
    policy: &mut dyn SelectionPolicy,
    sink: &mut dyn FrameSink,
    round: u64,
    stream: StreamId,
    index: u64,
    frame: &FrameView<'_>,
    other_finished: bool,
) -> Result<bool> {
    if !policy.select(round, stream, other_finished) {
        return Ok(false);
    }
    sink.emit(stream, index, frame)?;
    Ok(true)
}
