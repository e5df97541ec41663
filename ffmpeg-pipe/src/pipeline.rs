//! Streaming transcode orchestrator.
//!
//! ```text
//!                    ┌─► video ─► DecodeStage ─► FrameTransform ─► EncodeStage ─┐
//! Demuxer (pull) ────┤                                                          ├──► Muxer
//!                    └─► audio ─► DecodeStage ───────────────────► EncodeStage ─┘
//! ```
//!
//! One packet is decoded, transformed, encoded and muxed before the next one is
//! pulled, so per-stream packet order reaching the muxer is the order the
//! encoders produced it.

use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::{
    error::{PipeError, Result},
    stream::{MediaKind, StreamPair},
    transform::FrameTransform,
};

/// A demultiplexed packet tagged with the stream it belongs to.
pub struct Demuxed<P> {
    pub kind: MediaKind,
    pub packet: P,
}

pub trait Demuxer: Send {
    type Packet;

    fn streams(&self) -> &StreamPair;

    /// Next packet in container order, `None` at end of input.
    fn next_packet(&mut self) -> Result<Option<Demuxed<Self::Packet>>>;

    /// Close the container and its source transport. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// Decoder bound to one input stream.
pub trait DecodeStage: Send {
    type Packet;
    type Frame;

    /// Zero or more frames; codecs may hold packets back before producing any.
    fn decode(&mut self, packet: Self::Packet) -> Result<Vec<Self::Frame>>;

    /// Drain frames held back by the codec. Later calls return nothing.
    fn flush(&mut self) -> Result<Vec<Self::Frame>>;
}

/// Encoder bound to one output stream.
pub trait EncodeStage: Send {
    type Frame;
    type Packet;

    fn encode(&mut self, frame: Self::Frame) -> Result<Vec<Self::Packet>>;

    /// Signal end of input and drain buffered packets. Later calls return nothing.
    fn flush(&mut self) -> Result<Vec<Self::Packet>>;
}

pub trait Muxer: Send {
    type Packet;

    fn mux(&mut self, kind: MediaKind, packet: Self::Packet) -> Result<()>;

    /// Finalize the container and close the destination transport. The
    /// transport is released even when finalizing fails.
    fn close(&mut self) -> Result<()>;

    /// Release the destination transport without finalizing. No-op once closed.
    fn abort(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Init,
    Streaming,
    Flushing,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Init => "INIT",
            PipelineState::Streaming => "STREAMING",
            PipelineState::Flushing => "FLUSHING",
            PipelineState::Done => "DONE",
            PipelineState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StreamCounters {
    /// Packets pulled from the demuxer.
    pub packets_in: u64,
    /// Frames produced by the decoder, including drained ones.
    pub frames: u64,
    /// Packets handed to the muxer.
    pub packets_out: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PipelineReport {
    pub video: StreamCounters,
    pub audio: StreamCounters,
}

impl PipelineReport {
    fn counters(&mut self, kind: MediaKind) -> &mut StreamCounters {
        match kind {
            MediaKind::Video => &mut self.video,
            MediaKind::Audio => &mut self.audio,
        }
    }
}

/// Codec stages for one run. Video frames pass through `video_transform`
/// between decode and encode; audio frames go straight to the encoder.
pub struct Stages<P, V, A> {
    pub video_decoder: Box<dyn DecodeStage<Packet = P, Frame = V>>,
    pub video_transform: Box<dyn FrameTransform<V>>,
    pub video_encoder: Box<dyn EncodeStage<Frame = V, Packet = P>>,
    pub audio_decoder: Box<dyn DecodeStage<Packet = P, Frame = A>>,
    pub audio_encoder: Box<dyn EncodeStage<Frame = A, Packet = P>>,
}

pub struct Pipeline<P, V, A> {
    demuxer: Box<dyn Demuxer<Packet = P>>,
    muxer: Box<dyn Muxer<Packet = P>>,
    stages: Stages<P, V, A>,
    state: PipelineState,
    report: PipelineReport,
}

impl<P, V, A> Pipeline<P, V, A> {
    pub fn new(
        demuxer: Box<dyn Demuxer<Packet = P>>,
        muxer: Box<dyn Muxer<Packet = P>>,
        stages: Stages<P, V, A>,
    ) -> Self {
        Self {
            demuxer,
            muxer,
            stages,
            state: PipelineState::Init,
            report: PipelineReport::default(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn streams(&self) -> &StreamPair {
        self.demuxer.streams()
    }

    /// Drive the run to completion. On any failure both transports are closed
    /// best-effort and the original error is returned.
    pub fn run(mut self, cancel: &CancellationToken) -> Result<PipelineReport> {
        if let Err(e) = self.stream(cancel).and_then(|()| self.flush()) {
            return Err(self.fail(e));
        }

        let muxed = self.muxer.close();
        let closed = self.demuxer.close();
        match (muxed, closed) {
            (Ok(()), Ok(())) => {
                self.enter(PipelineState::Done);
                log::info!(
                    "video: {} packets in, {} frames, {} packets out; audio: {} packets in, {} frames, {} packets out",
                    self.report.video.packets_in,
                    self.report.video.frames,
                    self.report.video.packets_out,
                    self.report.audio.packets_in,
                    self.report.audio.frames,
                    self.report.audio.packets_out,
                );
                Ok(self.report)
            }
            (Err(e), closed) => {
                self.enter(PipelineState::Failed);
                if let Err(close_err) = closed {
                    log::warn!("source close after failed finalize: {}", close_err);
                }
                log::error!("pipeline failed ({}): {}", e.kind(), e);
                Err(e)
            }
            (Ok(()), Err(e)) => {
                self.enter(PipelineState::Failed);
                log::error!("pipeline failed ({}): {}", e.kind(), e);
                Err(e)
            }
        }
    }

    fn enter(&mut self, state: PipelineState) {
        log::info!("pipeline {} -> {}", self.state, state);
        self.state = state;
    }

    fn stream(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.enter(PipelineState::Streaming);
        let mut packet_index: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(PipeError::Cancelled);
            }
            let Some(Demuxed { kind, packet }) = self.demuxer.next_packet()? else {
                return Ok(());
            };
            log::debug!("process packet {} ({})", packet_index, kind);
            packet_index += 1;
            self.report.counters(kind).packets_in += 1;
            match kind {
                MediaKind::Video => {
                    let frames = self.stages.video_decoder.decode(packet)?;
                    self.encode_video(frames)?;
                }
                MediaKind::Audio => {
                    let frames = self.stages.audio_decoder.decode(packet)?;
                    self.encode_audio(frames)?;
                }
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.enter(PipelineState::Flushing);
        let frames = self.stages.video_decoder.flush()?;
        self.encode_video(frames)?;
        let frames = self.stages.audio_decoder.flush()?;
        self.encode_audio(frames)?;

        let packets = self.stages.video_encoder.flush()?;
        self.mux_all(MediaKind::Video, packets)?;
        let packets = self.stages.audio_encoder.flush()?;
        self.mux_all(MediaKind::Audio, packets)
    }

    fn encode_video(&mut self, frames: Vec<V>) -> Result<()> {
        for frame in frames {
            self.report.video.frames += 1;
            let frame = self.stages.video_transform.transform(frame)?;
            let packets = self.stages.video_encoder.encode(frame)?;
            self.mux_all(MediaKind::Video, packets)?;
        }
        Ok(())
    }

    fn encode_audio(&mut self, frames: Vec<A>) -> Result<()> {
        for frame in frames {
            self.report.audio.frames += 1;
            let packets = self.stages.audio_encoder.encode(frame)?;
            self.mux_all(MediaKind::Audio, packets)?;
        }
        Ok(())
    }

    fn mux_all(&mut self, kind: MediaKind, packets: Vec<P>) -> Result<()> {
        for packet in packets {
            self.muxer.mux(kind, packet)?;
            self.report.counters(kind).packets_out += 1;
        }
        Ok(())
    }

    fn fail(&mut self, err: PipeError) -> PipeError {
        self.enter(PipelineState::Failed);
        log::error!("pipeline failed ({}): {}", err.kind(), err);
        self.muxer.abort();
        if let Err(e) = self.demuxer.close() {
            log::warn!("source close during cleanup failed: {}", e);
        }
        err
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
