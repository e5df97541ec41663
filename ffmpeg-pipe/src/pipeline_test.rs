use std::collections::VecDeque;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use tokio_util::sync::CancellationToken;

use super::{DecodeStage, Demuxed, Demuxer, EncodeStage, Muxer, Pipeline, Stages};
use crate::{
    error::{PipeError, Result, Side},
    frame::Raster,
    stream::{MediaKind, Rate, StreamDescriptor, StreamPair, VideoParams},
    transform::Grayscale,
};

// ------------------------------------------------------------------------
// Mocks
// ------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Body {
    Source,
    Video(Raster),
    Audio(Vec<i32>),
}

#[derive(Debug, Clone, PartialEq)]
struct TestPacket {
    kind: MediaKind,
    seq: u32,
    body: Body,
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Muxed(MediaKind, u32, Body),
    Finalized,
}

/// Transport handle shared by the mock demuxer/muxer; counts close calls.
#[derive(Clone)]
struct MockTransport {
    closes: Arc<AtomicUsize>,
    closed: bool,
}

impl MockTransport {
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

enum Step {
    Packet(MediaKind),
    Fail(std::io::ErrorKind),
}

struct MockDemuxer {
    streams: StreamPair,
    script: VecDeque<Step>,
    seq: u32,
    transport: MockTransport,
}

impl Demuxer for MockDemuxer {
    type Packet = TestPacket;

    fn streams(&self) -> &StreamPair {
        &self.streams
    }

    fn next_packet(&mut self) -> Result<Option<Demuxed<TestPacket>>> {
        match self.script.pop_front() {
            None => Ok(None),
            Some(Step::Fail(kind)) => Err(PipeError::transport(
                Side::Source,
                std::io::Error::new(kind, "stream ended mid-packet"),
            )),
            Some(Step::Packet(kind)) => {
                self.seq += 1;
                Ok(Some(Demuxed {
                    kind,
                    packet: TestPacket {
                        kind,
                        seq: self.seq,
                        body: Body::Source,
                    },
                }))
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.transport.close();
        Ok(())
    }
}

struct MockMuxer {
    events: Arc<Mutex<Vec<Event>>>,
    transport: MockTransport,
    fail_finalize: bool,
}

impl Muxer for MockMuxer {
    type Packet = TestPacket;

    fn mux(&mut self, kind: MediaKind, packet: TestPacket) -> Result<()> {
        assert_eq!(kind, packet.kind, "packet routed to the wrong output stream");
        self.events
            .lock()
            .unwrap()
            .push(Event::Muxed(kind, packet.seq, packet.body));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let result = if self.fail_finalize {
            Err(PipeError::mux("trailer rejected"))
        } else {
            self.events.lock().unwrap().push(Event::Finalized);
            Ok(())
        };
        self.transport.close();
        result
    }

    fn abort(&mut self) {
        self.transport.close();
    }
}

/// Holds one packet back before yielding a frame, like a codec with reordering delay.
struct MockVideoDecoder {
    pending: Option<Raster>,
    fail_on: Option<u32>,
}

impl DecodeStage for MockVideoDecoder {
    type Packet = TestPacket;
    type Frame = Raster;

    fn decode(&mut self, packet: TestPacket) -> Result<Vec<Raster>> {
        assert_eq!(packet.kind, MediaKind::Video);
        if self.fail_on == Some(packet.seq) {
            return Err(PipeError::decode(MediaKind::Video, "corrupt slice"));
        }
        let shade = (packet.seq * 20) as u8;
        let frame = Raster::filled(4, 2, [shade, 255 - shade, 30]);
        Ok(self.pending.replace(frame).into_iter().collect())
    }

    fn flush(&mut self) -> Result<Vec<Raster>> {
        Ok(self.pending.take().into_iter().collect())
    }
}

/// Emits one packet per frame but lags one frame behind until flushed.
struct MockVideoEncoder {
    held: Option<Raster>,
    produced: u32,
    flushed: bool,
}

impl MockVideoEncoder {
    fn packet(&mut self, raster: Raster) -> TestPacket {
        self.produced += 1;
        TestPacket {
            kind: MediaKind::Video,
            seq: self.produced,
            body: Body::Video(raster),
        }
    }
}

impl EncodeStage for MockVideoEncoder {
    type Frame = Raster;
    type Packet = TestPacket;

    fn encode(&mut self, frame: Raster) -> Result<Vec<TestPacket>> {
        assert_eq!((frame.width(), frame.height()), (4, 2));
        match self.held.replace(frame) {
            Some(prev) => Ok(vec![self.packet(prev)]),
            None => Ok(Vec::new()),
        }
    }

    fn flush(&mut self) -> Result<Vec<TestPacket>> {
        if self.flushed {
            return Ok(Vec::new());
        }
        self.flushed = true;
        match self.held.take() {
            Some(last) => Ok(vec![self.packet(last)]),
            None => Ok(Vec::new()),
        }
    }
}

/// Each packet decodes to two sample frames.
struct MockAudioDecoder;

impl DecodeStage for MockAudioDecoder {
    type Packet = TestPacket;
    type Frame = i32;

    fn decode(&mut self, packet: TestPacket) -> Result<Vec<i32>> {
        assert_eq!(packet.kind, MediaKind::Audio);
        let base = packet.seq as i32 * 100;
        Ok(vec![base, base + 1])
    }

    fn flush(&mut self) -> Result<Vec<i32>> {
        Ok(Vec::new())
    }
}

/// Packs three frames per packet; the remainder is emitted on flush.
struct MockAudioEncoder {
    buffer: Vec<i32>,
    produced: u32,
    flushed: bool,
}

impl MockAudioEncoder {
    fn packet(&mut self) -> TestPacket {
        self.produced += 1;
        TestPacket {
            kind: MediaKind::Audio,
            seq: self.produced,
            body: Body::Audio(std::mem::take(&mut self.buffer)),
        }
    }
}

impl EncodeStage for MockAudioEncoder {
    type Frame = i32;
    type Packet = TestPacket;

    fn encode(&mut self, frame: i32) -> Result<Vec<TestPacket>> {
        self.buffer.push(frame);
        if self.buffer.len() == 3 {
            Ok(vec![self.packet()])
        } else {
            Ok(Vec::new())
        }
    }

    fn flush(&mut self) -> Result<Vec<TestPacket>> {
        if self.flushed || self.buffer.is_empty() {
            self.flushed = true;
            return Ok(Vec::new());
        }
        self.flushed = true;
        Ok(vec![self.packet()])
    }
}

fn streams() -> StreamPair {
    StreamPair {
        video: StreamDescriptor {
            index: 0,
            kind: MediaKind::Video,
            codec: "mpeg4".to_string(),
            rate: Rate::new(25, 1),
            video: Some(VideoParams {
                width: 4,
                height: 2,
                pixel_format: "yuv420p".to_string(),
            }),
        },
        audio: StreamDescriptor {
            index: 1,
            kind: MediaKind::Audio,
            codec: "aac".to_string(),
            rate: Rate::new(48000, 1),
            video: None,
        },
    }
}

struct Harness {
    events: Arc<Mutex<Vec<Event>>>,
    closes: Arc<AtomicUsize>,
    pipeline: Pipeline<TestPacket, Raster, i32>,
}

fn harness(script: Vec<Step>, fail_video_on: Option<u32>, fail_finalize: bool) -> Harness {
    let events = Arc::new(Mutex::new(Vec::new()));
    let closes = Arc::new(AtomicUsize::new(0));
    let transport = MockTransport {
        closes: Arc::clone(&closes),
        closed: false,
    };
    let demuxer = MockDemuxer {
        streams: streams(),
        script: script.into(),
        seq: 0,
        transport: transport.clone(),
    };
    let muxer = MockMuxer {
        events: Arc::clone(&events),
        transport,
        fail_finalize,
    };
    let stages = Stages {
        video_decoder: Box::new(MockVideoDecoder {
            pending: None,
            fail_on: fail_video_on,
        }),
        video_transform: Box::new(Grayscale),
        video_encoder: Box::new(MockVideoEncoder {
            held: None,
            produced: 0,
            flushed: false,
        }),
        audio_decoder: Box::new(MockAudioDecoder),
        audio_encoder: Box::new(MockAudioEncoder {
            buffer: Vec::new(),
            produced: 0,
            flushed: false,
        }),
    };
    Harness {
        events,
        closes,
        pipeline: Pipeline::new(Box::new(demuxer), Box::new(muxer), stages),
    }
}

fn interleaved(video: usize, audio: usize) -> Vec<Step> {
    let mut steps = Vec::new();
    for i in 0..video.max(audio) {
        if i < video {
            steps.push(Step::Packet(MediaKind::Video));
        }
        if i < audio {
            steps.push(Step::Packet(MediaKind::Audio));
        }
    }
    steps
}

fn muxed(events: &[Event], kind: MediaKind) -> Vec<(u32, Body)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Muxed(k, seq, body) if *k == kind => Some((*seq, body.clone())),
            _ => None,
        })
        .collect()
}

// ------------------------------------------------------------------------
// Tests
// ------------------------------------------------------------------------

#[test]
fn successful_run_keeps_every_frame() {
    let h = harness(interleaved(5, 4), None, false);
    assert_eq!(h.pipeline.state(), super::PipelineState::Init);
    let report = h.pipeline.run(&CancellationToken::new()).unwrap();

    assert_eq!(report.video.packets_in, 5);
    assert_eq!(report.video.frames, 5);
    assert_eq!(report.video.packets_out, 5);
    assert_eq!(report.audio.packets_in, 4);
    assert_eq!(report.audio.frames, 8);
    // 8 frames packed by three: 3 + 3 + 2 (flush)
    assert_eq!(report.audio.packets_out, 3);

    let events = h.events.lock().unwrap();
    assert_eq!(events.last(), Some(&Event::Finalized));
    assert_eq!(h.closes.load(Ordering::SeqCst), 2);
}

#[test]
fn video_is_transformed_and_audio_passes_through() {
    let h = harness(interleaved(3, 2), None, false);
    h.pipeline.run(&CancellationToken::new()).unwrap();
    let events = h.events.lock().unwrap();

    let video = muxed(&events, MediaKind::Video);
    assert_eq!(video.len(), 3);
    for (_, body) in &video {
        let Body::Video(raster) = body else {
            panic!("expected video body");
        };
        for px in raster.pixels() {
            assert_eq!(px[0], px[1]);
            assert_eq!(px[1], px[2]);
        }
    }

    let audio: Vec<i32> = muxed(&events, MediaKind::Audio)
        .into_iter()
        .flat_map(|(_, body)| match body {
            Body::Audio(samples) => samples,
            other => panic!("expected audio body, got {:?}", other),
        })
        .collect();
    // packets 2 and 4 in container order are the audio ones
    assert_eq!(audio, vec![200, 201, 400, 401]);
}

#[test]
fn per_stream_order_is_preserved() {
    let h = harness(interleaved(6, 6), None, false);
    h.pipeline.run(&CancellationToken::new()).unwrap();
    let events = h.events.lock().unwrap();
    for kind in [MediaKind::Video, MediaKind::Audio] {
        let seqs: Vec<u32> = muxed(&events, kind).into_iter().map(|(s, _)| s).collect();
        let mut sorted = seqs.clone();
        sorted.sort();
        assert_eq!(seqs, sorted, "{} packets reordered", kind);
    }
}

#[test]
fn video_flush_precedes_audio_flush() {
    let h = harness(interleaved(2, 1), None, false);
    h.pipeline.run(&CancellationToken::new()).unwrap();
    let events = h.events.lock().unwrap();
    // Streaming yields nothing muxable: the video decoder and encoder each lag a
    // frame and the audio encoder needs three frames. Everything comes out of
    // FLUSHING, video first.
    let kinds: Vec<MediaKind> = events
        .iter()
        .filter_map(|e| match e {
            Event::Muxed(kind, _, _) => Some(*kind),
            Event::Finalized => None,
        })
        .collect();
    assert_eq!(
        kinds,
        vec![MediaKind::Video, MediaKind::Video, MediaKind::Audio]
    );
}

#[test]
fn empty_source_still_finalizes() {
    let h = harness(Vec::new(), None, false);
    let report = h.pipeline.run(&CancellationToken::new()).unwrap();
    assert_eq!(report, super::PipelineReport::default());
    assert_eq!(*h.events.lock().unwrap(), vec![Event::Finalized]);
    assert_eq!(h.closes.load(Ordering::SeqCst), 2);
}

#[test]
fn truncated_source_fails_with_transport_error_and_closes_both() {
    let mut script = interleaved(3, 3);
    script.push(Step::Fail(std::io::ErrorKind::UnexpectedEof));
    script.extend(interleaved(2, 0));
    let h = harness(script, None, false);

    let err = h.pipeline.run(&CancellationToken::new()).unwrap_err();
    assert_eq!(err.kind(), "transport");
    assert!(matches!(
        err,
        PipeError::Transport {
            side: Side::Source,
            ..
        }
    ));
    assert_eq!(h.closes.load(Ordering::SeqCst), 2);
    assert!(!h.events.lock().unwrap().contains(&Event::Finalized));
}

#[test]
fn decode_failure_aborts_without_skipping() {
    let h = harness(interleaved(5, 5), Some(5), false);
    let err = h.pipeline.run(&CancellationToken::new()).unwrap_err();
    assert_eq!(err.kind(), "decode");
    assert_eq!(err.stream(), Some(MediaKind::Video));
    assert_eq!(h.closes.load(Ordering::SeqCst), 2);

    let events = h.events.lock().unwrap();
    assert!(!events.contains(&Event::Finalized));
    // Container packet 5 is the third video packet; nothing after it was muxed.
    assert!(muxed(&events, MediaKind::Video).len() <= 1);
}

#[test]
fn cancellation_fails_and_cleans_up() {
    let h = harness(interleaved(3, 3), None, false);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = h.pipeline.run(&cancel).unwrap_err();
    assert!(matches!(err, PipeError::Cancelled));
    assert_eq!(h.closes.load(Ordering::SeqCst), 2);
    assert!(h.events.lock().unwrap().is_empty());
}

#[test]
fn finalize_failure_is_reported_and_source_closed() {
    let h = harness(interleaved(2, 2), None, true);
    let err = h.pipeline.run(&CancellationToken::new()).unwrap_err();
    assert_eq!(err.kind(), "mux");
    assert_eq!(h.closes.load(Ordering::SeqCst), 2);
}

#[test]
fn encoder_flush_is_idempotent() {
    let mut encoder = MockVideoEncoder {
        held: None,
        produced: 0,
        flushed: false,
    };
    encoder.encode(Raster::filled(4, 2, [1, 1, 1])).unwrap();
    assert_eq!(encoder.flush().unwrap().len(), 1);
    assert!(encoder.flush().unwrap().is_empty());
}
