use ffmpeg_next::{Rational, format::Pixel};

use crate::{
    error::{PipeError, Result},
    frame::{RawAudioFrame, RawVideoFrame},
    packet::RawPacket,
    pipeline::DecodeStage,
    scaler::Scaler,
    stream::{AvStream, MediaKind},
};

enum DecoderType {
    Video(ffmpeg_next::codec::decoder::Video),
    Audio(ffmpeg_next::codec::decoder::Audio),
}

impl DecoderType {
    fn send_packet(
        &mut self,
        packet: &ffmpeg_next::codec::packet::Packet,
    ) -> std::result::Result<(), ffmpeg_next::Error> {
        match self {
            DecoderType::Video(decoder) => decoder.send_packet(packet),
            DecoderType::Audio(decoder) => decoder.send_packet(packet),
        }
    }

    fn send_eof(&mut self) -> std::result::Result<(), ffmpeg_next::Error> {
        match self {
            DecoderType::Video(decoder) => decoder.send_eof(),
            DecoderType::Audio(decoder) => decoder.send_eof(),
        }
    }
}

/// EAGAIN and end-of-stream both mean "nothing more for now".
fn drained(err: &ffmpeg_next::Error) -> bool {
    match err {
        ffmpeg_next::Error::Eof => true,
        ffmpeg_next::Error::Other { errno } => *errno == ffmpeg_next::util::error::EAGAIN,
        _ => false,
    }
}

/// Decoder bound to one input stream.
pub struct Decoder {
    stream: AvStream,
    kind: MediaKind,
    inner: DecoderType,
    decoder_time_base: Rational,
    flushed: bool,
}

unsafe impl Send for Decoder {}

impl Decoder {
    pub fn new(stream: &AvStream) -> Result<Self> {
        let kind = stream.kind().ok_or_else(|| {
            PipeError::container_open(format!("stream {} is neither video nor audio", stream.index()))
        })?;
        let open_err = |e: ffmpeg_next::Error| {
            PipeError::decode(kind, format!("cannot open {} decoder: {}", stream.codec_id().name(), e))
        };

        let mut decoder_ctx = ffmpeg_next::codec::Context::new();
        unsafe {
            let ctx = decoder_ctx.as_mut_ptr();
            (*ctx).time_base = stream.time_base().into();
            (*ctx).pkt_timebase = stream.time_base().into();
        }
        decoder_ctx
            .set_parameters(stream.parameters().clone())
            .map_err(open_err)?;

        let inner = match kind {
            MediaKind::Video => {
                let video_decoder = decoder_ctx.decoder().video().map_err(open_err)?;
                if video_decoder.format() == Pixel::None
                    || video_decoder.width() == 0
                    || video_decoder.height() == 0
                {
                    return Err(PipeError::container_open("missing video codec parameters"));
                }
                DecoderType::Video(video_decoder)
            }
            MediaKind::Audio => {
                let audio_decoder = decoder_ctx.decoder().audio().map_err(open_err)?;
                if audio_decoder.rate() == 0 {
                    return Err(PipeError::container_open("missing audio codec parameters"));
                }
                DecoderType::Audio(audio_decoder)
            }
        };

        log::debug!(
            "{} decoder opened for stream {} ({})",
            kind,
            stream.index(),
            stream.codec_id().name()
        );

        Ok(Self {
            stream: stream.clone(),
            kind,
            inner,
            decoder_time_base: stream.time_base(),
            flushed: false,
        })
    }

    pub fn stream_index(&self) -> usize {
        self.stream.index()
    }

    fn error(&self, reason: impl std::fmt::Display) -> PipeError {
        PipeError::decode(self.kind, reason)
    }

    pub fn send_packet(&mut self, packet: RawPacket) -> Result<()> {
        if packet.index() != self.stream_index() {
            return Err(self.error(format!(
                "packet of stream {} sent to decoder bound to stream {}",
                packet.index(),
                self.stream_index()
            )));
        }
        if self.flushed {
            return Err(self.error("packet after flush"));
        }
        let raw = packet.rescaled(self.decoder_time_base);
        self.inner.send_packet(&raw).map_err(|e| self.error(e))
    }

    /// Returns false when the decoder already saw end of input.
    pub fn send_eof(&mut self) -> Result<bool> {
        if self.flushed {
            return Ok(false);
        }
        self.flushed = true;
        self.inner.send_eof().map_err(|e| self.error(e))?;
        Ok(true)
    }

    pub fn receive_video(&mut self) -> Result<Option<ffmpeg_next::frame::Video>> {
        let DecoderType::Video(decoder) = &mut self.inner else {
            return Err(self.error("not a video decoder"));
        };
        let mut frame = ffmpeg_next::frame::Video::empty();
        match decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(frame)),
            Err(e) if drained(&e) => Ok(None),
            Err(e) => Err(self.error(e)),
        }
    }

    pub fn receive_audio(&mut self) -> Result<Option<ffmpeg_next::frame::Audio>> {
        let DecoderType::Audio(decoder) = &mut self.inner else {
            return Err(self.error("not an audio decoder"));
        };
        let mut frame = ffmpeg_next::frame::Audio::empty();
        match decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(frame)),
            Err(e) if drained(&e) => Ok(None),
            Err(e) => Err(self.error(e)),
        }
    }
}

/// Video decode stage. Pictures leave as packed RGB24 with their timestamps
/// in the source stream's time base.
pub struct VideoDecoder {
    decoder: Decoder,
    scaler: Option<Scaler>,
}

impl VideoDecoder {
    pub fn new(stream: &AvStream) -> Result<Self> {
        if !stream.is_video() {
            return Err(PipeError::container_open(format!(
                "stream {} is not a video stream",
                stream.index()
            )));
        }
        Ok(Self {
            decoder: Decoder::new(stream)?,
            scaler: None,
        })
    }

    fn to_rgb(&mut self, frame: ffmpeg_next::frame::Video) -> Result<RawVideoFrame> {
        let pts = frame.timestamp().or(frame.pts());
        // Decoded pictures may still be referenced by the codec; the transform
        // writes in place, so always convert into a fresh buffer.
        if !self.scaler.as_ref().is_some_and(|s| s.accepts(&frame)) {
            let scaler = Scaler::convert(frame.format(), Pixel::RGB24, frame.width(), frame.height())
                .map_err(|e| self.decoder.error(format!("rgb conversion setup: {}", e)))?;
            self.scaler = Some(scaler);
        }
        let mut rgb = ffmpeg_next::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler
                .run(&frame, &mut rgb)
                .map_err(|e| PipeError::decode(MediaKind::Video, format!("rgb conversion: {}", e)))?;
        }
        rgb.set_pts(pts);
        Ok(RawVideoFrame::from(rgb))
    }

    fn receive_all(&mut self) -> Result<Vec<RawVideoFrame>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.decoder.receive_video()? {
            frames.push(self.to_rgb(frame)?);
        }
        Ok(frames)
    }
}

impl DecodeStage for VideoDecoder {
    type Packet = RawPacket;
    type Frame = RawVideoFrame;

    fn decode(&mut self, packet: RawPacket) -> Result<Vec<RawVideoFrame>> {
        self.decoder.send_packet(packet)?;
        self.receive_all()
    }

    fn flush(&mut self) -> Result<Vec<RawVideoFrame>> {
        if !self.decoder.send_eof()? {
            return Ok(Vec::new());
        }
        self.receive_all()
    }
}

/// Audio decode stage. Frames keep the codec's native sample format.
pub struct AudioDecoder {
    decoder: Decoder,
}

impl AudioDecoder {
    pub fn new(stream: &AvStream) -> Result<Self> {
        if !stream.is_audio() {
            return Err(PipeError::container_open(format!(
                "stream {} is not an audio stream",
                stream.index()
            )));
        }
        Ok(Self {
            decoder: Decoder::new(stream)?,
        })
    }

    fn receive_all(&mut self) -> Result<Vec<RawAudioFrame>> {
        let mut frames = Vec::new();
        while let Some(mut frame) = self.decoder.receive_audio()? {
            let pts = frame.timestamp().or(frame.pts());
            frame.set_pts(pts);
            frames.push(RawAudioFrame::from(frame));
        }
        Ok(frames)
    }
}

impl DecodeStage for AudioDecoder {
    type Packet = RawPacket;
    type Frame = RawAudioFrame;

    fn decode(&mut self, packet: RawPacket) -> Result<Vec<RawAudioFrame>> {
        self.decoder.send_packet(packet)?;
        self.receive_all()
    }

    fn flush(&mut self) -> Result<Vec<RawAudioFrame>> {
        if !self.decoder.send_eof()? {
            return Ok(Vec::new());
        }
        self.receive_all()
    }
}
