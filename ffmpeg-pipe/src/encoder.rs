use ffmpeg_next::{Rational, Rescale, codec, ffi, format::Pixel, picture};

use crate::{
    error::{PipeError, Result},
    fifo::AudioFifo,
    frame::{RawAudioFrame, RawVideoFrame},
    packet::RawPacket,
    pipeline::EncodeStage,
    scaler::Scaler,
    stream::{AvStream, MediaKind, Rate, StreamDescriptor, VideoParams, pixel_format_name},
};

pub enum EncoderType {
    Video(codec::encoder::Video),
    Audio(codec::encoder::Audio),
}

impl EncoderType {
    fn send_frame(
        &mut self,
        frame: &ffmpeg_next::Frame,
    ) -> std::result::Result<(), ffmpeg_next::Error> {
        match self {
            EncoderType::Video(encoder) => encoder.send_frame(frame),
            EncoderType::Audio(encoder) => encoder.send_frame(frame),
        }
    }

    fn send_eof(&mut self) -> std::result::Result<(), ffmpeg_next::Error> {
        match self {
            EncoderType::Video(encoder) => encoder.send_eof(),
            EncoderType::Audio(encoder) => encoder.send_eof(),
        }
    }

    fn receive_packet(
        &mut self,
    ) -> std::result::Result<Option<ffmpeg_next::Packet>, ffmpeg_next::Error> {
        let mut packet = ffmpeg_next::Packet::empty();
        let result = match self {
            EncoderType::Video(encoder) => encoder.receive_packet(&mut packet),
            EncoderType::Audio(encoder) => encoder.receive_packet(&mut packet),
        };
        match result {
            Ok(()) => Ok(Some(packet)),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Ok(None)
            }
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn as_ptr(&self) -> *const ffi::AVCodecContext {
        match self {
            EncoderType::Video(encoder) => unsafe { encoder.as_ptr() },
            EncoderType::Audio(encoder) => unsafe { encoder.as_ptr() },
        }
    }
}

/// Encoder for one output stream, configured from the matching input stream
/// so the output keeps its codec, rate and picture geometry.
pub struct Encoder {
    kind: MediaKind,
    inner: EncoderType,
    source_time_base: Rational,
    encoder_time_base: Rational,
    descriptor: StreamDescriptor,
    flushed: bool,
}

unsafe impl Send for Encoder {}

impl Encoder {
    pub fn video(stream: &AvStream, global_header: bool) -> Result<Self> {
        let kind = MediaKind::Video;
        let codec = find_encoder(stream, kind)?;
        let open_err = |e: ffmpeg_next::Error| {
            PipeError::encode(kind, format!("cannot open {} encoder: {}", codec.name(), e))
        };

        let mut encoder = codec::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(open_err)?;

        let rate = stream.rate();
        let time_base = if Rate::from(rate).is_valid() {
            rate.invert()
        } else {
            log::warn!("video stream has no frame rate, encoding in the stream time base");
            stream.time_base()
        };

        encoder.set_width(stream.width());
        encoder.set_height(stream.height());
        encoder.set_format(stream.pixel_format());
        encoder.set_frame_rate(Some(rate));
        encoder.set_time_base(time_base);
        if stream.bit_rate() > 0 {
            encoder.set_bit_rate(stream.bit_rate());
        }
        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let encoder = encoder.open_as(codec).map_err(open_err)?;
        let encoder_time_base: Rational = unsafe { (*encoder.as_ptr()).time_base.into() };

        let descriptor = StreamDescriptor {
            index: 0,
            kind,
            codec: codec.id().name().to_string(),
            rate: rate.into(),
            video: Some(VideoParams {
                width: encoder.width(),
                height: encoder.height(),
                pixel_format: pixel_format_name(encoder.format()),
            }),
        };
        log::info!("video encoder opened: {} tb={}", descriptor, encoder_time_base);

        Ok(Self {
            kind,
            inner: EncoderType::Video(encoder),
            source_time_base: stream.time_base(),
            encoder_time_base,
            descriptor,
            flushed: false,
        })
    }

    pub fn audio(stream: &AvStream, global_header: bool) -> Result<Self> {
        let kind = MediaKind::Audio;
        let codec = find_encoder(stream, kind)?;
        let open_err = |e: ffmpeg_next::Error| {
            PipeError::encode(kind, format!("cannot open {} encoder: {}", codec.name(), e))
        };

        let mut encoder = codec::Context::new_with_codec(codec)
            .encoder()
            .audio()
            .map_err(open_err)?;

        let sample_rate = stream.sample_rate() as i32;
        encoder.set_rate(sample_rate);
        encoder.set_format(stream.sample_format());
        encoder.set_time_base(Rational::new(1, sample_rate.max(1)));
        if stream.bit_rate() > 0 {
            encoder.set_bit_rate(stream.bit_rate());
        }
        unsafe {
            let params = stream.parameters().as_ptr();
            let ret = ffi::av_channel_layout_copy(
                &mut (*encoder.as_mut_ptr()).ch_layout,
                &(*params).ch_layout,
            );
            if ret < 0 {
                return Err(open_err(ffmpeg_next::Error::from(ret)));
            }
        }
        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let encoder = encoder.open_as(codec).map_err(open_err)?;
        let encoder_time_base: Rational = unsafe { (*encoder.as_ptr()).time_base.into() };

        let descriptor = StreamDescriptor {
            index: 0,
            kind,
            codec: codec.id().name().to_string(),
            rate: Rate::new(encoder.rate() as i32, 1),
            video: None,
        };
        log::info!(
            "audio encoder opened: {} {:?} {}ch frame_size={}",
            descriptor,
            encoder.format(),
            stream.channels(),
            encoder.frame_size()
        );

        Ok(Self {
            kind,
            inner: EncoderType::Audio(encoder),
            source_time_base: stream.time_base(),
            encoder_time_base,
            descriptor,
            flushed: false,
        })
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Output stream attributes, index left at 0 for the muxer to assign.
    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    pub fn time_base(&self) -> Rational {
        self.encoder_time_base
    }

    /// Codec parameters for the muxer stream fed by this encoder.
    pub fn parameters(&self) -> Result<codec::Parameters> {
        unsafe { parameters_from_context(self.inner.as_ptr()) }.map_err(|e| self.error(e))
    }

    fn error(&self, reason: impl std::fmt::Display) -> PipeError {
        PipeError::encode(self.kind, reason)
    }

    /// A source stream timestamp in the encoder's time base.
    fn encoder_pts(&self, pts: Option<i64>) -> Option<i64> {
        pts.map(|pts| pts.rescale(self.source_time_base, self.encoder_time_base))
    }

    /// Samples per frame the codec requires; 0 when it takes any size.
    fn frame_size(&self) -> usize {
        unsafe { (*self.inner.as_ptr()).frame_size }.max(0) as usize
    }

    fn send_frame(&mut self, frame: &mut ffmpeg_next::Frame) -> Result<()> {
        let pts = self.encoder_pts(frame.pts());
        frame.set_pts(pts);
        self.submit(frame)
    }

    /// Send a frame already timed in the encoder's time base.
    fn submit(&mut self, frame: &ffmpeg_next::Frame) -> Result<()> {
        if self.flushed {
            return Err(self.error("frame after flush"));
        }
        self.inner.send_frame(frame).map_err(|e| self.error(e))
    }

    fn receive_all(&mut self) -> Result<Vec<RawPacket>> {
        let mut packets = Vec::new();
        while let Some(mut packet) = self.inner.receive_packet().map_err(|e| self.error(e))? {
            // One tick of 1/rate is one picture.
            if self.kind == MediaKind::Video && packet.duration() == 0 {
                packet.set_duration(1);
            }
            packets.push(RawPacket::new(packet, self.encoder_time_base));
        }
        Ok(packets)
    }

    /// Returns no packets once end of input has been signalled.
    pub fn flush(&mut self) -> Result<Vec<RawPacket>> {
        if self.flushed {
            return Ok(Vec::new());
        }
        self.flushed = true;
        self.inner.send_eof().map_err(|e| self.error(e))?;
        self.receive_all()
    }
}

/// Snapshot of an opened codec context's parameters.
pub(crate) unsafe fn parameters_from_context(
    ctx: *const ffi::AVCodecContext,
) -> std::result::Result<codec::Parameters, ffmpeg_next::Error> {
    let mut parameters = codec::Parameters::new();
    let ret = unsafe { ffi::avcodec_parameters_from_context(parameters.as_mut_ptr(), ctx) };
    if ret < 0 {
        return Err(ffmpeg_next::Error::from(ret));
    }
    Ok(parameters)
}

fn find_encoder(stream: &AvStream, kind: MediaKind) -> Result<ffmpeg_next::Codec> {
    let id = stream.codec_id();
    ffmpeg_next::encoder::find(id)
        .ok_or_else(|| PipeError::encode(kind, format!("no encoder available for {}", id.name())))
}

/// Video encode stage. Accepts RGB24 pictures of the source geometry and
/// converts them to the encoder's pixel format.
pub struct VideoEncoder {
    encoder: Encoder,
    scaler: Option<Scaler>,
}

impl VideoEncoder {
    pub fn new(stream: &AvStream, global_header: bool) -> Result<Self> {
        Ok(Self {
            encoder: Encoder::video(stream, global_header)?,
            scaler: None,
        })
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    fn geometry(&self) -> (u32, u32, Pixel) {
        match &self.encoder.inner {
            EncoderType::Video(encoder) => (encoder.width(), encoder.height(), encoder.format()),
            EncoderType::Audio(_) => (0, 0, Pixel::None),
        }
    }

    fn convert(&mut self, frame: RawVideoFrame) -> Result<ffmpeg_next::frame::Video> {
        let (width, height, format) = self.geometry();
        if frame.width() != width || frame.height() != height {
            return Err(self.encoder.error(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                width,
                height
            )));
        }

        let source = frame.as_video();
        let mut out = if source.format() == format {
            source.clone()
        } else {
            if !self.scaler.as_ref().is_some_and(|s| s.accepts(source)) {
                let scaler = Scaler::convert(source.format(), format, width, height)
                    .map_err(|e| self.encoder.error(format!("pixel conversion setup: {}", e)))?;
                self.scaler = Some(scaler);
            }
            let mut converted = ffmpeg_next::frame::Video::empty();
            if let Some(scaler) = self.scaler.as_mut() {
                scaler
                    .run(source, &mut converted)
                    .map_err(|e| PipeError::encode(MediaKind::Video, format!("pixel conversion: {}", e)))?;
            }
            converted
        };
        out.set_pts(source.pts());
        // Let the encoder choose picture types.
        out.set_kind(picture::Type::None);
        Ok(out)
    }
}

impl EncodeStage for VideoEncoder {
    type Frame = RawVideoFrame;
    type Packet = RawPacket;

    fn encode(&mut self, frame: RawVideoFrame) -> Result<Vec<RawPacket>> {
        let mut frame = self.convert(frame)?;
        self.encoder.send_frame(&mut frame)?;
        self.encoder.receive_all()
    }

    fn flush(&mut self) -> Result<Vec<RawPacket>> {
        self.encoder.flush()
    }
}

/// Audio encode stage. Codecs with a fixed frame size get their input
/// re-chunked through a sample FIFO, since decoders may emit frames of any
/// length (priming trimmed from the first frame, variable-size codecs).
pub struct AudioEncoder {
    encoder: Encoder,
    fifo: Option<AudioFifo>,
    frame_size: usize,
    /// Pad the final frame to `frame_size` with silence.
    pad_last: bool,
    /// Timestamp of the next FIFO frame, counted in samples.
    next_pts: Option<i64>,
}

impl AudioEncoder {
    pub fn new(stream: &AvStream, global_header: bool) -> Result<Self> {
        let encoder = Encoder::audio(stream, global_header)?;
        let capabilities = find_encoder(stream, MediaKind::Audio)?.capabilities();
        let frame_size = encoder.frame_size();
        let fifo = if frame_size > 0 && !capabilities.contains(codec::Capabilities::VARIABLE_FRAME_SIZE) {
            Some(unsafe { AudioFifo::for_encoder(encoder.inner.as_ptr()) }?)
        } else {
            None
        };
        Ok(Self {
            encoder,
            fifo,
            frame_size,
            pad_last: !capabilities.contains(codec::Capabilities::SMALL_LAST_FRAME),
            next_pts: None,
        })
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Encode every full frame buffered, and with `last` the remainder too.
    fn drain(&mut self, last: bool) -> Result<Vec<RawPacket>> {
        let mut packets = Vec::new();
        let Some(fifo) = self.fifo.as_mut() else {
            return Ok(packets);
        };
        loop {
            let buffered = fifo.len();
            if buffered == 0 || (buffered < self.frame_size && !last) {
                return Ok(packets);
            }
            let take = buffered.min(self.frame_size);
            let size = if self.pad_last { self.frame_size } else { take };
            let mut frame = fifo.pop(take, size)?;
            frame.set_pts(self.next_pts);
            self.next_pts = self.next_pts.map(|pts| pts + take as i64);
            self.encoder.submit(&frame)?;
            packets.extend(self.encoder.receive_all()?);
        }
    }
}

impl EncodeStage for AudioEncoder {
    type Frame = RawAudioFrame;
    type Packet = RawPacket;

    fn encode(&mut self, mut frame: RawAudioFrame) -> Result<Vec<RawPacket>> {
        let Some(fifo) = self.fifo.as_mut() else {
            self.encoder.send_frame(frame.get_mut())?;
            return self.encoder.receive_all();
        };
        if self.encoder.flushed {
            return Err(self.encoder.error("frame after flush"));
        }
        fifo.push(frame.as_audio())?;
        if self.next_pts.is_none() {
            self.next_pts = Some(self.encoder.encoder_pts(frame.pts()).unwrap_or(0));
        }
        self.drain(false)
    }

    fn flush(&mut self) -> Result<Vec<RawPacket>> {
        let mut packets = self.drain(true)?;
        packets.extend(self.encoder.flush()?);
        Ok(packets)
    }
}
