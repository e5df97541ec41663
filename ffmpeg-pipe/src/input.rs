use std::{os::raw::c_int, ptr};

use ffmpeg_next::{codec::packet::Packet, ffi, format::context::Input};

use crate::{
    avio::AvioReader,
    error::{PipeError, Result, Side},
    io::ReadStream,
    metadata::{self, MediaInfo},
    packet::RawPacket,
    pipeline::{Demuxed, Demuxer},
    stream::{AvStream, MediaKind, StreamPair},
};

/// Open a demuxer on an already configured custom I/O context.
unsafe fn open_custom_input(pb: *mut ffi::AVIOContext) -> std::result::Result<Input, ffmpeg_next::Error> {
    unsafe {
        let mut ps = ffi::avformat_alloc_context();
        if ps.is_null() {
            return Err(ffmpeg_next::Error::Unknown);
        }
        (*ps).pb = pb;
        (*ps).flags |= ffi::AVFMT_FLAG_CUSTOM_IO as c_int;

        // On failure avformat_open_input frees the context itself.
        match ffi::avformat_open_input(&mut ps, ptr::null(), ptr::null(), ptr::null_mut()) {
            0 => match ffi::avformat_find_stream_info(ps, ptr::null_mut()) {
                r if r >= 0 => Ok(Input::wrap(ps)),
                e => {
                    ffi::avformat_close_input(&mut ps);
                    Err(ffmpeg_next::Error::from(e))
                }
            },
            e => Err(ffmpeg_next::Error::from(e)),
        }
    }
}

/// Container reader over a source transport. Consumes the first video and
/// the first audio stream; packets of any other stream are skipped.
pub struct AvInput {
    // Dropped before `io`: the format context still references the I/O context.
    inner: Option<Input>,
    io: AvioReader,
    video: AvStream,
    audio: AvStream,
    streams: StreamPair,
    info: MediaInfo,
}

unsafe impl Send for AvInput {}

impl AvInput {
    pub fn open(source: Box<dyn ReadStream>) -> Result<Self> {
        let mut io = AvioReader::new(source).map_err(|e| PipeError::transport(Side::Source, e))?;
        let input = match unsafe { open_custom_input(io.as_mut_ptr()) } {
            Ok(input) => input,
            Err(e) => {
                let err = match io.take_error() {
                    Some(io_err) => PipeError::transport(Side::Source, io_err),
                    None => PipeError::container_open(format!("unrecognised container: {}", e)),
                };
                if let Err(close_err) = io.close() {
                    log::warn!("source close after failed open: {}", close_err);
                }
                return Err(err);
            }
        };

        let mut video = None;
        let mut audio = None;
        for stream in input.streams() {
            let stream = AvStream::from(stream);
            match stream.kind() {
                Some(MediaKind::Video) if video.is_none() => video = Some(stream),
                Some(MediaKind::Audio) if audio.is_none() => audio = Some(stream),
                _ => log::info!(
                    "ignoring input stream {} ({:?})",
                    stream.index(),
                    stream.parameters().medium()
                ),
            }
        }

        let info = metadata::probe(&input);
        let missing = match (video.is_some(), audio.is_some()) {
            (true, true) => None,
            (false, false) => Some("video and audio streams"),
            (false, true) => Some("a video stream"),
            (true, false) => Some("an audio stream"),
        };
        let descriptors = video
            .as_ref()
            .and_then(AvStream::descriptor)
            .zip(audio.as_ref().and_then(AvStream::descriptor));
        let (Some(video), Some(audio), Some((v, a)), None) = (video, audio, descriptors, missing)
        else {
            drop(input);
            if let Err(close_err) = io.close() {
                log::warn!("source close after failed open: {}", close_err);
            }
            return Err(PipeError::container_open(format!(
                "source has no {}",
                missing.unwrap_or("usable streams")
            )));
        };
        let streams = StreamPair { video: v, audio: a };

        Ok(Self {
            inner: Some(input),
            io,
            video,
            audio,
            streams,
            info,
        })
    }

    pub fn video_stream(&self) -> &AvStream {
        &self.video
    }

    pub fn audio_stream(&self) -> &AvStream {
        &self.audio
    }

    pub fn stream(&self, kind: MediaKind) -> &AvStream {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }

    pub fn media_info(&self) -> &MediaInfo {
        &self.info
    }

    fn read_error(&mut self, e: ffmpeg_next::Error) -> PipeError {
        match self.io.take_error() {
            Some(io_err) => PipeError::transport(Side::Source, io_err),
            None => PipeError::demux(e),
        }
    }
}

impl Demuxer for AvInput {
    type Packet = RawPacket;

    fn streams(&self) -> &StreamPair {
        &self.streams
    }

    fn next_packet(&mut self) -> Result<Option<Demuxed<RawPacket>>> {
        loop {
            let Some(inner) = self.inner.as_mut() else {
                return Ok(None);
            };
            let mut packet = Packet::empty();
            match packet.read(inner) {
                Ok(()) => {
                    let Some(kind) = self.streams.kind_of(packet.stream()) else {
                        continue;
                    };
                    // Short read of a sample the container promised in full.
                    if packet.is_corrupt() {
                        return Err(match self.io.take_error() {
                            Some(io_err) => PipeError::transport(Side::Source, io_err),
                            None => PipeError::demux(format!(
                                "truncated {} packet at byte {}",
                                kind,
                                packet.position()
                            )),
                        });
                    }
                    let time_base = self.stream(kind).time_base();
                    return Ok(Some(Demuxed {
                        kind,
                        packet: RawPacket::new(packet, time_base),
                    }));
                }
                Err(ffmpeg_next::Error::Eof) => {
                    // A failed transport read also ends the byte stream.
                    return match self.io.take_error() {
                        Some(io_err) => Err(PipeError::transport(Side::Source, io_err)),
                        None => Ok(None),
                    };
                }
                Err(e) => return Err(self.read_error(e)),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        drop(self.inner.take());
        self.io
            .close()
            .map_err(|e| PipeError::transport(Side::Source, e))
    }
}
