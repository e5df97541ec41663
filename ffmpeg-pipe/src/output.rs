use std::{collections::HashMap, ffi::CString, os::raw::c_int, ptr};

use ffmpeg_next::{Dictionary, Rational, codec, ffi, format::context::Output};

use crate::{
    avio::AvioWriter,
    error::{PipeError, Result, Side},
    io::WriteStream,
    packet::RawPacket,
    pipeline::Muxer,
    stream::MediaKind,
};

/// Muxers that need `frag_keyframe+empty_moov` to write without seeking back.
const MP4_FAMILY: &[&str] = &["mp4", "mov", "ismv", "ipod"];
const FRAGMENTED_MOVFLAGS: &[&str] = &["frag_keyframe", "empty_moov"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerOptions {
    /// FFmpeg muxer short name.
    pub format: String,
    /// Extra `movflags`, merged with the ones a non-seekable destination needs.
    pub movflags: Option<String>,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            format: "mp4".to_string(),
            movflags: None,
        }
    }
}

impl ContainerOptions {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            movflags: None,
        }
    }

    pub fn with_movflags(mut self, movflags: impl Into<String>) -> Self {
        self.movflags = Some(movflags.into());
        self
    }

    pub fn is_mp4_family(&self) -> bool {
        MP4_FAMILY.contains(&self.format.as_str())
    }

    /// Effective `movflags` for a destination with the given seek capability.
    pub fn movflags_for(&self, seekable: bool) -> Option<String> {
        let mut flags: Vec<String> = self
            .movflags
            .iter()
            .flat_map(|f| f.split('+'))
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        if self.is_mp4_family() && !seekable {
            for required in FRAGMENTED_MOVFLAGS {
                if !flags.iter().any(|f| f == required) {
                    flags.push(required.to_string());
                }
            }
        }
        if flags.is_empty() {
            None
        } else {
            Some(flags.join("+"))
        }
    }
}

struct OutputStream {
    index: usize,
    packets: u64,
}

/// Container writer over a destination transport. Streams are added up front;
/// the header is written before the first packet, or on close for an empty run.
pub struct AvOutput {
    // Released before `io`; the format context borrows the I/O context.
    inner: Option<Output>,
    io: AvioWriter,
    format: String,
    movflags: Option<String>,
    streams: HashMap<MediaKind, OutputStream>,
    have_written_header: bool,
    closed: bool,
}

unsafe impl Send for AvOutput {}

impl AvOutput {
    pub fn open(destination: Box<dyn WriteStream>, options: &ContainerOptions) -> Result<Self> {
        let mut io = AvioWriter::new(destination)
            .map_err(|e| PipeError::transport(Side::Destination, e))?;
        let format = CString::new(options.format.as_str())
            .map_err(|_| PipeError::container_open("output format name contains NUL"))?;

        let mut ps = ptr::null_mut();
        let ret = unsafe {
            ffi::avformat_alloc_output_context2(&mut ps, ptr::null(), format.as_ptr(), ptr::null())
        };
        if ret < 0 || ps.is_null() {
            io.abort();
            return Err(PipeError::container_open(format!(
                "unknown output format {}: {}",
                options.format,
                ffmpeg_next::Error::from(ret)
            )));
        }
        unsafe {
            (*ps).pb = io.as_mut_ptr();
            (*ps).flags |= ffi::AVFMT_FLAG_CUSTOM_IO as c_int;
        }
        let inner = unsafe { Output::wrap(ps) };

        let movflags = options.movflags_for(io.seekable());
        log::info!(
            "output container {} (seekable={}, movflags={})",
            options.format,
            io.seekable(),
            movflags.as_deref().unwrap_or("-")
        );

        Ok(Self {
            inner: Some(inner),
            io,
            format: options.format.clone(),
            movflags,
            streams: HashMap::new(),
            have_written_header: false,
            closed: false,
        })
    }

    pub fn movflags(&self) -> Option<&str> {
        self.movflags.as_deref()
    }

    /// Whether encoders feeding this container must emit global headers.
    pub fn needs_global_header(&self) -> bool {
        self.inner.as_ref().is_some_and(|output| {
            output
                .format()
                .flags()
                .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER)
        })
    }

    fn output(&mut self) -> Result<&mut Output> {
        self.inner
            .as_mut()
            .ok_or_else(|| PipeError::mux("output already closed"))
    }

    pub fn add_stream(
        &mut self,
        kind: MediaKind,
        parameters: codec::Parameters,
        time_base: Rational,
    ) -> Result<usize> {
        if self.have_written_header {
            return Err(PipeError::mux("cannot add a stream after the header"));
        }
        if self.streams.contains_key(&kind) {
            return Err(PipeError::mux(format!("{} stream already added", kind)));
        }
        let output = self.output()?;
        let mut writer_stream = output
            .add_stream(ffmpeg_next::encoder::find(parameters.id()))
            .map_err(PipeError::mux)?;
        writer_stream.set_parameters(parameters);
        writer_stream.set_time_base(time_base);
        unsafe {
            // Let the muxer pick the tag for this container.
            (*(*writer_stream.as_mut_ptr()).codecpar).codec_tag = 0;
        }
        let index = writer_stream.index();
        self.streams.insert(kind, OutputStream { index, packets: 0 });
        Ok(index)
    }

    fn write_error(&mut self, e: ffmpeg_next::Error) -> PipeError {
        match self.io.take_error() {
            Some(io_err) => PipeError::transport(Side::Destination, io_err),
            None => PipeError::mux(e),
        }
    }

    fn ensure_header(&mut self) -> Result<()> {
        if self.have_written_header {
            return Ok(());
        }
        let mut opts = Dictionary::new();
        if let Some(flags) = &self.movflags {
            opts.set("movflags", flags);
        }
        let output = self.output()?;
        let result = output.write_header_with(opts);
        self.have_written_header = true;
        match result {
            Ok(unused) => {
                for (key, value) in unused.iter() {
                    log::warn!("muxer ignored option {}={}", key, value);
                }
                Ok(())
            }
            Err(e) => Err(self.write_error(e)),
        }
    }

    fn finalize(&mut self) -> Result<()> {
        self.ensure_header()?;
        let output = self.output()?;
        if let Err(e) = output.write_trailer() {
            return Err(self.write_error(e));
        }
        Ok(())
    }

    fn release_context(&mut self) {
        if let Some(mut output) = self.inner.take() {
            // The I/O context is ours; keep the format context from closing it.
            unsafe { (*output.as_mut_ptr()).pb = ptr::null_mut() };
            drop(output);
        }
    }
}

impl Muxer for AvOutput {
    type Packet = RawPacket;

    fn mux(&mut self, kind: MediaKind, packet: RawPacket) -> Result<()> {
        if self.closed {
            return Err(PipeError::mux("output already closed"));
        }
        let index = self
            .streams
            .get(&kind)
            .map(|s| s.index)
            .ok_or_else(|| PipeError::mux(format!("no {} stream in output", kind)))?;
        self.ensure_header()?;

        let output = self.output()?;
        let out_time_base = output
            .stream(index)
            .map(|s| s.time_base())
            .ok_or_else(|| PipeError::mux(format!("output stream {} not found", index)))?;
        let mut p = packet.rescaled(out_time_base);
        p.set_stream(index);
        p.set_position(-1);
        if let Err(e) = p.write_interleaved(output) {
            return Err(self.write_error(e));
        }
        if let Some(stream) = self.streams.get_mut(&kind) {
            stream.packets += 1;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let finalized = self.finalize();
        self.release_context();
        for (kind, stream) in &self.streams {
            log::debug!("{} output stream {}: {} packets", kind, stream.index, stream.packets);
        }
        match finalized {
            Ok(()) => self
                .io
                .close()
                .map_err(|e| PipeError::transport(Side::Destination, e)),
            Err(e) => {
                self.io.abort();
                Err(e)
            }
        }
    }

    fn abort(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.release_context();
        self.io.abort();
    }
}

impl Drop for AvOutput {
    fn drop(&mut self) {
        self.release_context();
    }
}
