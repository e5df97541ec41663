use std::fmt;

use ffmpeg_next::{Rational, codec::Parameters, format::stream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// Frame rate for video, sample rate (over 1) for audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub num: i32,
    pub den: i32,
}

impl Rate {
    pub fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl serde::Serialize for Rate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<Rational> for Rate {
    fn from(r: Rational) -> Self {
        Self::new(r.numerator(), r.denominator())
    }
}

impl From<Rate> for Rational {
    fn from(r: Rate) -> Self {
        Rational::new(r.num, r.den)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub pixel_format: String,
}

/// Library-neutral description of one elementary stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub index: usize,
    pub kind: MediaKind,
    pub codec: String,
    pub rate: Rate,
    pub video: Option<VideoParams>,
}

impl StreamDescriptor {
    /// The attributes an output encoder for this stream is initialised from:
    /// codec and rate, plus width/height/pixel format for video. The stream
    /// index is left for the muxer to assign.
    pub fn output_template(&self) -> StreamDescriptor {
        StreamDescriptor {
            index: 0,
            kind: self.kind,
            codec: self.codec.clone(),
            rate: self.rate,
            video: self.video.clone(),
        }
    }

    /// Whether `output` re-encodes this stream with the same codec, rate and
    /// picture geometry.
    pub fn is_compatible_output(&self, output: &StreamDescriptor) -> bool {
        self.kind == output.kind
            && self.codec == output.codec
            && self.rate == output.rate
            && self.video == output.video
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} codec={} rate={}",
            self.index, self.kind, self.codec, self.rate
        )?;
        if let Some(v) = &self.video {
            write!(f, " {}x{} {}", v.width, v.height, v.pixel_format)?;
        }
        Ok(())
    }
}

/// The two elementary streams a run consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPair {
    pub video: StreamDescriptor,
    pub audio: StreamDescriptor,
}

impl StreamPair {
    pub fn get(&self, kind: MediaKind) -> &StreamDescriptor {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }

    /// Kind of the stream with the given container index, if it is one of the pair.
    pub fn kind_of(&self, index: usize) -> Option<MediaKind> {
        if self.video.index == index {
            Some(MediaKind::Video)
        } else if self.audio.index == index {
            Some(MediaKind::Audio)
        } else {
            None
        }
    }
}

unsafe impl Send for AvStream {}
unsafe impl Sync for AvStream {}

/// FFmpeg stream parameters captured when the demuxer opens.
pub struct AvStream {
    index: usize,
    parameters: Parameters,
    time_base: Rational,
    rate: Rational,
}

impl AvStream {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn rate(&self) -> Rational {
        self.rate
    }

    pub fn kind(&self) -> Option<MediaKind> {
        match self.parameters.medium() {
            ffmpeg_next::media::Type::Video => Some(MediaKind::Video),
            ffmpeg_next::media::Type::Audio => Some(MediaKind::Audio),
            _ => None,
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind() == Some(MediaKind::Video)
    }

    pub fn is_audio(&self) -> bool {
        self.kind() == Some(MediaKind::Audio)
    }

    pub fn codec_id(&self) -> ffmpeg_next::codec::Id {
        self.parameters.id()
    }

    pub fn width(&self) -> u32 {
        unsafe {
            let ptr = self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            (*ptr).width.max(0) as u32
        }
    }

    pub fn height(&self) -> u32 {
        unsafe {
            let ptr = self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            (*ptr).height.max(0) as u32
        }
    }

    pub fn pixel_format(&self) -> ffmpeg_next::format::Pixel {
        unsafe {
            let ptr = self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            let raw = std::mem::transmute::<i32, ffmpeg_next::ffi::AVPixelFormat>((*ptr).format);
            ffmpeg_next::format::Pixel::from(raw)
        }
    }

    pub fn sample_format(&self) -> ffmpeg_next::format::Sample {
        unsafe {
            let ptr = self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            let raw = std::mem::transmute::<i32, ffmpeg_next::ffi::AVSampleFormat>((*ptr).format);
            ffmpeg_next::format::Sample::from(raw)
        }
    }

    pub fn bit_rate(&self) -> usize {
        unsafe {
            let ptr = self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            (*ptr).bit_rate.max(0) as usize
        }
    }

    pub fn sample_rate(&self) -> u32 {
        unsafe {
            let ptr = self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            (*ptr).sample_rate.max(0) as u32
        }
    }

    pub fn channels(&self) -> u32 {
        unsafe {
            let ptr = self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            (*ptr).ch_layout.nb_channels.max(0) as u32
        }
    }

    /// Neutral descriptor for this stream; `None` for non audio/video streams.
    pub fn descriptor(&self) -> Option<StreamDescriptor> {
        let kind = self.kind()?;
        let video = match kind {
            MediaKind::Video => Some(VideoParams {
                width: self.width(),
                height: self.height(),
                pixel_format: pixel_format_name(self.pixel_format()),
            }),
            MediaKind::Audio => None,
        };
        Some(StreamDescriptor {
            index: self.index,
            kind,
            codec: self.codec_id().name().to_string(),
            rate: self.rate.into(),
            video,
        })
    }
}

pub(crate) fn pixel_format_name(format: ffmpeg_next::format::Pixel) -> String {
    format
        .descriptor()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl From<stream::Stream<'_>> for AvStream {
    fn from(stream: stream::Stream<'_>) -> Self {
        let parameters = stream.parameters();
        let rate = match parameters.medium() {
            ffmpeg_next::media::Type::Audio => {
                let sample_rate = unsafe {
                    let ptr = parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
                    (*ptr).sample_rate
                };
                Rational::new(sample_rate, 1)
            }
            _ => {
                let avg = stream.avg_frame_rate();
                if avg.numerator() > 0 && avg.denominator() > 0 {
                    avg
                } else {
                    stream.rate()
                }
            }
        };
        Self {
            index: stream.index(),
            parameters,
            time_base: stream.time_base(),
            rate,
        }
    }
}

impl Clone for AvStream {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            parameters: self.parameters.clone(),
            time_base: self.time_base,
            rate: self.rate,
        }
    }
}
