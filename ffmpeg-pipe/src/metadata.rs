//! Source container summary, logged when a run starts.

use std::fmt;

use ffmpeg_next::format::context::Input;

use crate::stream::{AvStream, Rate};

#[derive(Debug, Clone, serde::Serialize)]
pub struct FormatInfo {
    /// Demuxer name, e.g. "mov,mp4,m4a,3gp,3g2,mj2"
    pub format_name: String,
    /// None when the container does not declare one.
    pub duration_sec: Option<f64>,
    pub bit_rate: i64,
    pub nb_streams: u32,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StreamInfo {
    pub index: usize,
    /// "video" | "audio" | "subtitle" etc.
    pub codec_type: String,
    pub codec_name: String,
    pub time_base: Rate,
    /// Frame rate for video, sample rate for audio.
    pub rate: Rate,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MediaInfo {
    pub format: FormatInfo,
    pub streams: Vec<StreamInfo>,
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format.format_name)?;
        match self.format.duration_sec {
            Some(d) => write!(f, " duration={:.3}s", d)?,
            None => write!(f, " duration=N/A")?,
        }
        write!(f, " bit_rate={}", self.format.bit_rate)?;
        for s in &self.streams {
            write!(
                f,
                "; #{} {} {} tb={}",
                s.index, s.codec_type, s.codec_name, s.time_base
            )?;
            if let (Some(w), Some(h)) = (s.width, s.height) {
                write!(f, " {}x{}@{}", w, h, s.rate)?;
            }
            if let (Some(sr), Some(ch)) = (s.sample_rate, s.channels) {
                write!(f, " {}Hz {}ch", sr, ch)?;
            }
        }
        Ok(())
    }
}

pub fn probe(input: &Input) -> MediaInfo {
    // AV_TIME_BASE = 1_000_000; duration is in 1/AV_TIME_BASE seconds
    let duration_sec = match input.duration() {
        d if d == ffmpeg_next::ffi::AV_NOPTS_VALUE as i64 || d <= 0 => None,
        d => Some(d as f64 / 1_000_000.0),
    };

    let streams = input
        .streams()
        .map(|stream| {
            let av_stream = AvStream::from(stream);
            let codec_type = format!("{:?}", av_stream.parameters().medium()).to_lowercase();
            let (width, height) = if av_stream.is_video() {
                (Some(av_stream.width()), Some(av_stream.height()))
            } else {
                (None, None)
            };
            let (sample_rate, channels) = if av_stream.is_audio() {
                (Some(av_stream.sample_rate()), Some(av_stream.channels()))
            } else {
                (None, None)
            };
            StreamInfo {
                index: av_stream.index(),
                codec_type,
                codec_name: av_stream.codec_id().name().to_string(),
                time_base: av_stream.time_base().into(),
                rate: av_stream.rate().into(),
                width,
                height,
                sample_rate,
                channels,
            }
        })
        .collect();

    MediaInfo {
        format: FormatInfo {
            format_name: input.format().name().to_string(),
            duration_sec,
            bit_rate: input.bit_rate(),
            nb_streams: input.nb_streams(),
        },
        streams,
    }
}
