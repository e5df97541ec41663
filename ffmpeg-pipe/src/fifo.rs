//! Sample FIFO that re-chunks decoded audio into the frame size an encoder
//! requires.

use std::mem;

use ffmpeg_next::{ffi, frame};

use crate::{
    error::{PipeError, Result},
    stream::MediaKind,
};

fn fifo_error(reason: impl std::fmt::Display) -> PipeError {
    PipeError::encode(MediaKind::Audio, reason)
}

fn check(ret: i32, what: &str) -> Result<()> {
    if ret < 0 {
        return Err(fifo_error(format!("{}: {}", what, ffmpeg_next::Error::from(ret))));
    }
    Ok(())
}

pub struct AudioFifo {
    ptr: *mut ffi::AVAudioFifo,
    format: ffi::AVSampleFormat,
    layout: ffi::AVChannelLayout,
    rate: i32,
}

unsafe impl Send for AudioFifo {}

impl AudioFifo {
    /// A FIFO holding samples in the sample format and channel layout the
    /// encoder behind `ctx` was opened with.
    ///
    /// # Safety
    /// `ctx` must point to an opened audio codec context.
    pub unsafe fn for_encoder(ctx: *const ffi::AVCodecContext) -> Result<Self> {
        unsafe {
            let mut layout: ffi::AVChannelLayout = mem::zeroed();
            check(
                ffi::av_channel_layout_copy(&mut layout, &(*ctx).ch_layout),
                "channel layout",
            )?;
            let format = (*ctx).sample_fmt;
            let ptr = ffi::av_audio_fifo_alloc(format, layout.nb_channels, 1);
            if ptr.is_null() {
                ffi::av_channel_layout_uninit(&mut layout);
                return Err(fifo_error("audio fifo allocation failed"));
            }
            Ok(Self {
                ptr,
                format,
                layout,
                rate: (*ctx).sample_rate,
            })
        }
    }

    /// Samples per channel currently buffered.
    pub fn len(&self) -> usize {
        unsafe { ffi::av_audio_fifo_size(self.ptr) }.max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, frame: &frame::Audio) -> Result<()> {
        let samples = frame.samples() as i32;
        if samples == 0 {
            return Ok(());
        }
        unsafe {
            let raw = frame.as_ptr();
            if (*raw).format != self.format as i32
                || (*raw).ch_layout.nb_channels != self.layout.nb_channels
            {
                return Err(fifo_error(format!(
                    "decoded audio is {:?} with {} channels, encoder takes {:?} with {}",
                    frame.format(),
                    (*raw).ch_layout.nb_channels,
                    self.format,
                    self.layout.nb_channels
                )));
            }
            let written = ffi::av_audio_fifo_write(self.ptr, (*raw).extended_data as _, samples);
            check(written, "audio fifo write")?;
            if written < samples {
                return Err(fifo_error("audio fifo write was short"));
            }
        }
        Ok(())
    }

    /// Move `take` samples into a new frame of `size` samples. Samples past
    /// `take` are silence.
    pub fn pop(&mut self, take: usize, size: usize) -> Result<frame::Audio> {
        let mut out = frame::Audio::empty();
        unsafe {
            let raw = out.as_mut_ptr();
            (*raw).format = self.format as i32;
            (*raw).nb_samples = size as i32;
            (*raw).sample_rate = self.rate;
            check(
                ffi::av_channel_layout_copy(&mut (*raw).ch_layout, &self.layout),
                "channel layout",
            )?;
            check(ffi::av_frame_get_buffer(raw, 0), "audio frame allocation")?;
            if size > take {
                check(
                    ffi::av_samples_set_silence(
                        (*raw).extended_data as _,
                        take as i32,
                        (size - take) as i32,
                        self.layout.nb_channels,
                        self.format,
                    ),
                    "audio padding",
                )?;
            }
            let read = ffi::av_audio_fifo_read(self.ptr, (*raw).extended_data as _, take as i32);
            check(read, "audio fifo read")?;
            if (read as usize) < take {
                return Err(fifo_error("audio fifo read was short"));
            }
        }
        Ok(out)
    }
}

impl Drop for AudioFifo {
    fn drop(&mut self) {
        unsafe {
            ffi::av_audio_fifo_free(self.ptr);
            ffi::av_channel_layout_uninit(&mut self.layout);
        }
    }
}
