//! Streaming transcode pipeline: demux a source byte stream, decode, transform
//! video frames, re-encode with the source codecs and mux to a destination
//! byte stream without touching local disk.

pub mod avio;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod fifo;
pub mod frame;
pub mod input;
pub mod io;
pub mod metadata;
pub mod output;
pub mod packet;
pub mod pipeline;
pub mod scaler;
pub mod stream;
pub mod transcode;
pub mod transform;

#[cfg(test)]
mod testing;

pub use error::{PipeError, Result, Side};
pub use io::{ReadStream, WriteStream};
pub use output::ContainerOptions;
pub use pipeline::{PipelineReport, PipelineState, StreamCounters};
pub use transcode::{transcode, transcode_with};
pub use transform::{FrameTransform, Grayscale};

/// Registers FFmpeg components and quiets its own logging. Call once at startup.
pub fn init() -> Result<()> {
    ffmpeg_next::init()
        .map_err(|e| PipeError::container_open(format!("ffmpeg init: {}", e)))?;
    ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Warning);
    Ok(())
}
