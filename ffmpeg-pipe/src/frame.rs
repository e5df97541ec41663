use crate::error::{PipeError, Result};
use crate::stream::MediaKind;

/// Packed 8-bit RGB picture: row-major, three bytes per pixel, no row padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Raster {
    pub const CHANNELS: usize = 3;

    /// Returns `None` when `data` is not exactly `width * height * 3` bytes.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize * Self::CHANNELS {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * Self::CHANNELS);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let at = (y as usize * self.width as usize + x as usize) * Self::CHANNELS;
        [self.data[at], self.data[at + 1], self.data[at + 2]]
    }

    pub fn pixels(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(Self::CHANNELS)
    }
}

/// A decoded video frame whose picture can be read and replaced as a [`Raster`].
pub trait RasterFrame {
    fn raster(&self) -> Result<Raster>;

    /// Replace the picture. The raster must have the frame's dimensions.
    fn set_raster(&mut self, raster: &Raster) -> Result<()>;
}

impl RasterFrame for Raster {
    fn raster(&self) -> Result<Raster> {
        Ok(self.clone())
    }

    fn set_raster(&mut self, raster: &Raster) -> Result<()> {
        if raster.width != self.width || raster.height != self.height {
            return Err(PipeError::encode(
                MediaKind::Video,
                format!(
                    "raster {}x{} does not match frame {}x{}",
                    raster.width, raster.height, self.width, self.height
                ),
            ));
        }
        self.data.copy_from_slice(&raster.data);
        Ok(())
    }
}

#[derive(Clone)]
pub struct RawAudioFrame {
    frame: ffmpeg_next::frame::Audio,
}

impl RawAudioFrame {
    pub fn pts(&self) -> Option<i64> {
        self.frame.pts()
    }

    pub fn samples(&self) -> usize {
        self.frame.samples()
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::frame::Audio {
        &mut self.frame
    }

    pub fn as_audio(&self) -> &ffmpeg_next::frame::Audio {
        &self.frame
    }
}

impl From<ffmpeg_next::frame::Audio> for RawAudioFrame {
    fn from(frame: ffmpeg_next::frame::Audio) -> Self {
        Self { frame }
    }
}

/// Decoded video picture, converted to packed RGB by the decode stage.
#[derive(Clone)]
pub struct RawVideoFrame {
    frame: ffmpeg_next::frame::Video,
}

impl From<ffmpeg_next::frame::Video> for RawVideoFrame {
    fn from(frame: ffmpeg_next::frame::Video) -> Self {
        Self { frame }
    }
}

impl RawVideoFrame {
    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    pub fn pts(&self) -> Option<i64> {
        self.frame.pts()
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::frame::Video {
        &mut self.frame
    }

    pub fn as_video(&self) -> &ffmpeg_next::frame::Video {
        &self.frame
    }

    fn ensure_rgb(&self) -> Result<()> {
        if self.frame.format() != ffmpeg_next::format::Pixel::RGB24 {
            return Err(PipeError::encode(
                MediaKind::Video,
                format!("expected rgb24 frame, got {:?}", self.frame.format()),
            ));
        }
        Ok(())
    }
}

impl RasterFrame for RawVideoFrame {
    fn raster(&self) -> Result<Raster> {
        self.ensure_rgb()?;
        let width = self.width();
        let height = self.height();
        let row = width as usize * Raster::CHANNELS;
        let stride = self.frame.stride(0);
        let plane = self.frame.data(0);
        let mut data = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            data.extend_from_slice(&plane[y * stride..y * stride + row]);
        }
        Ok(Raster {
            width,
            height,
            data,
        })
    }

    fn set_raster(&mut self, raster: &Raster) -> Result<()> {
        self.ensure_rgb()?;
        if raster.width() != self.width() || raster.height() != self.height() {
            return Err(PipeError::encode(
                MediaKind::Video,
                format!(
                    "raster {}x{} does not match frame {}x{}",
                    raster.width(),
                    raster.height(),
                    self.width(),
                    self.height()
                ),
            ));
        }
        let row = raster.width() as usize * Raster::CHANNELS;
        let stride = self.frame.stride(0);
        let plane = self.frame.data_mut(0);
        for (y, src) in raster.data().chunks_exact(row).enumerate() {
            plane[y * stride..y * stride + row].copy_from_slice(src);
        }
        Ok(())
    }
}
