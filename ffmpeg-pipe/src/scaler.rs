use ffmpeg_next::{format::Pixel, frame::Video, software::scaling};

/// Pixel format / size converter between decoder, transform and encoder.
pub struct Scaler {
    context: scaling::Context,
}

impl Scaler {
    pub fn new(context: scaling::Context) -> Self {
        Self { context }
    }

    /// Same-size conversion from `src` to `dst` pixel format.
    pub fn convert(src: Pixel, dst: Pixel, width: u32, height: u32) -> Result<Self, ffmpeg_next::Error> {
        let context = scaling::Context::get(
            src,
            width,
            height,
            dst,
            width,
            height,
            scaling::Flags::BILINEAR,
        )?;
        Ok(Self::new(context))
    }

    /// Whether this scaler was built for frames of the given shape.
    pub fn accepts(&self, frame: &Video) -> bool {
        let input = self.context.input();
        input.format == frame.format() && input.width == frame.width() && input.height == frame.height()
    }

    pub fn run(&mut self, frame: &Video, dst: &mut Video) -> Result<(), ffmpeg_next::Error> {
        self.context.run(frame, dst)
    }
}

unsafe impl Send for Scaler {}
