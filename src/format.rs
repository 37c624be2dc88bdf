use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

/// Raw pixel layouts the decoder can be asked to emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PixelFormat {
    Rgba,
    Rgb24,
    Bgr24,
    Gray,
}

impl PixelFormat {
    /// Name understood by `-pix_fmt`.
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Rgba => "rgba",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Gray => "gray",
        }
    }

    /// Bytes per pixel.
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Rgba => 4,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
            PixelFormat::Gray => 1,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelFormat {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rgba" => Ok(PixelFormat::Rgba),
            "rgb24" => Ok(PixelFormat::Rgb24),
            "bgr24" => Ok(PixelFormat::Bgr24),
            "gray" => Ok(PixelFormat::Gray),
            other => Err(StreamError::construction(format!(
                "unsupported pixel format {other:?}"
            ))),
        }
    }
}

impl TryFrom<String> for PixelFormat {
    type Error = StreamError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PixelFormat> for String {
    fn from(format: PixelFormat) -> Self {
        format.as_str().to_string()
    }
}

/// Geometry and layout of the decoded frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VideoFormat {
    width: NonZeroU32,
    height: NonZeroU32,
    pixel_format: PixelFormat,
    fps: Option<NonZeroU32>,
}

impl VideoFormat {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Result<Self> {
        let width = NonZeroU32::new(width)
            .ok_or_else(|| StreamError::construction("width must be positive"))?;
        let height = NonZeroU32::new(height)
            .ok_or_else(|| StreamError::construction("height must be positive"))?;

        // frame_size must fit in memory on this target
        (width.get() as usize)
            .checked_mul(height.get() as usize)
            .and_then(|pixels| pixels.checked_mul(pixel_format.channels()))
            .ok_or_else(|| StreamError::construction("frame size overflows usize"))?;

        Ok(Self {
            width,
            height,
            pixel_format,
            fps: None,
        })
    }

    /// Like [`VideoFormat::new`], with the pixel format given by its ffmpeg name.
    pub fn parse(width: u32, height: u32, pixel_format: &str) -> Result<Self> {
        Self::new(width, height, pixel_format.parse()?)
    }

    /// Request a fixed output frame rate.
    pub fn with_fps(mut self, fps: u32) -> Result<Self> {
        self.fps = Some(
            NonZeroU32::new(fps).ok_or_else(|| StreamError::construction("fps must be positive"))?,
        );
        Ok(self)
    }

    pub fn width(&self) -> u32 {
        self.width.get()
    }

    pub fn height(&self) -> u32 {
        self.height.get()
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn fps(&self) -> Option<u32> {
        self.fps.map(NonZeroU32::get)
    }

    pub fn channels(&self) -> usize {
        self.pixel_format.channels()
    }

    /// Bytes in one frame: `width * height * channels`.
    pub fn frame_size(&self) -> usize {
        self.width() as usize * self.height() as usize * self.channels()
    }

    /// `(height, width, channels)`, row-major.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height() as usize, self.width() as usize, self.channels())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels() {
        assert_eq!(PixelFormat::Rgba.channels(), 4);
        assert_eq!(PixelFormat::Rgb24.channels(), 3);
        assert_eq!(PixelFormat::Bgr24.channels(), 3);
        assert_eq!(PixelFormat::Gray.channels(), 1);
    }

    #[test]
    fn test_frame_size() {
        let format = VideoFormat::parse(640, 480, "rgb24").unwrap();
        assert_eq!(format.frame_size(), 921_600);
        assert_eq!(format.shape(), (480, 640, 3));

        for pixel_format in [
            PixelFormat::Rgba,
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Gray,
        ] {
            for (w, h) in [(1, 1), (3, 7), (1920, 1080)] {
                let format = VideoFormat::new(w, h, pixel_format).unwrap();
                let expected = w as usize * h as usize * pixel_format.channels();
                assert_eq!(format.frame_size(), expected);
                assert!(format.frame_size() > 0);
            }
        }
    }

    #[test]
    fn test_unknown_pixel_format() {
        let result = VideoFormat::parse(640, 480, "yuv420p");
        assert!(matches!(result, Err(StreamError::Construction(_))));
    }

    #[test]
    fn test_zero_dimensions() {
        assert!(VideoFormat::new(0, 480, PixelFormat::Gray).is_err());
        assert!(VideoFormat::new(640, 0, PixelFormat::Gray).is_err());
    }

    #[test]
    fn test_fps() {
        let format = VideoFormat::new(2, 2, PixelFormat::Gray).unwrap();
        assert_eq!(format.fps(), None);
        assert_eq!(format.with_fps(25).unwrap().fps(), Some(25));
        assert!(format.with_fps(0).is_err());
    }

    #[test]
    fn test_pixel_format_names() {
        for name in ["rgba", "rgb24", "bgr24", "gray"] {
            let format: PixelFormat = name.parse().unwrap();
            assert_eq!(format.to_string(), name);
        }
    }
}
