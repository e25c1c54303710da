use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::imageops::{self, FilterType};
use image::RgbImage;

/// Frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const LANDSCAPE: Resolution = Resolution {
        width: 1024,
        height: 576,
    };
    pub const PORTRAIT: Resolution = Resolution {
        width: 576,
        height: 1024,
    };
    pub const SQUARE: Resolution = Resolution {
        width: 768,
        height: 768,
    };

    /// Sizes the image-to-video endpoint accepts.
    pub const SUPPORTED: [Resolution; 3] = [Self::LANDSCAPE, Self::PORTRAIT, Self::SQUARE];

    pub fn is_supported(self) -> bool {
        Self::SUPPORTED.contains(&self)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
        let resolution = Resolution {
            width: w.trim().parse().map_err(|_| format!("bad width in {s:?}"))?,
            height: h.trim().parse().map_err(|_| format!("bad height in {s:?}"))?,
        };
        if !resolution.is_supported() {
            return Err(format!(
                "{resolution} is not supported; use one of 1024x576, 576x1024, 768x768"
            ));
        }
        Ok(resolution)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOrigin {
    UserUploaded,
    ModelGenerated,
    ExtractedLastFrame,
}

/// A still image used to seed one segment.
#[derive(Debug, Clone)]
pub struct SeedImage {
    pub image: RgbImage,
    pub origin: SeedOrigin,
    /// Where the seed was saved for display and bundling, once persisted.
    pub path: Option<PathBuf>,
}

impl SeedImage {
    pub fn new(image: RgbImage, origin: SeedOrigin) -> Self {
        Self {
            image,
            origin,
            path: None,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.image.width(),
            height: self.image.height(),
        }
    }

    /// Coerces the bitmap to a size the video endpoint accepts. Supported
    /// sizes pass through untouched; anything else becomes the default square.
    pub fn normalized(mut self) -> Self {
        let current = self.resolution();
        if current.is_supported() {
            return self;
        }
        tracing::warn!(
            from = %current,
            to = %Resolution::SQUARE,
            "Seed image size not accepted by the video endpoint, resizing"
        );
        self.image = imageops::resize(
            &self.image,
            Resolution::SQUARE.width,
            Resolution::SQUARE.height,
            FilterType::Lanczos3,
        );
        self.path = None;
        self
    }

    /// PNG bytes for multipart upload.
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut png = Vec::new();
        self.image
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)?;
        Ok(png)
    }

    pub fn save(&mut self, path: &Path) -> Result<(), image::ImageError> {
        self.image.save_with_format(path, image::ImageFormat::Png)?;
        self.path = Some(path.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(width: u32, height: u32) -> SeedImage {
        SeedImage::new(RgbImage::new(width, height), SeedOrigin::UserUploaded)
    }

    #[test]
    fn unsupported_sizes_become_supported() {
        for (w, h) in [(512, 512), (1920, 1080), (1, 1), (1024, 577), (576, 1023)] {
            let normalized = seed(w, h).normalized();
            assert!(
                normalized.resolution().is_supported(),
                "{w}x{h} -> {}",
                normalized.resolution()
            );
            assert_eq!(normalized.resolution(), Resolution::SQUARE);
        }
    }

    #[test]
    fn supported_sizes_are_untouched() {
        for r in Resolution::SUPPORTED {
            let mut image = RgbImage::new(r.width, r.height);
            image.put_pixel(3, 4, image::Rgb([10, 20, 30]));
            let s = SeedImage::new(image.clone(), SeedOrigin::ModelGenerated).normalized();
            assert_eq!(s.resolution(), r);
            assert_eq!(s.image, image);
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = seed(640, 480).normalized();
        let twice = once.clone().normalized();
        assert_eq!(once.image, twice.image);
    }

    #[test]
    fn origin_survives_resize() {
        let s = SeedImage::new(RgbImage::new(10, 10), SeedOrigin::ExtractedLastFrame).normalized();
        assert_eq!(s.origin, SeedOrigin::ExtractedLastFrame);
    }

    #[test]
    fn resolution_parses_supported_only() {
        assert_eq!("1024x576".parse::<Resolution>(), Ok(Resolution::LANDSCAPE));
        assert_eq!("576X1024".parse::<Resolution>(), Ok(Resolution::PORTRAIT));
        assert!("640x480".parse::<Resolution>().is_err());
        assert!("wide".parse::<Resolution>().is_err());
    }

    #[test]
    fn png_round_trips_through_image_crate() {
        let s = seed(768, 768);
        let png = s.to_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (768, 768));
    }
}
