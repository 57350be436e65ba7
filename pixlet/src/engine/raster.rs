//! Default engine: decodes through the `image` crate into an RGBA8 surface.

use std::io::Cursor;

use image::{ImageError, ImageReader, Limits};

use super::filter;
use super::{EngineError, FilterKind, ImageEngine, Intensity, PixelSurface, SurfaceInfo, SurfaceView};

/// Largest decoded surface accepted by default (512 MiB).
pub const DEFAULT_MAX_SURFACE_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Debug)]
pub struct RasterEngine {
    surface: Option<PixelSurface>,
    max_surface_bytes: u64,
}

impl Default for RasterEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RasterEngine {
    pub fn new() -> Self {
        Self {
            surface: None,
            max_surface_bytes: DEFAULT_MAX_SURFACE_BYTES,
        }
    }

    pub fn with_max_surface_bytes(mut self, max: u64) -> Self {
        self.max_surface_bytes = max;
        self
    }

    fn decode_surface(&self, encoded: &[u8]) -> Result<PixelSurface, EngineError> {
        let mut reader = ImageReader::new(Cursor::new(encoded))
            .with_guessed_format()
            .map_err(|e| EngineError::Decode(e.to_string()))?;

        if reader.format().is_none() {
            return Err(EngineError::Decode("unrecognized image format".to_string()));
        }

        let mut limits = Limits::default();
        limits.max_alloc = Some(self.max_surface_bytes);
        reader.limits(limits);

        let decoded = reader.decode().map_err(|e| match e {
            ImageError::Limits(_) => EngineError::Allocation(e.to_string()),
            other => EngineError::Decode(other.to_string()),
        })?;

        // The source may be narrower than RGBA8, so the converted surface can
        // still exceed the budget.
        let (width, height) = (decoded.width(), decoded.height());
        let byte_len = width as u64 * height as u64 * super::BYTES_PER_PIXEL as u64;
        if byte_len > self.max_surface_bytes {
            return Err(EngineError::Allocation(format!(
                "{width}x{height} surface needs {byte_len} bytes, limit is {}",
                self.max_surface_bytes
            )));
        }

        PixelSurface::from_raw(width, height, decoded.into_rgba8().into_raw())
            .ok_or_else(|| EngineError::Decode("decoder produced an empty image".to_string()))
    }
}

impl ImageEngine for RasterEngine {
    fn decode(&mut self, encoded: &[u8]) -> Result<SurfaceInfo, EngineError> {
        // Decode fully before touching the current surface so failures keep it.
        let surface = self.decode_surface(encoded)?;
        let info = surface.info();
        self.surface = Some(surface);
        Ok(info)
    }

    fn apply_filter(&mut self, kind: FilterKind, intensity: Intensity) -> Result<(), EngineError> {
        let surface = self.surface.as_mut().ok_or(EngineError::NoImageLoaded)?;
        let info = surface.info();
        filter::apply(kind, intensity, info.width, info.height, surface.pixels_mut());
        Ok(())
    }

    fn surface(&self) -> Option<SurfaceView<'_>> {
        self.surface.as_ref().map(PixelSurface::view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{encode_png, solid_png};

    #[test]
    fn decode_png_reports_dimensions() {
        let mut engine = RasterEngine::new();
        let info = engine.decode(&solid_png(3, 2, [1, 2, 3, 255])).unwrap();

        assert_eq!(info, SurfaceInfo { width: 3, height: 2 });
        let view = engine.surface().unwrap();
        assert_eq!((view.width(), view.height()), (3, 2));
        assert_eq!(view.pixels(), [1u8, 2, 3, 255].repeat(6).as_slice());
    }

    #[test]
    fn decode_converts_to_rgba() {
        let gray = image::GrayImage::from_raw(2, 1, vec![10, 200]).unwrap();
        let mut buf = Vec::new();
        image::DynamicImage::ImageLuma8(gray)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();

        let mut engine = RasterEngine::new();
        engine.decode(&buf).unwrap();
        assert_eq!(
            engine.surface().unwrap().pixels(),
            &[10u8, 10, 10, 255, 200, 200, 200, 255]
        );
    }

    #[test]
    fn malformed_bytes_are_a_decode_error() {
        let mut engine = RasterEngine::new();
        assert!(matches!(
            engine.decode(b"definitely not an image"),
            Err(EngineError::Decode(_))
        ));
        assert!(engine.surface().is_none());
    }

    #[test]
    fn truncated_png_is_a_decode_error() {
        let png = solid_png(4, 4, [9, 9, 9, 255]);
        let mut engine = RasterEngine::new();
        assert!(matches!(
            engine.decode(&png[..png.len() / 2]),
            Err(EngineError::Decode(_))
        ));
    }

    #[test]
    fn failed_decode_preserves_previous_surface() {
        let mut engine = RasterEngine::new();
        engine.decode(&solid_png(2, 2, [255, 0, 0, 255])).unwrap();

        assert!(engine.decode(b"garbage").is_err());

        let view = engine.surface().unwrap();
        assert_eq!((view.width(), view.height()), (2, 2));
        assert_eq!(view.pixels(), [255u8, 0, 0, 255].repeat(4).as_slice());
    }

    #[test]
    fn oversized_surface_is_an_allocation_error() {
        let mut engine = RasterEngine::new().with_max_surface_bytes(15);
        let png = encode_png(2, 2, &[0; 16]);
        assert!(matches!(engine.decode(&png), Err(EngineError::Allocation(_))));
        assert!(engine.surface().is_none());
    }

    #[test]
    fn filter_needs_a_surface() {
        let mut engine = RasterEngine::new();
        assert_eq!(
            engine.apply_filter(FilterKind::Invert, Intensity::FULL),
            Err(EngineError::NoImageLoaded)
        );
    }

    #[test]
    fn filter_mutates_surface_in_place() {
        let mut engine = RasterEngine::new();
        engine.decode(&solid_png(2, 2, [255, 0, 0, 255])).unwrap();
        engine
            .apply_filter(FilterKind::Invert, Intensity::FULL)
            .unwrap();
        assert_eq!(
            engine.surface().unwrap().pixels(),
            [0u8, 255, 255, 255].repeat(4).as_slice()
        );
    }
}
