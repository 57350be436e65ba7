//! Image engine boundary.
//!
//! - **ImageEngine**: the external capability (decode, filter, surface access)
//! - **EngineBinding**: typed wrapper that feeds the engine from scratch-arena handles
//! - **raster**: default engine backed by the `image` crate
//! - **filter**: filter identifiers and pixel transforms

pub mod filter;
pub mod raster;

use crate::arena::{ScratchArena, ScratchHandle};

pub use filter::{FilterKind, Intensity, InvalidIntensity};
pub use raster::RasterEngine;

/// Bytes per RGBA8 pixel.
pub const BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("no image loaded")]
    NoImageLoaded,

    #[error("invalid filter request: {0}")]
    Filter(String),

    #[error("engine allocation failed: {0}")]
    Allocation(String),
}

impl From<InvalidIntensity> for EngineError {
    fn from(e: InvalidIntensity) -> Self {
        EngineError::Filter(e.to_string())
    }
}

/// Dimensions of a decoded surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceInfo {
    pub width: u32,
    pub height: u32,
}

impl SurfaceInfo {
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }
}

/// Decoded RGBA8 image owned by an engine.
///
/// Construction checks that the buffer holds exactly `width * height * 4` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelSurface {
    info: SurfaceInfo,
    pixels: Vec<u8>,
}

impl PixelSurface {
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let info = SurfaceInfo { width, height };
        (width > 0 && height > 0 && pixels.len() == info.byte_len()).then_some(Self { info, pixels })
    }

    pub fn info(&self) -> SurfaceInfo {
        self.info
    }

    pub fn view(&self) -> SurfaceView<'_> {
        SurfaceView {
            info: self.info,
            pixels: &self.pixels,
        }
    }

    pub(crate) fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }
}

/// Read-only borrow of the engine surface.
///
/// The borrow ends before the engine can be mutated again, so a view can never
/// observe a half-applied filter or a replaced image.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceView<'a> {
    info: SurfaceInfo,
    pixels: &'a [u8],
}

impl<'a> SurfaceView<'a> {
    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn info(&self) -> SurfaceInfo {
        self.info
    }

    pub fn pixels(&self) -> &'a [u8] {
        self.pixels
    }
}

/// External image engine capability.
///
/// Implementations own at most one surface. `decode` must leave the previous
/// surface untouched when it fails. Both mutating calls may block the calling
/// thread for as long as the work takes.
pub trait ImageEngine {
    fn decode(&mut self, encoded: &[u8]) -> Result<SurfaceInfo, EngineError>;

    fn apply_filter(&mut self, kind: FilterKind, intensity: Intensity) -> Result<(), EngineError>;

    fn surface(&self) -> Option<SurfaceView<'_>>;
}

/// Typed binding between the scratch arena and an [`ImageEngine`].
pub struct EngineBinding<E> {
    engine: E,
}

impl<E: ImageEngine> EngineBinding<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    /// Decode the first `length` bytes of a scratch region.
    ///
    /// `length` must cover the whole region; partially filled regions are
    /// rejected rather than read.
    pub fn decode(
        &mut self,
        arena: &ScratchArena,
        handle: ScratchHandle,
        length: usize,
    ) -> Result<SurfaceInfo, EngineError> {
        let region = arena
            .region(handle)
            .map_err(|e| EngineError::Allocation(e.to_string()))?;
        if region.len() != length {
            return Err(EngineError::Allocation(format!(
                "{handle} holds {} bytes, decode asked for {length}",
                region.len()
            )));
        }

        let info = self.engine.decode(region)?;
        tracing::debug!(width = info.width, height = info.height, %handle, "Decoded image");
        Ok(info)
    }

    pub fn apply_filter(&mut self, kind: FilterKind, intensity: f32) -> Result<(), EngineError> {
        let intensity = Intensity::new(intensity)?;
        if self.engine.surface().is_none() {
            return Err(EngineError::NoImageLoaded);
        }
        tracing::debug!(%kind, intensity = intensity.get(), "Applying filter");
        self.engine.apply_filter(kind, intensity)
    }

    pub fn surface_info(&self) -> Option<SurfaceView<'_>> {
        self.engine.surface()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}
