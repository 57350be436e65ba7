//! Filter identifiers, intensity validation and the per-pixel transforms.
//!
//! Every filter leaves alpha untouched. Intensity blends between the original
//! pixel and the filter's target, except where noted on the variant.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Largest box-blur radius, reached at intensity 1.0.
const MAX_BLUR_RADIUS: f32 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Grayscale,
    Invert,
    /// Adds `round(255 * intensity)` to every color channel.
    Brighten,
    /// Box blur; intensity scales the radius instead of blending.
    Blur,
    GaussianBlur,
    Sharpen,
    EdgeDetect,
    Emboss,
}

impl FilterKind {
    pub const ALL: [FilterKind; 8] = [
        FilterKind::Grayscale,
        FilterKind::Invert,
        FilterKind::Brighten,
        FilterKind::Blur,
        FilterKind::GaussianBlur,
        FilterKind::Sharpen,
        FilterKind::EdgeDetect,
        FilterKind::Emboss,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FilterKind::Grayscale => "grayscale",
            FilterKind::Invert => "invert",
            FilterKind::Brighten => "brighten",
            FilterKind::Blur => "blur",
            FilterKind::GaussianBlur => "gaussian_blur",
            FilterKind::Sharpen => "sharpen",
            FilterKind::EdgeDetect => "edge_detect",
            FilterKind::Emboss => "emboss",
        }
    }
}

impl std::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown filter: {0}")]
pub struct UnknownFilter(String);

impl FromStr for FilterKind {
    type Err = UnknownFilter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_lowercase().replace(['-', ' '], "_");
        FilterKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| UnknownFilter(s.to_string()))
    }
}

/// Filter strength, validated to lie in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Intensity(f32);

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("intensity must be a finite number in 0.0..=1.0, got {0}")]
pub struct InvalidIntensity(pub f32);

impl Intensity {
    pub const FULL: Intensity = Intensity(1.0);

    pub fn new(value: f32) -> Result<Self, InvalidIntensity> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidIntensity(value))
        }
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

/// Apply `kind` in place to a tightly packed RGBA8 buffer.
pub(crate) fn apply(kind: FilterKind, intensity: Intensity, width: u32, height: u32, rgba: &mut [u8]) {
    debug_assert_eq!(rgba.len(), width as usize * height as usize * 4);
    let t = intensity.get();

    match kind {
        FilterKind::Grayscale => map_pixels(rgba, |px| {
            let luma = luma(px[0], px[1], px[2]) as f32;
            for c in &mut px[..3] {
                *c = blend(*c, luma, t);
            }
        }),
        FilterKind::Invert => map_pixels(rgba, |px| {
            for c in &mut px[..3] {
                *c = blend(*c, 255.0 - *c as f32, t);
            }
        }),
        FilterKind::Brighten => {
            let delta = (255.0 * t).round() as i16;
            map_pixels(rgba, |px| {
                for c in &mut px[..3] {
                    *c = (*c as i16 + delta).clamp(0, 255) as u8;
                }
            })
        }
        FilterKind::Blur => {
            let radius = (t * MAX_BLUR_RADIUS).round() as u32;
            box_blur(rgba, width, height, radius);
        }
        FilterKind::GaussianBlur => convolve3(rgba, width, height, &GAUSSIAN, 16.0, t),
        FilterKind::Sharpen => convolve3(rgba, width, height, &SHARPEN, 1.0, t),
        FilterKind::EdgeDetect => convolve3(rgba, width, height, &EDGE_DETECT, 1.0, t),
        FilterKind::Emboss => convolve3(rgba, width, height, &EMBOSS, 1.0, t),
    }
}

type Kernel3 = [[i32; 3]; 3];

const GAUSSIAN: Kernel3 = [[1, 2, 1], [2, 4, 2], [1, 2, 1]];
const SHARPEN: Kernel3 = [[0, -1, 0], [-1, 5, -1], [0, -1, 0]];
const EDGE_DETECT: Kernel3 = [[-1, -1, -1], [-1, 8, -1], [-1, -1, -1]];
const EMBOSS: Kernel3 = [[-2, -1, 0], [-1, 1, 1], [0, 1, 2]];

fn map_pixels(rgba: &mut [u8], f: impl FnMut(&mut [u8])) {
    rgba.chunks_exact_mut(4).for_each(f);
}

// Integer weights keep grayscale idempotent: luma(l, l, l) == l.
#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
}

#[inline]
fn blend(orig: u8, target: f32, t: f32) -> u8 {
    let orig = orig as f32;
    (orig + (target - orig) * t).round().clamp(0.0, 255.0) as u8
}

/// 3x3 convolution with edge clamping, blended towards the result by `t`.
fn convolve3(rgba: &mut [u8], width: u32, height: u32, kernel: &Kernel3, divisor: f32, t: f32) {
    if t == 0.0 {
        return;
    }

    let src = rgba.to_vec();
    let (w, h) = (width as i64, height as i64);
    let at = |x: i64, y: i64, c: usize| -> i32 {
        let x = x.clamp(0, w - 1) as usize;
        let y = y.clamp(0, h - 1) as usize;
        src[(y * width as usize + x) * 4 + c] as i32
    };

    for y in 0..h {
        for x in 0..w {
            let base = (y as usize * width as usize + x as usize) * 4;
            for c in 0..3 {
                let mut sum = 0;
                for (ky, row) in kernel.iter().enumerate() {
                    for (kx, weight) in row.iter().enumerate() {
                        sum += weight * at(x + kx as i64 - 1, y + ky as i64 - 1, c);
                    }
                }
                let target = (sum as f32 / divisor).clamp(0.0, 255.0);
                rgba[base + c] = blend(src[base + c], target, t);
            }
        }
    }
}

/// Box blur over a summed-area table. The window is clipped at the borders and
/// averaged over the pixels it actually covers.
fn box_blur(rgba: &mut [u8], width: u32, height: u32, radius: u32) {
    if radius == 0 {
        return;
    }

    let (w, h) = (width as usize, height as usize);
    let stride = w + 1;
    // sat[(y + 1) * stride + (x + 1)] = sum of all pixels in [0..=x] x [0..=y]
    let mut sat = vec![[0u64; 3]; stride * (h + 1)];
    for y in 0..h {
        for x in 0..w {
            let px = &rgba[(y * w + x) * 4..][..3];
            let above = sat[y * stride + x + 1];
            let left = sat[(y + 1) * stride + x];
            let diag = sat[y * stride + x];
            let cell = &mut sat[(y + 1) * stride + x + 1];
            for c in 0..3 {
                cell[c] = px[c] as u64 + above[c] + left[c] - diag[c];
            }
        }
    }

    let r = radius as usize;
    for y in 0..h {
        let (y0, y1) = (y.saturating_sub(r), (y + r).min(h - 1));
        for x in 0..w {
            let (x0, x1) = (x.saturating_sub(r), (x + r).min(w - 1));
            let count = ((x1 - x0 + 1) * (y1 - y0 + 1)) as u64;
            let br = sat[(y1 + 1) * stride + x1 + 1];
            let bl = sat[(y1 + 1) * stride + x0];
            let tr = sat[y0 * stride + x1 + 1];
            let tl = sat[y0 * stride + x0];
            let base = (y * w + x) * 4;
            for c in 0..3 {
                let sum = br[c] + tl[c] - bl[c] - tr[c];
                rgba[base + c] = ((sum + count / 2) / count) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, px: [u8; 4]) -> Vec<u8> {
        px.repeat((width * height) as usize)
    }

    #[test]
    fn intensity_bounds() {
        assert!(Intensity::new(0.0).is_ok());
        assert!(Intensity::new(1.0).is_ok());
        assert!(Intensity::new(0.25).is_ok());
        assert_eq!(Intensity::new(1.5), Err(InvalidIntensity(1.5)));
        assert!(Intensity::new(-0.1).is_err());
        assert!(Intensity::new(f32::NAN).is_err());
        assert!(Intensity::new(f32::INFINITY).is_err());
    }

    #[test]
    fn filter_kind_parses_loose_names() {
        assert_eq!("invert".parse::<FilterKind>(), Ok(FilterKind::Invert));
        assert_eq!("Gaussian-Blur".parse::<FilterKind>(), Ok(FilterKind::GaussianBlur));
        assert_eq!("edge detect".parse::<FilterKind>(), Ok(FilterKind::EdgeDetect));
        assert!("sepia".parse::<FilterKind>().is_err());
    }

    #[test]
    fn filter_kind_names_round_trip() {
        for kind in FilterKind::ALL {
            assert_eq!(kind.as_str().parse::<FilterKind>(), Ok(kind));
        }
    }

    #[test]
    fn invert_full_flips_rgb_and_keeps_alpha() {
        let mut px = solid(2, 2, [255, 0, 0, 255]);
        apply(FilterKind::Invert, Intensity::FULL, 2, 2, &mut px);
        assert_eq!(px, solid(2, 2, [0, 255, 255, 255]));
    }

    #[test]
    fn invert_half_meets_in_the_middle() {
        let mut px = vec![200, 0, 100, 7];
        apply(FilterKind::Invert, Intensity::new(0.5).unwrap(), 1, 1, &mut px);
        assert_eq!(px, vec![128, 128, 128, 7]);
    }

    #[test]
    fn zero_intensity_is_identity_for_blending_filters() {
        let original = vec![10, 20, 30, 40, 200, 150, 100, 50];
        for kind in [
            FilterKind::Grayscale,
            FilterKind::Invert,
            FilterKind::Brighten,
            FilterKind::Blur,
            FilterKind::GaussianBlur,
            FilterKind::Sharpen,
            FilterKind::EdgeDetect,
            FilterKind::Emboss,
        ] {
            let mut px = original.clone();
            apply(kind, Intensity::new(0.0).unwrap(), 2, 1, &mut px);
            assert_eq!(px, original, "{kind} at zero intensity changed pixels");
        }
    }

    #[test]
    fn grayscale_is_idempotent_at_full_intensity() {
        let mut once = vec![255, 0, 0, 255, 12, 200, 77, 128, 0, 0, 255, 0];
        apply(FilterKind::Grayscale, Intensity::FULL, 3, 1, &mut once);
        let mut twice = once.clone();
        apply(FilterKind::Grayscale, Intensity::FULL, 3, 1, &mut twice);

        assert_eq!(once, twice);
        assert_eq!(&once[..4], &[76, 76, 76, 255]);
    }

    #[test]
    fn brighten_saturates() {
        let mut px = vec![250, 10, 0, 9];
        apply(FilterKind::Brighten, Intensity::new(0.1).unwrap(), 1, 1, &mut px);
        assert_eq!(px, vec![255, 36, 26, 9]);
    }

    #[test]
    fn blur_keeps_uniform_images_uniform() {
        let mut px = solid(5, 4, [40, 80, 120, 255]);
        apply(FilterKind::Blur, Intensity::FULL, 5, 4, &mut px);
        assert_eq!(px, solid(5, 4, [40, 80, 120, 255]));
    }

    #[test]
    fn blur_averages_neighbours() {
        // 3x1: black, white, black with radius 1 (intensity 0.125 * 8 = 1)
        let mut px = vec![0, 0, 0, 255, 255, 255, 255, 255, 0, 0, 0, 255];
        apply(FilterKind::Blur, Intensity::new(0.125).unwrap(), 3, 1, &mut px);
        assert_eq!(px, vec![128, 128, 128, 255, 85, 85, 85, 255, 128, 128, 128, 255]);
    }

    #[test]
    fn gaussian_keeps_uniform_images_uniform() {
        let mut px = solid(3, 3, [90, 60, 30, 200]);
        apply(FilterKind::GaussianBlur, Intensity::FULL, 3, 3, &mut px);
        assert_eq!(px, solid(3, 3, [90, 60, 30, 200]));
    }

    #[test]
    fn edge_detect_zeroes_flat_regions() {
        let mut px = solid(3, 3, [90, 60, 30, 255]);
        apply(FilterKind::EdgeDetect, Intensity::FULL, 3, 3, &mut px);
        assert_eq!(px, solid(3, 3, [0, 0, 0, 255]));
    }

    #[test]
    fn sharpen_and_emboss_keep_flat_regions() {
        for kind in [FilterKind::Sharpen, FilterKind::Emboss] {
            let mut px = solid(3, 3, [90, 60, 30, 255]);
            apply(kind, Intensity::FULL, 3, 3, &mut px);
            assert_eq!(px, solid(3, 3, [90, 60, 30, 255]), "{kind}");
        }
    }

    #[test]
    fn filters_never_touch_alpha() {
        let original: Vec<u8> = (0..36u8).map(|i| i.wrapping_mul(37)).collect();
        for kind in FilterKind::ALL {
            let mut px = original.clone();
            apply(kind, Intensity::FULL, 3, 3, &mut px);
            for (after, before) in px.chunks_exact(4).zip(original.chunks_exact(4)) {
                assert_eq!(after[3], before[3], "{kind} changed alpha");
            }
        }
    }
}
