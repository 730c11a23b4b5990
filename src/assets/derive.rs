//! Derived images: composite, preview, high-res and optional material maps.
//!
//! CPU-bound; callers run [`derive_images`] on the blocking pool.

use crate::error::RenderError;
use crate::job::RenderOptions;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

pub const PREVIEW_SIZE: u32 = 512;
pub const HIGH_RES_SIZE: u32 = 2048;

/// Slope scale applied to Sobel gradients before building normals
const NORMAL_STRENGTH: f32 = 2.0;

/// PNG-encoded outputs of one generation
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedImages {
    pub composite: Vec<u8>,
    pub preview: Vec<u8>,
    pub high_res: Vec<u8>,
    pub normal_map: Option<Vec<u8>>,
    pub roughness_map: Option<Vec<u8>>,
    /// Composite dimensions
    pub width: u32,
    pub height: u32,
}

/// Decode a generated image and produce every artifact the options ask for.
///
/// An undecodable image is reported against `provider`, which produced it.
pub fn derive_images(
    generated: &[u8],
    options: &RenderOptions,
    provider: &str,
) -> Result<DerivedImages, RenderError> {
    let composite = image::load_from_memory(generated).map_err(|e| {
        RenderError::provider(provider, format!("Generated image is not decodable: {}", e))
    })?;
    let (width, height) = (composite.width(), composite.height());

    let preview = composite.resize_to_fill(PREVIEW_SIZE, PREVIEW_SIZE, FilterType::Lanczos3);
    let high_res = composite.resize_to_fill(HIGH_RES_SIZE, HIGH_RES_SIZE, FilterType::Lanczos3);

    let luminance = if options.generate_normal_map || options.generate_roughness_map {
        Some(normalized_luma(&composite))
    } else {
        None
    };

    let normal_map = match (&luminance, options.generate_normal_map) {
        (Some(luma), true) => Some(encode_png(&DynamicImage::ImageRgb8(sobel_normals(luma)))?),
        _ => None,
    };
    let roughness_map = match (luminance, options.generate_roughness_map) {
        (Some(luma), true) => Some(encode_png(&DynamicImage::ImageLuma8(luma))?),
        _ => None,
    };

    Ok(DerivedImages {
        composite: encode_png(&composite)?,
        preview: encode_png(&preview)?,
        high_res: encode_png(&high_res)?,
        normal_map,
        roughness_map,
        width,
        height,
    })
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, RenderError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| RenderError::Storage(format!("PNG encoding failed: {}", e)))?;
    Ok(buf)
}

/// Greyscale with its value range stretched to 0..=255.
fn normalized_luma(image: &DynamicImage) -> GrayImage {
    let mut luma = image.to_luma8();
    let (min, max) = luma
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if max > min {
        let span = (max - min) as u32;
        for pixel in luma.pixels_mut() {
            pixel.0[0] = (((pixel.0[0] - min) as u32 * 255) / span) as u8;
        }
    }
    luma
}

/// Tangent-space normals from Sobel gradients of a height field. Edges are clamped.
fn sobel_normals(height: &GrayImage) -> RgbImage {
    let (w, h) = height.dimensions();
    let sample = |x: i64, y: i64| -> f32 {
        let cx = x.clamp(0, w as i64 - 1) as u32;
        let cy = y.clamp(0, h as i64 - 1) as u32;
        height.get_pixel(cx, cy).0[0] as f32 / 255.0
    };

    RgbImage::from_fn(w, h, |x, y| {
        let (x, y) = (x as i64, y as i64);
        let gx = (sample(x + 1, y - 1) + 2.0 * sample(x + 1, y) + sample(x + 1, y + 1))
            - (sample(x - 1, y - 1) + 2.0 * sample(x - 1, y) + sample(x - 1, y + 1));
        let gy = (sample(x - 1, y + 1) + 2.0 * sample(x, y + 1) + sample(x + 1, y + 1))
            - (sample(x - 1, y - 1) + 2.0 * sample(x, y - 1) + sample(x + 1, y - 1));

        let (nx, ny, nz) = (-gx * NORMAL_STRENGTH, -gy * NORMAL_STRENGTH, 1.0f32);
        let len = (nx * nx + ny * ny + nz * nz).sqrt();
        let encode = |v: f32| (((v / len) * 0.5 + 0.5) * 255.0).round().clamp(0.0, 255.0) as u8;
        Rgb([encode(nx), encode(ny), encode(nz)])
    })
}
