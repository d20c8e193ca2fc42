//! Face crop of a document image.

use crate::types::FaceBox;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CropError {
    #[error("image decode failed: {0}")]
    Decode(#[source] image::ImageError),
    #[error("face box {0:?} covers no pixels")]
    EmptyRegion(FaceBox),
    #[error("jpeg encode failed: {0}")]
    Encode(#[source] image::ImageError),
}

/// Pixel rectangle `(x, y, width, height)` for a normalized face box,
/// clamped to the image.
pub fn pixel_region(face: &FaceBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let scale = |v: f32, extent: u32| (v.clamp(0.0, 1.0) * extent as f32).round() as u32;

    let left = scale(face.left, width);
    let top = scale(face.top, height);
    let right = scale(face.left + face.width, width);
    let bottom = scale(face.top + face.height, height);

    if right <= left || bottom <= top {
        return None;
    }
    Some((left, top, right - left, bottom - top))
}

/// Crop encoded image bytes to `face` and re-encode as JPEG.
pub fn crop_face(image_bytes: &[u8], face: &FaceBox) -> Result<Vec<u8>, CropError> {
    let image = image::load_from_memory(image_bytes).map_err(CropError::Decode)?;
    let (x, y, w, h) =
        pixel_region(face, image.width(), image.height()).ok_or(CropError::EmptyRegion(*face))?;

    let cropped = DynamicImage::ImageRgb8(image.crop_imm(x, y, w, h).to_rgb8());
    let mut out = Cursor::new(Vec::new());
    cropped
        .write_to(&mut out, ImageFormat::Jpeg)
        .map_err(CropError::Encode)?;
    Ok(out.into_inner())
}
