//! Letterbox resize into NCHW tensors and class-agnostic NMS.

use crate::types::Scored;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;

/// How an image was fitted into a square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub new_width: u32,
    pub new_height: u32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_width = ((width as f32 * scale).round() as u32).clamp(1, target);
        let new_height = ((height as f32 * scale).round() as u32).clamp(1, target);
        Self {
            scale,
            pad_x: (target - new_width) as f32 / 2.0,
            pad_y: (target - new_height) as f32 / 2.0,
            new_width,
            new_height,
        }
    }

    /// Map a point from model-input space back to the source image.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Per-model pixel normalization: `(pixel - mean) / std`.
#[derive(Debug, Clone, Copy)]
pub struct Normalization {
    pub mean: f32,
    pub std: f32,
    /// Raw pixel value used for the padding border.
    pub pad: f32,
}

/// Letterbox an RGB image into a `1×3×target×target` tensor.
pub fn to_tensor(image: &RgbImage, target: u32, norm: Normalization) -> (Array4<f32>, Letterbox) {
    let lb = Letterbox::fit(image.width(), image.height(), target);
    let resized = image::imageops::resize(image, lb.new_width, lb.new_height, FilterType::Triangle);

    let size = target as usize;
    let pad_value = (norm.pad - norm.mean) / norm.std;
    let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), pad_value);

    let x0 = lb.pad_x.floor() as usize;
    let y0 = lb.pad_y.floor() as usize;
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x0 + x as usize, y0 + y as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - norm.mean) / norm.std;
        }
    }
    (tensor, lb)
}

/// Greedy non-maximum suppression, highest score first.
pub fn nms<T: Scored + Clone>(mut items: Vec<T>, iou_threshold: f32) -> Vec<T> {
    items.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<T> = Vec::new();
    for item in items {
        if keep
            .iter()
            .all(|kept| kept.rect().iou(item.rect()) <= iou_threshold)
        {
            keep.push(item);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentCandidate, Rect};
    use image::Rgb;

    fn candidate(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> DocumentCandidate {
        DocumentCandidate {
            rect: Rect { x, y, width: w, height: h },
            confidence,
            class_id: 0,
        }
    }

    #[test]
    fn test_fit_landscape() {
        let lb = Letterbox::fit(320, 240, 640);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert_eq!((lb.new_width, lb.new_height), (640, 480));
        assert_eq!((lb.pad_x, lb.pad_y), (0.0, 80.0));
    }

    #[test]
    fn test_to_source_roundtrip() {
        let lb = Letterbox::fit(1280, 720, 640);
        let (sx, sy) = (300.0f32, 200.0f32);
        let (mx, my) = (sx * lb.scale + lb.pad_x, sy * lb.scale + lb.pad_y);
        let (rx, ry) = lb.to_source(mx, my);
        assert!((rx - sx).abs() < 0.1 && (ry - sy).abs() < 0.1);
    }

    #[test]
    fn test_tensor_padding_and_content() {
        let img = RgbImage::from_pixel(64, 32, Rgb([255, 0, 255]));
        let norm = Normalization { mean: 0.0, std: 255.0, pad: 114.0 };
        let (tensor, lb) = to_tensor(&img, 64, norm);
        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
        assert_eq!(lb.pad_y, 16.0);
        // Border rows carry the pad value, the centre the image.
        assert!((tensor[[0, 0, 0, 10]] - 114.0 / 255.0).abs() < 1e-6);
        assert!((tensor[[0, 0, 32, 10]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 1, 32, 10]].abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlaps() {
        let kept = nms(
            vec![
                candidate(5.0, 5.0, 100.0, 100.0, 0.8),
                candidate(0.0, 0.0, 100.0, 100.0, 0.9),
                candidate(200.0, 200.0, 50.0, 50.0, 0.7),
            ],
            0.45,
        );
        let scores: Vec<f32> = kept.iter().map(|c| c.confidence).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(Vec::<DocumentCandidate>::new(), 0.4).is_empty());
    }
}
