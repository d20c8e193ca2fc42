use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-Union with another rectangle.
    pub fn iou(&self, other: &Rect) -> f32 {
        let ix = ((self.x + self.width).min(other.x + other.width) - self.x.max(other.x)).max(0.0);
        let iy =
            ((self.y + self.height).min(other.y + other.height) - self.y.max(other.y)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Clamp to `[0, width] × [0, height]`.
    pub fn clamp_to(&self, width: f32, height: f32) -> Rect {
        let x1 = self.x.clamp(0.0, width);
        let y1 = self.y.clamp(0.0, height);
        let x2 = (self.x + self.width).clamp(0.0, width);
        let y2 = (self.y + self.height).clamp(0.0, height);
        Rect::from_corners(x1, y1, x2, y2)
    }
}

/// A face found by the SCRFD detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceDetection {
    pub rect: Rect,
    pub confidence: f32,
    /// Five-point landmarks: left eye, right eye, nose, left mouth, right mouth.
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// A document region found by the YOLO detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentCandidate {
    pub rect: Rect,
    pub confidence: f32,
    pub class_id: usize,
}

impl DocumentCandidate {
    /// `[x1, y1, x2, y2, confidence, class_id]`
    pub fn to_row(&self) -> Vec<f32> {
        vec![
            self.rect.x,
            self.rect.y,
            self.rect.x + self.rect.width,
            self.rect.y + self.rect.height,
            self.confidence,
            self.class_id as f32,
        ]
    }
}

/// Something NMS can rank and compare.
pub trait Scored {
    fn rect(&self) -> &Rect;
    fn score(&self) -> f32;
}

impl Scored for FaceDetection {
    fn rect(&self) -> &Rect {
        &self.rect
    }
    fn score(&self) -> f32 {
        self.confidence
    }
}

impl Scored for DocumentCandidate {
    fn rect(&self) -> &Rect {
        &self.rect
    }
    fn score(&self) -> f32 {
        self.confidence
    }
}

/// L2-normalized ArcFace embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Cosine similarity in `[-1, 1]`.
    pub fn cosine(&self, other: &Embedding) -> f32 {
        let (dot, na, nb) = self
            .values
            .iter()
            .zip(&other.values)
            .fold((0.0f32, 0.0f32, 0.0f32), |(d, a2, b2), (a, b)| {
                (d + a * b, a2 + a * a, b2 + b * b)
            });
        let denom = na.sqrt() * nb.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Similarity as a percentage: negative cosine counts as no resemblance.
    pub fn similarity_percent(&self, other: &Embedding) -> f32 {
        (self.cosine(other).max(0.0) * 100.0).min(100.0)
    }
}
