/// Axis-aligned face box in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix0 = self.x0.max(other.x0);
        let iy0 = self.y0.max(other.y0);
        let ix1 = self.x1.min(other.x1);
        let iy1 = self.y1.min(other.y1);
        let inter = (ix1 - ix0).max(0.0) * (iy1 - iy0).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Five-point landmarks: left eye, right eye, nose tip, left and right mouth corners.
pub type Landmarks = [(f32, f32); 5];

/// Face identity vector produced by the recognition model.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
    pub model_version: Option<String>,
}

/// A detected face together with its identity embedding.
#[derive(Debug, Clone)]
pub struct FaceCandidate {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub landmarks: Landmarks,
    pub embedding: Embedding,
}

/// Pick the candidate with the largest bounding-box area.
///
/// Ties keep the first candidate encountered, so the choice depends only on
/// the order the locator returned.
pub fn largest_face(candidates: &[FaceCandidate]) -> Option<&FaceCandidate> {
    candidates.iter().fold(None, |best: Option<&FaceCandidate>, face| match best {
        Some(b) if b.bbox.area() >= face.bbox.area() => Some(b),
        _ => Some(face),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(bbox: BoundingBox, tag: f32) -> FaceCandidate {
        FaceCandidate {
            bbox,
            confidence: 0.9,
            landmarks: [(0.0, 0.0); 5],
            embedding: Embedding {
                values: vec![tag],
                model_version: None,
            },
        }
    }

    #[test]
    fn largest_face_of_empty_is_none() {
        assert!(largest_face(&[]).is_none());
    }

    #[test]
    fn largest_face_picks_max_area() {
        let faces = vec![
            candidate(BoundingBox::new(0.0, 0.0, 50.0, 50.0), 1.0),
            candidate(BoundingBox::new(10.0, 10.0, 210.0, 110.0), 2.0),
            candidate(BoundingBox::new(0.0, 0.0, 120.0, 120.0), 3.0),
        ];
        assert_eq!(largest_face(&faces).unwrap().embedding.values, vec![3.0]);
    }

    #[test]
    fn largest_face_ties_keep_first() {
        let faces = vec![
            candidate(BoundingBox::new(0.0, 0.0, 100.0, 100.0), 1.0),
            candidate(BoundingBox::new(200.0, 200.0, 300.0, 300.0), 2.0),
        ];
        assert_eq!(largest_face(&faces).unwrap().embedding.values, vec![1.0]);
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_half_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        // intersection 50, union 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }
}
