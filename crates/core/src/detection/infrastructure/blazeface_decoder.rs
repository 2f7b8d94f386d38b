//! Tensor pre- and post-processing for the BlazeFace models.
//!
//! Kept free of any runtime dependency so the decoding can be tested
//! without loading a model.

use ndarray::Array4;

use crate::detection::domain::detection_session_config::ModelVariant;
use crate::detection::domain::inference_engine::{Keypoint, RawBoundingBox, RawDetection};
use crate::shared::frame::Frame;

/// Values per anchor in the regressor output: box (4) + 6 keypoints (12).
pub const REGRESSOR_STRIDE: usize = 16;

const NUM_KEYPOINTS: usize = 6;

/// NMS IoU threshold.
const NMS_IOU_THRESH: f32 = 0.3;

pub fn input_size(variant: ModelVariant) -> u32 {
    match variant {
        ModelVariant::ShortRange => 128,
        ModelVariant::FullRange => 192,
    }
}

/// Anchor centres in normalized coordinates.
///
/// Short range: 16x16 grid with 2 anchors per cell plus 8x8 with 6 (896).
/// Full range: a single 48x48 grid with 1 anchor per cell (2304).
pub fn generate_anchors(variant: ModelVariant) -> Vec<[f32; 2]> {
    let layers: &[(usize, usize)] = match variant {
        ModelVariant::ShortRange => &[(8, 2), (16, 6)],
        ModelVariant::FullRange => &[(4, 1)],
    };
    let size = input_size(variant) as usize;
    let mut anchors = Vec::new();

    for &(stride, per_cell) in layers {
        let grid = size / stride;
        for y in 0..grid {
            for x in 0..grid {
                let cx = (x as f32 + 0.5) / grid as f32;
                let cy = (y as f32 + 0.5) / grid as f32;
                for _ in 0..per_cell {
                    anchors.push([cx, cy]);
                }
            }
        }
    }
    anchors
}

/// Resize frame to `size x size` and normalize to [0,1] NCHW float32.
pub fn preprocess(frame: &Frame, size: u32) -> Array4<f32> {
    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;
    let s = size as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, s, s));
    if src_h == 0 || src_w == 0 {
        return tensor;
    }

    for y in 0..s {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / s as f64) as usize).min(src_h - 1);
        for x in 0..s {
            let src_x = (((x as f64 + 0.5) * src_w as f64 / s as f64) as usize).min(src_w - 1);
            for c in 0..3 {
                tensor[[0, c, y, x]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    tensor
}

/// Turns raw model outputs into detections relative to the frame.
///
/// `regressors` holds [`REGRESSOR_STRIDE`] values per anchor and `scores`
/// one logit per anchor. Output is ordered by descending score.
pub fn decode(
    regressors: &[f32],
    scores: &[f32],
    anchors: &[[f32; 2]],
    input_size: u32,
    min_confidence: f32,
) -> Vec<RawDetection> {
    let scale = input_size as f32;
    let mut candidates = Vec::new();

    for (i, (&logit, anchor)) in scores.iter().zip(anchors).enumerate() {
        let score = sigmoid(logit);
        if score < min_confidence {
            continue;
        }
        let offset = i * REGRESSOR_STRIDE;
        let Some(reg) = regressors.get(offset..offset + REGRESSOR_STRIDE) else {
            break;
        };

        let cx = anchor[0] + reg[0] / scale;
        let cy = anchor[1] + reg[1] / scale;
        let w = reg[2] / scale;
        let h = reg[3] / scale;
        let x_min = (cx - w / 2.0).clamp(0.0, 1.0);
        let y_min = (cy - h / 2.0).clamp(0.0, 1.0);
        let x_max = (cx + w / 2.0).clamp(0.0, 1.0);
        let y_max = (cy + h / 2.0).clamp(0.0, 1.0);

        let landmarks = (0..NUM_KEYPOINTS)
            .map(|k| Keypoint {
                x: anchor[0] + reg[4 + 2 * k] / scale,
                y: anchor[1] + reg[5 + 2 * k] / scale,
            })
            .collect();

        candidates.push(RawDetection {
            bounding_box: RawBoundingBox {
                x_min,
                y_min,
                width: x_max - x_min,
                height: y_max - y_min,
            },
            scores: vec![score],
            landmarks: Some(landmarks),
        });
    }

    nms(candidates, NMS_IOU_THRESH)
}

fn nms(mut dets: Vec<RawDetection>, iou_thresh: f32) -> Vec<RawDetection> {
    dets.sort_by(|a, b| {
        score_of(b)
            .partial_cmp(&score_of(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<RawDetection> = Vec::new();
    for det in dets {
        if keep
            .iter()
            .all(|k| iou(&k.bounding_box, &det.bounding_box) <= iou_thresh)
        {
            keep.push(det);
        }
    }
    keep
}

fn score_of(det: &RawDetection) -> f32 {
    det.scores.first().copied().unwrap_or(0.0)
}

fn iou(a: &RawBoundingBox, b: &RawBoundingBox) -> f32 {
    let x1 = a.x_min.max(b.x_min);
    let y1 = a.y_min.max(b.y_min);
    let x2 = (a.x_min + a.width).min(b.x_min + b.width);
    let y2 = (a.y_min + a.height).min(b.y_min + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter == 0.0 {
        return 0.0;
    }
    inter / (a.width * a.height + b.width * b.height - inter)
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[rstest]
    #[case(ModelVariant::ShortRange, 896)]
    #[case(ModelVariant::FullRange, 2304)]
    fn test_anchor_counts(#[case] variant: ModelVariant, #[case] expected: usize) {
        assert_eq!(generate_anchors(variant).len(), expected);
    }

    #[test]
    fn test_anchors_in_unit_range() {
        for variant in [ModelVariant::ShortRange, ModelVariant::FullRange] {
            for a in generate_anchors(variant) {
                assert!(a[0] > 0.0 && a[0] < 1.0);
                assert!(a[1] > 0.0 && a[1] < 1.0);
            }
        }
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let frame = Frame::solid(200, 100, [255, 0, 128], 0);
        let tensor = preprocess(&frame, 128);
        assert_eq!(tensor.shape(), &[1, 3, 128, 128]);
        assert_relative_eq!(tensor[[0, 0, 5, 5]], 1.0);
        assert_relative_eq!(tensor[[0, 1, 5, 5]], 0.0);
        assert_relative_eq!(tensor[[0, 2, 5, 5]], 128.0 / 255.0);
    }

    #[test]
    fn test_sigmoid() {
        assert_relative_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(10.0) > 0.999);
        assert!(sigmoid(-10.0) < 0.001);
    }

    fn outputs(anchors: usize) -> (Vec<f32>, Vec<f32>) {
        (vec![0.0; anchors * REGRESSOR_STRIDE], vec![-10.0; anchors])
    }

    #[test]
    fn test_decode_single_anchor() {
        let anchors = vec![[0.5, 0.5], [0.25, 0.25]];
        let (mut regs, mut scores) = outputs(2);
        scores[0] = 5.0;
        regs[2] = 32.0; // w = 0.25
        regs[3] = 64.0; // h = 0.5
        regs[4] = 12.8; // first keypoint x offset = 0.1

        let dets = decode(&regs, &scores, &anchors, 128, 0.5);
        assert_eq!(dets.len(), 1);
        let b = dets[0].bounding_box;
        assert_relative_eq!(b.x_min, 0.375);
        assert_relative_eq!(b.y_min, 0.25);
        assert_relative_eq!(b.width, 0.25);
        assert_relative_eq!(b.height, 0.5);
        let landmarks = dets[0].landmarks.as_ref().unwrap();
        assert_eq!(landmarks.len(), 6);
        assert_relative_eq!(landmarks[0].x, 0.6, epsilon = 1e-6);
        assert!(dets[0].scores[0] > 0.99);
    }

    #[test]
    fn test_decode_clamps_to_frame() {
        let anchors = vec![[0.05, 0.95]];
        let (mut regs, mut scores) = outputs(1);
        scores[0] = 5.0;
        regs[2] = 64.0;
        regs[3] = 64.0;

        let b = decode(&regs, &scores, &anchors, 128, 0.5)[0].bounding_box;
        assert_relative_eq!(b.x_min, 0.0);
        assert_relative_eq!(b.y_min + b.height, 1.0);
    }

    #[test]
    fn test_decode_suppresses_overlaps_and_orders_by_score() {
        let anchors = vec![[0.5, 0.5], [0.51, 0.5], [0.1, 0.1]];
        let (mut regs, mut scores) = outputs(3);
        for i in 0..3 {
            regs[i * REGRESSOR_STRIDE + 2] = 25.6;
            regs[i * REGRESSOR_STRIDE + 3] = 25.6;
        }
        scores[0] = 2.0;
        scores[1] = 3.0;
        scores[2] = 1.0;

        let dets = decode(&regs, &scores, &anchors, 128, 0.5);
        assert_eq!(dets.len(), 2);
        assert_relative_eq!(dets[0].bounding_box.x_min, 0.41, epsilon = 1e-6);
        assert!(dets[0].scores[0] > dets[1].scores[0]);
    }

    #[test]
    fn test_decode_tolerates_short_regressor_buffer() {
        let anchors = vec![[0.5, 0.5], [0.5, 0.5]];
        let regs = vec![0.0; REGRESSOR_STRIDE];
        let scores = vec![5.0, 5.0];
        let dets = decode(&regs, &scores, &anchors, 128, 0.5);
        assert_eq!(dets.len(), 1);
    }
}
