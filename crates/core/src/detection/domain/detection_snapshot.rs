use std::time::Duration;

use serde::Serialize;

use crate::detection::domain::face_record::FaceRecord;

/// One published detection result: the faces of a single batch plus the
/// observed callback rate at the moment it arrived.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionSnapshot {
    pub faces: Vec<FaceRecord>,
    pub results_per_second: f64,
    /// Projector clock reading when the batch arrived.
    pub timestamp: Duration,
    pub sequence: u64,
    /// Sequence of the frame the engine answered; 0 for a cleared snapshot.
    pub frame_sequence: u64,
}

impl DetectionSnapshot {
    /// No faces and a zero rate, as published when detection stops.
    pub fn cleared(timestamp: Duration, sequence: u64) -> Self {
        Self {
            faces: Vec::new(),
            results_per_second: 0.0,
            timestamp,
            sequence,
            frame_sequence: 0,
        }
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleared_snapshot() {
        let snapshot = DetectionSnapshot::cleared(Duration::from_secs(3), 7);
        assert_eq!(snapshot.face_count(), 0);
        assert_eq!(snapshot.results_per_second, 0.0);
        assert_eq!(snapshot.sequence, 7);
    }

    #[test]
    fn test_serializes_to_json() {
        let snapshot = DetectionSnapshot::cleared(Duration::from_millis(1500), 1);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["sequence"], 1);
        assert!(json["faces"].as_array().unwrap().is_empty());
    }
}
