//! Label-based lens classification.
//!
//! Advisory only: the result is surfaced to callers after acquisition and
//! never influences pipeline behaviour.

use serde::Serialize;

/// Label fragments that platforms use for ultra-wide rear cameras.
const ULTRA_WIDE_MARKERS: &[&str] = &["ultra", "wide", "0.5"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LensKind {
    Standard,
    UltraWide,
}

pub fn classify_lens(label: &str) -> LensKind {
    let label = label.to_lowercase();
    if ULTRA_WIDE_MARKERS.iter().any(|m| label.contains(m)) {
        LensKind::UltraWide
    } else {
        LensKind::Standard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Back Ultra Wide Camera", LensKind::UltraWide)]
    #[case("camera2 2, facing back, 0.5x", LensKind::UltraWide)]
    #[case("WIDE ANGLE", LensKind::UltraWide)]
    #[case("Back Camera", LensKind::Standard)]
    #[case("FaceTime HD Camera", LensKind::Standard)]
    #[case("", LensKind::Standard)]
    fn test_classify_lens(#[case] label: &str, #[case] expected: LensKind) {
        assert_eq!(classify_lens(label), expected);
    }
}
