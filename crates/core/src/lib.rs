//! Dual-rate stereo camera pipeline.
//!
//! A live frame source feeds two independently clocked loops: a stereo
//! side-by-side compositor bound to display refresh, and a throttled face
//! detection path whose results are published as atomic snapshots.

pub mod capture;
pub mod compositing;
pub mod detection;
pub mod pipeline;
pub mod scheduling;
pub mod shared;
