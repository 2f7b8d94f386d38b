pub mod manual_clock;
pub mod monotonic_clock;
pub mod queued_frame_scheduler;
