pub mod detection_rate_limiter;
pub mod detection_result_projector;
pub mod face_detection_adapter;
pub mod frame_source_controller;
pub mod pipeline_config;
pub mod pipeline_logger;
pub mod stereo_compositor;
pub mod stereo_pipeline;
