pub mod detection_session_config;
pub mod detection_snapshot;
pub mod engine_error;
pub mod face_record;
pub mod inference_engine;
