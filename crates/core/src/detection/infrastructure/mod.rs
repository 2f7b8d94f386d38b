pub mod blazeface_decoder;
#[cfg(feature = "onnx")]
pub mod model_resolver;
#[cfg(feature = "onnx")]
pub mod onnx_blazeface_engine;
pub mod simulated_face_engine;
