pub mod image_file_camera;
pub mod synthetic_camera;
