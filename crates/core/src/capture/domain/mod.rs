pub mod capture_error;
pub mod capture_source;
pub mod device_descriptor;
pub mod lens_classifier;
