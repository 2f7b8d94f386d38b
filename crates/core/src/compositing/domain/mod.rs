pub mod render_surface;
pub mod stereo_layout;
