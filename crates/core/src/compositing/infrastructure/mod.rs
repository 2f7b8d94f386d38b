pub mod cpu_canvas;
pub mod snapshot_writer;
