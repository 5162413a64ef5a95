pub mod virtual_output;
pub mod winit;
