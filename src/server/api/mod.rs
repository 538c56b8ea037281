pub mod health_controller;
pub mod stream_controller;

pub use stream_controller::StreamController;
