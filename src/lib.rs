pub mod audio;
pub mod capture_pump;
pub mod config;
pub mod correlation;
pub mod dispatcher;
pub mod error;
pub mod frame_buffer;
pub mod playback;
pub mod protocol;
pub mod response;
pub mod session;
pub mod state;
pub mod tools;

pub use error::{RealtimeError, Result};
