//! Audio I/O: devices, capture, output, decoded sources

pub mod buffer;
pub mod capture;
pub mod device;
pub mod output;
pub mod source;

pub use buffer::{AudioFrame, FrameQueue, FrameReader};
pub use capture::{ensure_engine_rate, CaptureControls, MicCapture, MicInput};
pub use device::{list_devices, resolve_input_device, resolve_output_device, AudioDevice};
pub use output::OutputStream;
pub use source::{decode_file, AudioSource, SourceId, TrackInfo};
