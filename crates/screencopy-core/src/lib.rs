pub mod config;
pub mod errors;
pub mod types;

pub use config::{CaptureConfig, SourceSettings};
pub use errors::{Capability, CaptureError};
pub use types::*;
