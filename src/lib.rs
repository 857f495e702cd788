//! dacbridge - network audio renderer core
//!
//! Bridges decoded PCM/DSD audio from a format-aware producer to a
//! proprietary pull-based DAC sink transport, converting sample layouts in
//! real time through a lock-free ring buffer.

pub mod audio;
pub mod config;
pub mod error;
pub mod render;
pub mod sink;

pub use error::{BridgeError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
