//! CLI arguments and tuning file support

pub mod args;
pub mod file;

pub use args::{Args, Command};
pub use file::{ConfigError, TuningConfig};
