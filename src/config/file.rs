//! Tuning file support
//!
//! The silence-buffer counts, drain timeout, and DAC settle interval are
//! empirical constants validated against real hardware, so they live in a
//! TOML file rather than in code.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::audio::EngineConfig;

/// Stream tuning loaded from a TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Ring buffer depth in milliseconds of audio
    pub buffer_ms: u32,

    /// Minimum buffered milliseconds before playback starts
    pub prefill_ms: u32,

    /// Maximum bytes handed to the sink per pull callback
    pub chunk_bytes: usize,

    /// Silence buffers injected before a PCM format change
    pub pcm_silence_buffers: u32,

    /// Silence buffers injected before a DSD format change
    pub dsd_silence_buffers: u32,

    /// Size of each injected silence buffer in bytes
    pub silence_buffer_bytes: usize,

    /// Upper bound on the silence-drain wait during format changes
    pub drain_timeout_ms: u64,

    /// DAC stabilization interval between disconnect and reopen
    pub settle_ms: u64,

    /// DSD idle pattern byte
    pub dsd_silence_byte: u8,
}

impl Default for TuningConfig {
    fn default() -> Self {
        let defaults = EngineConfig::default();
        Self {
            buffer_ms: defaults.buffer_ms,
            prefill_ms: defaults.prefill_ms,
            chunk_bytes: defaults.chunk_bytes,
            pcm_silence_buffers: defaults.pcm_silence_buffers,
            dsd_silence_buffers: defaults.dsd_silence_buffers,
            silence_buffer_bytes: defaults.silence_buffer_bytes,
            drain_timeout_ms: defaults.drain_timeout_ms,
            settle_ms: defaults.settle_ms,
            dsd_silence_byte: defaults.dsd_silence_byte,
        }
    }
}

impl TuningConfig {
    /// Load tuning from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Load tuning from default locations
    ///
    /// Searches in order:
    /// 1. Same directory as the executable: dacbridge.toml
    /// 2. The user config directory: dacbridge/config.toml
    pub fn load_default() -> Result<Self, ConfigError> {
        for path in Self::default_paths() {
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                paths.push(exe_dir.join("dacbridge.toml"));
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("dacbridge").join("config.toml"));
        }
        paths
    }

    /// Save tuning to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_string_lossy().to_string(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Convert to EngineConfig
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            buffer_ms: self.buffer_ms,
            prefill_ms: self.prefill_ms,
            chunk_bytes: self.chunk_bytes,
            pcm_silence_buffers: self.pcm_silence_buffers,
            dsd_silence_buffers: self.dsd_silence_buffers,
            silence_buffer_bytes: self.silence_buffer_bytes,
            drain_timeout_ms: self.drain_timeout_ms,
            settle_ms: self.settle_ms,
            dsd_silence_byte: self.dsd_silence_byte,
        }
    }

    /// Generate a sample tuning file
    pub fn sample_config() -> String {
        r#"# dacbridge tuning
# These are empirical values; validate changes against real hardware.

# Ring buffer depth in milliseconds of audio (default: 500)
buffer_ms = 500

# Minimum buffered milliseconds before playback starts (default: 50)
prefill_ms = 50

# Maximum bytes handed to the sink per pull callback (default: 8192)
chunk_bytes = 8192

# Silence buffers injected before a PCM format change (default: 30)
pcm_silence_buffers = 30

# Silence buffers injected before a DSD format change (default: 100)
# DSD mode changes are audibly more disruptive and need a longer flush.
dsd_silence_buffers = 100

# Size of each injected silence buffer in bytes (default: 4096)
silence_buffer_bytes = 4096

# Upper bound on the silence-drain wait during format changes (default: 2000)
drain_timeout_ms = 2000

# DAC stabilization interval between disconnect and reopen (default: 500)
settle_ms = 500

# DSD idle pattern byte (default: 0x69); all-zero DSD is a DC offset
dsd_silence_byte = 105
"#
        .to_string()
    }
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading/writing the tuning file
    #[error("Failed to read tuning file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// Error parsing TOML
    #[error("Failed to parse tuning file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    /// Error serializing tuning
    #[error("Failed to serialize tuning: {0}")]
    Serialize(toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_engine_config() {
        let tuning = TuningConfig::default();
        let engine = tuning.to_engine_config();
        assert_eq!(engine.pcm_silence_buffers, 30);
        assert_eq!(engine.dsd_silence_buffers, 100);
        assert_eq!(engine.dsd_silence_byte, 0x69);
    }

    #[test]
    fn test_sample_config_parses() {
        let parsed: TuningConfig = toml::from_str(&TuningConfig::sample_config()).unwrap();
        assert_eq!(parsed.buffer_ms, 500);
        assert_eq!(parsed.dsd_silence_byte, 0x69);
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let path = std::env::temp_dir().join("dacbridge-tuning-roundtrip.toml");
        let mut tuning = TuningConfig::default();
        tuning.settle_ms = 123;
        tuning.dsd_silence_buffers = 42;
        tuning.save(&path).unwrap();

        let loaded = TuningConfig::load(&path).unwrap();
        assert_eq!(loaded.settle_ms, 123);
        assert_eq!(loaded.dsd_silence_buffers, 42);
        assert_eq!(loaded.buffer_ms, 500);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: TuningConfig = toml::from_str("settle_ms = 250\n").unwrap();
        assert_eq!(parsed.settle_ms, 250);
        assert_eq!(parsed.buffer_ms, 500);
    }
}
