//! Unified error types for dacbridge

use thiserror::Error;

/// Main error type for dacbridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Sink rejected the candidate format
    #[error("Sink does not support format: {0}")]
    FormatUnsupported(String),

    /// Sink transport could not be opened
    #[error("Failed to open sink transport '{target}': {message}")]
    TransportOpenFailed { target: String, message: String },

    /// Sink transport was lost mid-stream; requires a full reopen
    #[error("Sink transport lost: {0}")]
    TransportLost(String),

    /// Non-fatal stream-level transport error
    #[error("Stream error: {0}")]
    Stream(String),

    /// A conversion would have exceeded destination capacity.
    /// Never expected given correct size derivation; the push is rejected.
    #[error("Buffer overrun: conversion output would exceed ring capacity")]
    BufferOverrun,

    /// Operation requires an open stream
    #[error("Engine is not streaming")]
    NotStreaming,

    /// Engine already has an open stream
    #[error("Engine is already streaming")]
    AlreadyStreaming,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for dacbridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Create a transport-open error with context
    pub fn open_failed(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransportOpenFailed {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (caller may retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::TransportOpenFailed { .. }
                | BridgeError::Stream(_)
                | BridgeError::FormatUnsupported(_)
        )
    }
}
