//! Sink transport abstraction
//!
//! The proprietary DAC transport is an external library; this module models
//! it as a trait the engine drives from the control thread, plus the
//! `StreamPuller` callback object the transport invokes on its own schedule.

pub mod caps;
pub mod null;

pub use caps::{SinkCapabilities, SinkFormatDescriptor};
pub use null::NullSink;

use crate::audio::engine::StreamPuller;
use crate::error::Result;

/// A pull-based sink transport.
///
/// All methods are synchronous and potentially slow (hundreds of
/// milliseconds); the engine only ever calls them from the control thread,
/// never from the pull callback. After `open` returns, the transport may
/// start invoking the puller at any time from its own context; after
/// `disconnect` returns, it must not invoke it again.
pub trait SinkTransport: Send {
    /// The support set this sink declares
    fn capabilities(&self) -> SinkCapabilities;

    /// Connect to `target` and begin pulling from `puller`
    fn open(
        &mut self,
        target: &str,
        format: &SinkFormatDescriptor,
        puller: StreamPuller,
    ) -> Result<()>;

    /// Apply the negotiated wire format
    fn set_format(&mut self, format: &SinkFormatDescriptor) -> Result<()>;

    /// Stop pulling; the connection stays up
    fn stop(&mut self) -> Result<()>;

    /// Tear down the connection; no pulls after this returns
    fn disconnect(&mut self) -> Result<()>;

    /// Release the transport entirely
    fn close(&mut self) -> Result<()>;

    /// Liveness check polled from the push path. The default assumes a
    /// healthy link; implementations return `TransportLost` on fatal I/O
    /// errors and `Stream` for recoverable ones.
    fn poll_health(&mut self) -> Result<()> {
        Ok(())
    }
}
