//! Null sink transport
//!
//! Consumes the stream at wall-clock rate on its own thread and discards the
//! bytes. Used by the CLI for soak runs without hardware and by integration
//! tests that need a realistically paced consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use crate::audio::engine::StreamPuller;
use crate::error::{BridgeError, Result};
use crate::sink::caps::{SinkCapabilities, SinkFormatDescriptor};
use crate::sink::SinkTransport;

/// Pull cadence of the consumer thread
const PULL_INTERVAL: Duration = Duration::from_millis(10);

/// A sink that pulls at real-time rate and throws the audio away
pub struct NullSink {
    caps: SinkCapabilities,
    format: Option<SinkFormatDescriptor>,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<u64>>,
}

impl NullSink {
    pub fn new(caps: SinkCapabilities) -> Self {
        Self {
            caps,
            format: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new(SinkCapabilities::default())
    }
}

impl SinkTransport for NullSink {
    fn capabilities(&self) -> SinkCapabilities {
        self.caps.clone()
    }

    fn open(
        &mut self,
        target: &str,
        format: &SinkFormatDescriptor,
        mut puller: StreamPuller,
    ) -> Result<()> {
        if self.worker.is_some() {
            return Err(BridgeError::open_failed(target, "null sink already open"));
        }
        info!("Null sink open: {} ({})", target, format);
        self.format = Some(*format);
        self.stop_flag.store(false, Ordering::SeqCst);

        // Bytes per pull tick at the wire rate
        let chunk = ((format.bytes_per_second() as u128 * PULL_INTERVAL.as_millis()) / 1000)
            .max(1) as usize;
        let chunk = chunk.min(puller.max_chunk());
        let stop = self.stop_flag.clone();

        self.worker = Some(thread::spawn(move || {
            let mut pulled: u64 = 0;
            while !stop.load(Ordering::Relaxed) {
                let bytes = puller.next_chunk(chunk);
                pulled += bytes.len() as u64;
                thread::sleep(PULL_INTERVAL);
            }
            debug!("Null sink consumer exiting after {} bytes", pulled);
            pulled
        }));
        Ok(())
    }

    fn set_format(&mut self, format: &SinkFormatDescriptor) -> Result<()> {
        if !self.caps.supports(format) {
            return Err(BridgeError::FormatUnsupported(format.to_string()));
        }
        self.format = Some(*format);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stop_flag.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.format = None;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.disconnect()
    }
}

impl Drop for NullSink {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{EngineConfig, SourceFormat, SyncEngine};

    #[test]
    fn test_null_sink_consumes_stream() {
        let config = EngineConfig {
            settle_ms: 0,
            prefill_ms: 0,
            drain_timeout_ms: 100,
            ..Default::default()
        };
        let mut engine = SyncEngine::new(Box::new(NullSink::default()), config);
        let fmt = SourceFormat::pcm(44100, 2, 16);
        engine.open("null:", &fmt).unwrap();

        let data = vec![0x7Fu8; 8192];
        let consumed = engine
            .push_frames(crate::audio::FrameBatch::new(&data, fmt))
            .unwrap();
        assert_eq!(consumed, 8192);

        // The consumer thread drains at wall-clock pace
        let start = std::time::Instant::now();
        while engine.buffered_bytes() > 0 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(engine.buffered_bytes(), 0);
        engine.stop().unwrap();
    }
}
