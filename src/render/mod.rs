//! Renderer orchestrator - thin facade between the decode front end, the
//! control point, and the sync engine

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::audio::{EngineConfig, EngineState, FrameBatch, SourceFormat, SyncEngine};
use crate::error::{BridgeError, Result};
use crate::sink::{SinkFormatDescriptor, SinkTransport};

/// Events an embedding control point might care about
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// Underrun counter advanced; sustained underrun is a symptom worth
    /// surfacing, not an error
    Underrun { total: u64 },
    /// The negotiated wire format changed
    FormatChanged { format: SinkFormatDescriptor },
    /// The sink transport was lost; a full reopen is required
    TransportLost,
    /// The stream was stopped
    Stopped,
}

/// Owns the sync engine and relays decoded frames and transport requests.
///
/// All methods return errors rather than panicking so the embedding control
/// point stays responsive to shutdown regardless of engine state. `stop`
/// raises the engine's cancel token before taking the lock, so a push stuck
/// on backpressure yields within one poll cycle.
pub struct Renderer {
    engine: Mutex<SyncEngine>,
    cancel: Arc<AtomicBool>,
    events: Mutex<Option<Sender<BridgeEvent>>>,
    last_underruns: Mutex<u64>,
}

impl Renderer {
    pub fn new(transport: Box<dyn SinkTransport>, config: EngineConfig) -> Self {
        let engine = SyncEngine::new(transport, config);
        let cancel = engine.cancel_token();
        Self {
            engine: Mutex::new(engine),
            cancel,
            events: Mutex::new(None),
            last_underruns: Mutex::new(0),
        }
    }

    /// Set an event notification channel
    pub fn set_event_channel(&self, tx: Sender<BridgeEvent>) {
        *self.events.lock() = Some(tx);
    }

    fn emit(&self, event: BridgeEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            if tx.try_send(event).is_err() {
                debug!("Event channel full or disconnected");
            }
        }
    }

    /// Open a stream to the given sink target
    pub fn open(&self, target: &str, hint: &SourceFormat) -> Result<()> {
        let mut engine = self.engine.lock();
        engine.open(target, hint)?;
        if let Some(format) = engine.sink_format() {
            let format = *format;
            drop(engine);
            self.emit(BridgeEvent::FormatChanged { format });
        }
        Ok(())
    }

    /// Entry point for the decode front end. Called on the producer thread,
    /// never concurrently with itself.
    pub fn on_decoded_frames(&self, data: &[u8], format: &SourceFormat) -> Result<usize> {
        let mut engine = self.engine.lock();
        let before = engine.sink_format().copied();
        let result = engine.push_frames(FrameBatch::new(data, *format));
        let after = engine.sink_format().copied();
        let underruns = engine.underrun_count();
        drop(engine);

        if after != before {
            if let Some(format) = after {
                self.emit(BridgeEvent::FormatChanged { format });
            }
        }
        self.report_underruns(underruns);

        match result {
            Err(BridgeError::TransportLost(ref msg)) => {
                warn!("Transport lost during push: {}", msg);
                self.emit(BridgeEvent::TransportLost);
                result
            }
            other => other,
        }
    }

    fn report_underruns(&self, total: u64) {
        let mut last = self.last_underruns.lock();
        if total > *last {
            *last = total;
            self.emit(BridgeEvent::Underrun { total });
        }
    }

    /// Explicit format-change request from the transport/control layer
    pub fn reconfigure(&self, new_format: &SourceFormat) -> Result<()> {
        let mut engine = self.engine.lock();
        engine.reconfigure(new_format)?;
        let format = engine.sink_format().copied();
        drop(engine);
        if let Some(format) = format {
            self.emit(BridgeEvent::FormatChanged { format });
        }
        Ok(())
    }

    /// Stop streaming. Observable by an in-flight push within one poll
    /// cycle.
    pub fn stop(&self) -> Result<()> {
        self.cancel.store(true, Ordering::SeqCst);
        let result = self.engine.lock().stop();
        self.emit(BridgeEvent::Stopped);
        result
    }

    pub fn is_streaming(&self) -> bool {
        self.engine.lock().is_streaming()
    }

    pub fn state(&self) -> EngineState {
        self.engine.lock().state()
    }

    pub fn underrun_count(&self) -> u64 {
        self.engine.lock().underrun_count()
    }

    /// The currently negotiated sink format, if streaming
    pub fn sink_format(&self) -> Option<SinkFormatDescriptor> {
        self.engine.lock().sink_format().copied()
    }
}
