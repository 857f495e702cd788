//! Sync engine - orchestrates the ring buffer between the decode producer
//! and the sink's pull callback
//!
//! Two execution contexts touch the stream state: the producer/control
//! thread (push path and all state transitions) and the sink transport's
//! pull callback (`StreamPuller::next_chunk`, hard real-time, never blocks).
//! The steady-state push/pop pair is lock-free; transitions close the pull
//! gate and run with the transport disconnected, so the ring's `reset` is
//! never concurrent with a push or pop.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::audio::buffer::RingBuffer;
use crate::audio::convert::BIT_REVERSE;
use crate::audio::plan::{ConversionPlan, DsdPlan, PcmShape};
use crate::audio::{FrameBatch, SourceFormat};
use crate::error::{BridgeError, Result};
use crate::sink::caps::SinkFormatDescriptor;
use crate::sink::SinkTransport;

/// Poll interval for backpressure and drain waits
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Engine tuning parameters.
///
/// The silence-buffer counts, drain timeout, and settle interval are
/// empirical values validated against real hardware; they are exposed in the
/// tuning file rather than hard-coded.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ring buffer depth in milliseconds of audio
    pub buffer_ms: u32,
    /// Minimum fill before the pull path starts draining (avoids an
    /// immediate underrun on stream start)
    pub prefill_ms: u32,
    /// Maximum bytes per pull callback; sizes the puller's scratch buffer
    pub chunk_bytes: usize,
    /// Silence buffers injected before a PCM format change
    pub pcm_silence_buffers: u32,
    /// Silence buffers injected before a DSD format change (DSD mode
    /// changes are audibly more disruptive and need a longer flush)
    pub dsd_silence_buffers: u32,
    /// Size of each injected silence buffer
    pub silence_buffer_bytes: usize,
    /// Upper bound on the silence-drain wait during reconfigure
    pub drain_timeout_ms: u64,
    /// DAC stabilization interval between disconnect and reopen
    pub settle_ms: u64,
    /// DSD idle pattern byte
    pub dsd_silence_byte: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_ms: 500,
            prefill_ms: 50,
            chunk_bytes: 8192,
            pcm_silence_buffers: 30,
            dsd_silence_buffers: 100,
            silence_buffer_bytes: 4096,
            drain_timeout_ms: 2000,
            settle_ms: 500,
            dsd_silence_byte: crate::sink::caps::DSD_SILENCE_BYTE,
        }
    }
}

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No sink connection
    Closed,
    /// Negotiating and connecting
    Opening,
    /// Accepting pushes, answering pulls
    Streaming,
    /// Mid format change
    Reconfiguring,
    /// Tearing down
    Stopping,
}

/// State shared between the producer/control thread and the pull callback.
///
/// Created at open, reset (or replaced, when the new format needs a larger
/// ring) at each reconfigure, dropped at stop.
pub(crate) struct StreamShared {
    ring: RingBuffer,
    /// Closed during transitions; a closed gate turns pulls into pure
    /// silence without touching the ring
    gate: AtomicBool,
    /// Set once the ring first reaches the prefill threshold
    primed: AtomicBool,
    min_fill: AtomicUsize,
    silence: AtomicU8,
    underruns: AtomicU64,
}

impl StreamShared {
    fn new(capacity: usize, min_fill: usize, silence: u8) -> Self {
        Self {
            ring: RingBuffer::new(capacity),
            gate: AtomicBool::new(false),
            primed: AtomicBool::new(false),
            min_fill: AtomicUsize::new(min_fill),
            silence: AtomicU8::new(silence),
            underruns: AtomicU64::new(0),
        }
    }

    fn silence_byte(&self) -> u8 {
        self.silence.load(Ordering::Relaxed)
    }

    fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    fn open_gate(&self) {
        self.gate.store(true, Ordering::Release);
    }

    fn close_gate(&self) {
        self.gate.store(false, Ordering::Release);
    }

    /// Rearm for a new session after a ring reset. Only called while the
    /// gate is closed and the transport is disconnected.
    fn rearm(&self, min_fill: usize, silence: u8) {
        self.min_fill.store(min_fill, Ordering::Relaxed);
        self.silence.store(silence, Ordering::Relaxed);
        self.primed.store(false, Ordering::Relaxed);
    }
}

/// The pull-callback object handed to the sink transport.
///
/// `next_chunk` is invoked from the transport's real-time context and never
/// blocks: it pops whatever is buffered and pads the remainder with the
/// format's silence byte. The scratch buffer is pre-sized once and borrowed
/// out per call, never reallocated in the hot path.
pub struct StreamPuller {
    shared: Arc<StreamShared>,
    scratch: Vec<u8>,
}

impl StreamPuller {
    pub(crate) fn new(shared: Arc<StreamShared>, max_chunk: usize) -> Self {
        Self {
            scratch: vec![0u8; max_chunk],
            shared,
        }
    }

    /// Largest chunk a single call can return
    pub fn max_chunk(&self) -> usize {
        self.scratch.len()
    }

    /// Produce the next `requested` bytes for the sink (clamped to
    /// `max_chunk`). Always returns exactly the clamped length; shortfalls
    /// are padded with silence and counted as underruns.
    pub fn next_chunk(&mut self, requested: usize) -> &[u8] {
        let want = requested.min(self.scratch.len());
        let silence = self.shared.silence_byte();

        if !self.shared.gate.load(Ordering::Acquire) {
            self.scratch[..want].fill(silence);
            return &self.scratch[..want];
        }

        // Hold back until the producer has built up the prefill, so the
        // stream does not start with an immediate underrun
        if !self.shared.primed.load(Ordering::Relaxed) {
            let fill = self.shared.min_fill.load(Ordering::Relaxed);
            if self.shared.ring.available_to_read() >= fill {
                self.shared.primed.store(true, Ordering::Relaxed);
            } else {
                self.scratch[..want].fill(silence);
                return &self.scratch[..want];
            }
        }

        let got = self.shared.ring.pop(&mut self.scratch[..want]);
        if got < want {
            self.scratch[got..want].fill(silence);
            self.shared.underruns.fetch_add(1, Ordering::Relaxed);
        }
        &self.scratch[..want]
    }
}

/// The stateful streaming orchestrator: owns the ring buffer, the negotiated
/// sink descriptor, and the conversion plan, and drives all state
/// transitions.
pub struct SyncEngine {
    config: EngineConfig,
    transport: Box<dyn SinkTransport>,
    state: EngineState,
    target: Option<String>,
    shared: Option<Arc<StreamShared>>,
    sink_format: Option<SinkFormatDescriptor>,
    source_format: Option<SourceFormat>,
    plan: Option<ConversionPlan>,
    /// Set externally (via `cancel_token`) to abort push backpressure and
    /// drain waits within one poll cycle
    stop_flag: Arc<AtomicBool>,
    /// Underruns accumulated from completed sessions
    underruns_total: u64,
    /// When the transport was last stopped; the next open waits out the
    /// remainder of the settle interval
    last_stop: Option<Instant>,
}

impl SyncEngine {
    pub fn new(transport: Box<dyn SinkTransport>, config: EngineConfig) -> Self {
        Self {
            config,
            transport,
            state: EngineState::Closed,
            target: None,
            shared: None,
            sink_format: None,
            source_format: None,
            plan: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            underruns_total: 0,
            last_stop: None,
        }
    }

    /// Token observed by the push path and all bounded waits; store `true`
    /// to cancel without holding the engine lock
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == EngineState::Streaming
    }

    /// Underruns across all sessions, including the current one
    pub fn underrun_count(&self) -> u64 {
        self.underruns_total
            + self
                .shared
                .as_ref()
                .map(|s| s.underrun_count())
                .unwrap_or(0)
    }

    /// Bytes currently buffered toward the sink
    pub fn buffered_bytes(&self) -> usize {
        self.shared
            .as_ref()
            .map(|s| s.ring.available_to_read())
            .unwrap_or(0)
    }

    pub fn sink_format(&self) -> Option<&SinkFormatDescriptor> {
        self.sink_format.as_ref()
    }

    /// Open a sink connection for the given target and initial format.
    ///
    /// On failure the engine returns to `Closed` and the error is surfaced
    /// to the caller.
    pub fn open(&mut self, target: &str, hint: &SourceFormat) -> Result<()> {
        if self.state != EngineState::Closed {
            return Err(BridgeError::AlreadyStreaming);
        }
        self.state = EngineState::Opening;
        self.stop_flag.store(false, Ordering::SeqCst);
        self.settle_wait();

        let caps = self.transport.capabilities();
        let desc = match SinkFormatDescriptor::negotiate(hint, &caps) {
            Some(d) => d,
            None => {
                self.state = EngineState::Closed;
                return Err(BridgeError::FormatUnsupported(hint.to_string()));
            }
        };
        let plan = match ConversionPlan::derive(hint, &desc) {
            Ok(p) => p,
            Err(e) => {
                self.state = EngineState::Closed;
                return Err(e);
            }
        };

        let shared = Arc::new(StreamShared::new(
            self.ring_capacity(&desc),
            self.min_fill(&desc),
            self.silence_byte(&desc),
        ));
        let puller = StreamPuller::new(shared.clone(), self.config.chunk_bytes);

        if let Err(e) = self.transport.open(target, &desc, puller) {
            self.state = EngineState::Closed;
            return Err(e);
        }
        if let Err(e) = self.transport.set_format(&desc) {
            let _ = self.transport.disconnect();
            let _ = self.transport.close();
            self.state = EngineState::Closed;
            return Err(e);
        }

        info!("Stream open: {} -> {}", hint, desc);
        shared.open_gate();
        self.target = Some(target.to_string());
        self.shared = Some(shared);
        self.sink_format = Some(desc);
        self.source_format = Some(*hint);
        self.plan = Some(plan);
        self.state = EngineState::Streaming;
        Ok(())
    }

    /// Push one batch of decoded frames.
    ///
    /// Converts into the ring via the current plan; a source-format change
    /// recomputes the plan, or triggers a full reconfigure when the sink
    /// descriptor can no longer carry it. Under backpressure this retries
    /// with bounded sleeps, observing the cancel token each cycle. Returns
    /// the number of source bytes consumed.
    pub fn push_frames(&mut self, batch: FrameBatch<'_>) -> Result<usize> {
        if self.state != EngineState::Streaming {
            return Err(BridgeError::NotStreaming);
        }
        if let Err(e) = self.transport.poll_health() {
            if matches!(e, BridgeError::TransportLost(_)) {
                warn!("Transport lost: {}", e);
                self.fault_close();
            }
            return Err(e);
        }
        if self.source_format != Some(batch.format) {
            self.apply_source_format(batch.format)?;
        }

        let plan = self.plan.ok_or(BridgeError::NotStreaming)?;
        match plan {
            ConversionPlan::Pcm(shape) => self.push_pcm(batch.data, shape),
            ConversionPlan::Dsd(dsd) => self.push_dsd(batch, dsd),
        }
    }

    fn push_pcm(&mut self, data: &[u8], shape: PcmShape) -> Result<usize> {
        let shared = self.shared.as_ref().ok_or(BridgeError::NotStreaming)?;
        let (num, den) = shape.expansion();
        // Whole samples only; a trailing partial sample can never convert
        let end = data.len() - data.len() % den;
        let mut offset = 0;
        while offset < end {
            if self.stop_flag.load(Ordering::Relaxed) {
                break;
            }
            let written = match shape {
                PcmShape::Direct => shared.ring.push(&data[offset..end]),
                PcmShape::Upsample16To24 => shared.ring.push_16_to_24(&data[offset..end]),
                PcmShape::Upsample16To32 => shared.ring.push_16_to_32(&data[offset..end]),
                PcmShape::Pack24From32 => shared.ring.push_24_packed(&data[offset..end]),
            };
            // Map output bytes back to input bytes consumed
            let consumed = written / num * den;
            offset += consumed;
            if consumed == 0 {
                thread::sleep(POLL_INTERVAL);
            }
        }
        Ok(offset)
    }

    fn push_dsd(&mut self, batch: FrameBatch<'_>, dsd: DsdPlan) -> Result<usize> {
        let shared = self.shared.as_ref().ok_or(BridgeError::NotStreaming)?;
        let nch = batch.format.channels as usize;
        if nch == 0 {
            return Ok(0);
        }
        let per_ch_total = batch.data.len() / nch;
        // Less than one byte per channel: nothing to interleave
        if per_ch_total == 0 {
            return Ok(0);
        }
        let channels: Vec<&[u8]> = batch.data.chunks_exact(per_ch_total).take(nch).collect();
        let table = dsd.bit_reverse.then_some(&BIT_REVERSE);
        let swap = dsd.byte_swap.then_some(dsd.word_bytes);

        // Word swapping consumes whole words; a trailing partial word in the
        // batch is dropped rather than retried forever
        let mut per_ch_end = per_ch_total;
        if let Some(w) = swap {
            if w > 1 {
                per_ch_end -= per_ch_end % w;
            }
        }

        let mut per_ch_off = 0;
        while per_ch_off < per_ch_end {
            if self.stop_flag.load(Ordering::Relaxed) {
                break;
            }
            let slices: Vec<&[u8]> = channels.iter().map(|c| &c[per_ch_off..]).collect();
            let written =
                shared
                    .ring
                    .push_dsd_planar(&slices, per_ch_end - per_ch_off, table, swap);
            per_ch_off += written / nch;
            if written == 0 {
                thread::sleep(POLL_INTERVAL);
            }
        }
        Ok(per_ch_off * nch)
    }

    /// Handle a source-format change seen on the push path: recompute the
    /// plan when the current descriptor still carries the new format,
    /// otherwise run the full reconfigure sequence.
    fn apply_source_format(&mut self, format: SourceFormat) -> Result<()> {
        let caps = self.transport.capabilities();
        let desc = SinkFormatDescriptor::negotiate(&format, &caps)
            .ok_or_else(|| BridgeError::FormatUnsupported(format.to_string()))?;
        if Some(desc) == self.sink_format {
            debug!("Source format changed compatibly: {}", format);
            self.plan = Some(ConversionPlan::derive(&format, &desc)?);
            self.source_format = Some(format);
            Ok(())
        } else {
            self.reconfigure(&format)
        }
    }

    /// Change the stream to a new source format, cycling the sink transport.
    ///
    /// Sequence: drain the old stream through injected silence, stop and
    /// disconnect, wait out the DAC settle interval, re-negotiate, reset (or
    /// replace) the ring, reopen. The drain wait is bounded; on timeout the
    /// transition proceeds with a warning rather than hanging.
    pub fn reconfigure(&mut self, new_format: &SourceFormat) -> Result<()> {
        if self.state != EngineState::Streaming {
            return Err(BridgeError::NotStreaming);
        }
        let old = self.sink_format.ok_or(BridgeError::NotStreaming)?;
        self.state = EngineState::Reconfiguring;
        info!("Reconfiguring stream: {} -> {}", old, new_format);

        self.flush_through_silence(&old);

        if let Err(e) = self.transport.stop() {
            warn!("Sink stop during reconfigure failed: {}", e);
        }
        if let Err(e) = self.transport.disconnect() {
            warn!("Sink disconnect during reconfigure failed: {}", e);
        }
        if let Some(shared) = &self.shared {
            shared.close_gate();
        }
        self.last_stop = Some(Instant::now());
        self.settle_wait();

        let caps = self.transport.capabilities();
        let desc = match SinkFormatDescriptor::negotiate(new_format, &caps) {
            Some(d) => d,
            None => {
                self.abort_session();
                return Err(BridgeError::FormatUnsupported(new_format.to_string()));
            }
        };
        let plan = match ConversionPlan::derive(new_format, &desc) {
            Ok(p) => p,
            Err(e) => {
                self.abort_session();
                return Err(e);
            }
        };

        let needed = self.ring_capacity(&desc);
        let min_fill = self.min_fill(&desc);
        let silence = self.silence_byte(&desc);
        let shared = match &self.shared {
            Some(s) if s.ring.capacity() >= needed => {
                // Gate is closed and the transport is disconnected, so no
                // push or pop is in flight
                s.ring.reset();
                s.rearm(min_fill, silence);
                s.clone()
            }
            _ => {
                if let Some(old_shared) = self.shared.take() {
                    self.underruns_total += old_shared.underrun_count();
                }
                let fresh = Arc::new(StreamShared::new(needed, min_fill, silence));
                self.shared = Some(fresh.clone());
                fresh
            }
        };

        let target = self.target.clone().unwrap_or_default();
        let puller = StreamPuller::new(shared.clone(), self.config.chunk_bytes);
        if let Err(e) = self.transport.open(&target, &desc, puller) {
            self.abort_session();
            return Err(e);
        }
        if let Err(e) = self.transport.set_format(&desc) {
            let _ = self.transport.disconnect();
            self.abort_session();
            return Err(e);
        }

        shared.open_gate();
        self.sink_format = Some(desc);
        self.source_format = Some(*new_format);
        self.plan = Some(plan);
        self.state = EngineState::Streaming;
        info!("Reconfigured stream: now {}", desc);
        Ok(())
    }

    /// Inject silence buffers behind the remaining audio and wait for the
    /// pull path to drain them, bounded by the drain timeout.
    fn flush_through_silence(&mut self, old: &SinkFormatDescriptor) {
        let shared = match &self.shared {
            Some(s) => s.clone(),
            None => return,
        };
        let count = if old.dsd {
            self.config.dsd_silence_buffers
        } else {
            self.config.pcm_silence_buffers
        };
        let silence = vec![shared.silence_byte(); self.config.silence_buffer_bytes];
        let deadline = Instant::now() + Duration::from_millis(self.config.drain_timeout_ms);

        let mut injected = 0u32;
        'inject: for _ in 0..count {
            let mut off = 0;
            while off < silence.len() {
                if self.stop_flag.load(Ordering::Relaxed) || Instant::now() >= deadline {
                    break 'inject;
                }
                let n = shared.ring.push(&silence[off..]);
                off += n;
                if n == 0 {
                    thread::sleep(POLL_INTERVAL);
                }
            }
            injected += 1;
        }
        debug!("Injected {}/{} silence buffers", injected, count);

        while shared.ring.available_to_read() > 0 {
            if self.stop_flag.load(Ordering::Relaxed) {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    "Silence drain timed out with {} bytes left; forcing transition",
                    shared.ring.available_to_read()
                );
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Stop streaming and release the sink connection
    pub fn stop(&mut self) -> Result<()> {
        if self.state == EngineState::Closed {
            return Ok(());
        }
        self.state = EngineState::Stopping;
        info!("Stopping stream");

        if let Some(shared) = &self.shared {
            shared.close_gate();
        }
        if let Err(e) = self.transport.stop() {
            warn!("Sink stop failed: {}", e);
        }
        if let Err(e) = self.transport.disconnect() {
            warn!("Sink disconnect failed: {}", e);
        }
        if let Err(e) = self.transport.close() {
            warn!("Sink close failed: {}", e);
        }
        self.release_session();
        info!("Stream stopped");
        Ok(())
    }

    /// Teardown after a fatal transport error: best-effort disconnect, no
    /// drain. The pull path, if the transport still calls it, keeps
    /// returning silence.
    fn fault_close(&mut self) {
        if let Some(shared) = &self.shared {
            shared.close_gate();
        }
        let _ = self.transport.disconnect();
        let _ = self.transport.close();
        self.release_session();
    }

    /// Abort an in-flight transition that cannot complete (negotiation or
    /// reopen failure). The transport is already disconnected.
    fn abort_session(&mut self) {
        let _ = self.transport.close();
        self.release_session();
    }

    fn release_session(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.close_gate();
            self.underruns_total += shared.underrun_count();
        }
        self.sink_format = None;
        self.source_format = None;
        self.plan = None;
        self.last_stop = Some(Instant::now());
        self.state = EngineState::Closed;
    }

    /// Wait out the remainder of the DAC settle interval since the last
    /// transport stop. Downstream hardware needs this to relock; it is not
    /// protocol-mandated.
    fn settle_wait(&self) {
        if let Some(stopped) = self.last_stop {
            let settle = Duration::from_millis(self.config.settle_ms);
            let elapsed = stopped.elapsed();
            if elapsed < settle {
                thread::sleep(settle - elapsed);
            }
        }
    }

    fn ring_capacity(&self, desc: &SinkFormatDescriptor) -> usize {
        let bytes = desc.bytes_per_second() * self.config.buffer_ms as u64 / 1000;
        (bytes as usize).max(self.config.chunk_bytes * 2)
    }

    fn min_fill(&self, desc: &SinkFormatDescriptor) -> usize {
        let bytes = desc.bytes_per_second() * self.config.prefill_ms as u64 / 1000;
        (bytes as usize).min(self.ring_capacity(desc) / 2)
    }

    fn silence_byte(&self, desc: &SinkFormatDescriptor) -> u8 {
        if desc.dsd {
            self.config.dsd_silence_byte
        } else {
            0x00
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ByteOrder, DsdBitOrder};
    use crate::sink::caps::SinkCapabilities;
    use parking_lot::Mutex;

    /// Transport stub that hands the puller back to the test
    struct TestSink {
        caps: SinkCapabilities,
        puller: Arc<Mutex<Option<StreamPuller>>>,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl TestSink {
        fn new(caps: SinkCapabilities) -> (Box<Self>, Arc<Mutex<Option<StreamPuller>>>) {
            let puller = Arc::new(Mutex::new(None));
            let sink = Box::new(Self {
                caps,
                puller: puller.clone(),
                calls: Arc::new(Mutex::new(Vec::new())),
            });
            (sink, puller)
        }
    }

    impl SinkTransport for TestSink {
        fn capabilities(&self) -> SinkCapabilities {
            self.caps.clone()
        }
        fn open(
            &mut self,
            _target: &str,
            _format: &SinkFormatDescriptor,
            puller: StreamPuller,
        ) -> Result<()> {
            self.calls.lock().push("open");
            *self.puller.lock() = Some(puller);
            Ok(())
        }
        fn set_format(&mut self, _format: &SinkFormatDescriptor) -> Result<()> {
            self.calls.lock().push("set_format");
            Ok(())
        }
        fn stop(&mut self) -> Result<()> {
            self.calls.lock().push("stop");
            Ok(())
        }
        fn disconnect(&mut self) -> Result<()> {
            self.calls.lock().push("disconnect");
            *self.puller.lock() = None;
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            self.calls.lock().push("close");
            Ok(())
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            drain_timeout_ms: 20,
            settle_ms: 0,
            prefill_ms: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_open_negotiates_and_streams() {
        let (sink, _puller) = TestSink::new(SinkCapabilities::default());
        let mut engine = SyncEngine::new(sink, fast_config());
        let hint = SourceFormat::pcm(44100, 2, 16);
        engine.open("sink:test", &hint).unwrap();
        assert!(engine.is_streaming());
        // 24/32 sink: narrowest container for 16-bit source is 24
        assert_eq!(engine.sink_format().unwrap().bytes_per_sample, 3);
    }

    #[test]
    fn test_open_rejects_unsupported_rate() {
        let caps = SinkCapabilities {
            pcm_rates: vec![44100],
            ..Default::default()
        };
        let (sink, _puller) = TestSink::new(caps);
        let mut engine = SyncEngine::new(sink, fast_config());
        let err = engine
            .open("sink:test", &SourceFormat::pcm(192000, 2, 16))
            .unwrap_err();
        assert!(matches!(err, BridgeError::FormatUnsupported(_)));
        assert_eq!(engine.state(), EngineState::Closed);
    }

    #[test]
    fn test_double_open_rejected() {
        let (sink, _puller) = TestSink::new(SinkCapabilities::default());
        let mut engine = SyncEngine::new(sink, fast_config());
        let hint = SourceFormat::pcm(44100, 2, 16);
        engine.open("sink:test", &hint).unwrap();
        assert!(matches!(
            engine.open("sink:test", &hint),
            Err(BridgeError::AlreadyStreaming)
        ));
    }

    #[test]
    fn test_push_16_to_24_exact_expansion() {
        // Regression: output size must come from the input sample count and
        // the conversion ratio, not the sink's bytes-per-sample
        let (sink, _puller) = TestSink::new(SinkCapabilities::default());
        let mut engine = SyncEngine::new(sink, fast_config());
        engine
            .open("sink:test", &SourceFormat::pcm(44100, 2, 16))
            .unwrap();

        let data = vec![0x42u8; 4096];
        let consumed = engine
            .push_frames(FrameBatch::new(&data, SourceFormat::pcm(44100, 2, 16)))
            .unwrap();
        assert_eq!(consumed, 4096);
        assert_eq!(engine.buffered_bytes(), 6144);
    }

    #[test]
    fn test_pull_pads_silence_and_counts_underrun() {
        let (sink, puller) = TestSink::new(SinkCapabilities::default());
        let mut engine = SyncEngine::new(sink, fast_config());
        engine
            .open("sink:test", &SourceFormat::pcm(44100, 2, 16))
            .unwrap();

        let mut guard = puller.lock();
        let p = guard.as_mut().unwrap();
        let chunk = p.next_chunk(1024);
        assert_eq!(chunk.len(), 1024);
        assert!(chunk.iter().all(|&b| b == 0x00));
        drop(guard);
        assert_eq!(engine.underrun_count(), 1);
    }

    #[test]
    fn test_prefill_holds_back_without_underrun() {
        let (sink, puller) = TestSink::new(SinkCapabilities::default());
        let config = EngineConfig {
            prefill_ms: 50,
            settle_ms: 0,
            ..Default::default()
        };
        let mut engine = SyncEngine::new(sink, config);
        engine
            .open("sink:test", &SourceFormat::pcm(44100, 2, 16))
            .unwrap();

        let mut guard = puller.lock();
        let p = guard.as_mut().unwrap();
        let chunk = p.next_chunk(256);
        assert!(chunk.iter().all(|&b| b == 0x00));
        drop(guard);
        // Priming silence is not an underrun
        assert_eq!(engine.underrun_count(), 0);
    }

    #[test]
    fn test_compatible_format_change_keeps_session() {
        let caps = SinkCapabilities {
            pcm_bits: vec![32],
            ..Default::default()
        };
        let (sink, _puller) = TestSink::new(caps);
        let mut engine = SyncEngine::new(sink, fast_config());
        engine
            .open("sink:test", &SourceFormat::pcm(44100, 2, 16))
            .unwrap();
        assert_eq!(engine.sink_format().unwrap().bytes_per_sample, 4);

        // 32-bit source at the same rate negotiates the same descriptor:
        // plan swap only, no transport cycle
        let data = vec![0u8; 64];
        engine
            .push_frames(FrameBatch::new(&data, SourceFormat::pcm(44100, 2, 32)))
            .unwrap();
        assert!(engine.is_streaming());
        assert_eq!(engine.buffered_bytes(), 64);
    }

    #[test]
    fn test_reconfigure_pcm_to_dsd() {
        let (sink, _puller) = TestSink::new(SinkCapabilities::default());
        let mut engine = SyncEngine::new(sink, fast_config());
        engine
            .open("sink:test", &SourceFormat::pcm(44100, 2, 16))
            .unwrap();

        let dsd = SourceFormat::dsd(2_822_400, 2, DsdBitOrder::LsbFirst, ByteOrder::Big);
        let data = vec![0x69u8; 128];
        // Pushing an incompatible format triggers the reconfigure sequence
        engine.push_frames(FrameBatch::new(&data, dsd)).unwrap();
        assert!(engine.is_streaming());
        let desc = engine.sink_format().unwrap();
        assert!(desc.dsd);
        assert_eq!(desc.rate, 2_822_400);
        assert_eq!(engine.buffered_bytes(), 128);
    }

    #[test]
    fn test_empty_and_short_dsd_batches_are_noops() {
        let (sink, _puller) = TestSink::new(SinkCapabilities::default());
        let mut engine = SyncEngine::new(sink, fast_config());
        let dsd = SourceFormat::dsd(2_822_400, 2, DsdBitOrder::MsbFirst, ByteOrder::Big);
        engine.open("sink:test", &dsd).unwrap();

        // A decode front end can emit an empty batch at EOF/flush
        let consumed = engine.push_frames(FrameBatch::new(&[], dsd)).unwrap();
        assert_eq!(consumed, 0);

        // Fewer bytes than channels: not even one byte per channel
        let consumed = engine.push_frames(FrameBatch::new(&[0x69], dsd)).unwrap();
        assert_eq!(consumed, 0);
        assert_eq!(engine.buffered_bytes(), 0);
        assert!(engine.is_streaming());
    }

    #[test]
    fn test_odd_length_pcm_batch_returns_promptly() {
        let (sink, _puller) = TestSink::new(SinkCapabilities::default());
        let mut engine = SyncEngine::new(sink, fast_config());
        let fmt = SourceFormat::pcm(44100, 2, 16);
        engine.open("sink:test", &fmt).unwrap();

        // 5 bytes = 2 whole 16-bit samples + a trailing partial byte; the
        // partial byte must be dropped, not retried forever
        let data = [0x10u8, 0x20, 0x30, 0x40, 0x50];
        let consumed = engine.push_frames(FrameBatch::new(&data, fmt)).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(engine.buffered_bytes(), 6);
    }

    #[test]
    fn test_partial_sample_32_bit_batch_returns_promptly() {
        let caps = SinkCapabilities {
            pcm_bits: vec![24],
            ..Default::default()
        };
        let (sink, _puller) = TestSink::new(caps);
        let mut engine = SyncEngine::new(sink, fast_config());
        let fmt = SourceFormat::pcm(44100, 2, 32);
        engine.open("sink:test", &fmt).unwrap();

        // 10 bytes = 2 whole padded-32-bit samples + 2 trailing bytes
        let data = [0u8; 10];
        let consumed = engine.push_frames(FrameBatch::new(&data, fmt)).unwrap();
        assert_eq!(consumed, 8);
        assert_eq!(engine.buffered_bytes(), 6);
    }

    #[test]
    fn test_stop_releases_session() {
        let (sink, _puller) = TestSink::new(SinkCapabilities::default());
        let mut engine = SyncEngine::new(sink, fast_config());
        engine
            .open("sink:test", &SourceFormat::pcm(44100, 2, 16))
            .unwrap();
        engine.stop().unwrap();
        assert_eq!(engine.state(), EngineState::Closed);
        assert!(engine.sink_format().is_none());

        let data = vec![0u8; 16];
        assert!(matches!(
            engine.push_frames(FrameBatch::new(&data, SourceFormat::pcm(44100, 2, 16))),
            Err(BridgeError::NotStreaming)
        ));
    }
}
