//! End-to-end streaming scenarios driven by a scripted sink transport

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use dacbridge::audio::{
    ByteOrder, ConversionPlan, DsdBitOrder, EngineConfig, EngineState, FrameBatch, SourceFormat,
    StreamPuller, SyncEngine,
};
use dacbridge::render::Renderer;
use dacbridge::sink::{SinkCapabilities, SinkFormatDescriptor, SinkTransport};
use dacbridge::{BridgeError, Result};

/// Transport stub: records the engine's control calls and hands the pull
/// callback back to the test for manual pacing.
#[derive(Default)]
struct ScriptedSink {
    caps: SinkCapabilities,
    shared: Arc<ScriptedState>,
}

#[derive(Default)]
struct ScriptedState {
    calls: Mutex<Vec<String>>,
    puller: Mutex<Option<StreamPuller>>,
    opened_formats: Mutex<Vec<SinkFormatDescriptor>>,
}

impl ScriptedSink {
    fn new(caps: SinkCapabilities) -> (Self, Arc<ScriptedState>) {
        let shared = Arc::new(ScriptedState::default());
        (
            Self {
                caps,
                shared: shared.clone(),
            },
            shared,
        )
    }
}

impl SinkTransport for ScriptedSink {
    fn capabilities(&self) -> SinkCapabilities {
        self.caps.clone()
    }

    fn open(
        &mut self,
        _target: &str,
        format: &SinkFormatDescriptor,
        puller: StreamPuller,
    ) -> Result<()> {
        self.shared.calls.lock().push("open".into());
        self.shared.opened_formats.lock().push(*format);
        *self.shared.puller.lock() = Some(puller);
        Ok(())
    }

    fn set_format(&mut self, _format: &SinkFormatDescriptor) -> Result<()> {
        self.shared.calls.lock().push("set_format".into());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.shared.calls.lock().push("stop".into());
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.shared.calls.lock().push("disconnect".into());
        *self.shared.puller.lock() = None;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.shared.calls.lock().push("close".into());
        Ok(())
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        settle_ms: 0,
        prefill_ms: 0,
        drain_timeout_ms: 30,
        ..Default::default()
    }
}

#[test]
fn pcm_16_into_24_bit_sink_buffers_exact_expansion() {
    // Regression for the historical overrun: 4096 bytes of 16-bit PCM into
    // a 24-bit-only sink must buffer exactly 4096 / 2 * 3 bytes.
    let (sink, state) = ScriptedSink::new(SinkCapabilities::default());
    let mut engine = SyncEngine::new(Box::new(sink), fast_config());
    let fmt = SourceFormat::pcm(44100, 2, 16);
    engine.open("sink:10.0.0.2", &fmt).unwrap();
    assert_eq!(engine.sink_format().unwrap().bytes_per_sample, 3);

    let data = vec![0x5Au8; 4096];
    let consumed = engine.push_frames(FrameBatch::new(&data, fmt)).unwrap();
    assert_eq!(consumed, 4096);
    assert_eq!(engine.buffered_bytes(), 6144);

    // And the bytes coming out are the upsampled source, not garbage
    let mut guard = state.puller.lock();
    let puller = guard.as_mut().unwrap();
    let chunk = puller.next_chunk(6);
    assert_eq!(chunk, &[0x00, 0x5A, 0x5A, 0x00, 0x5A, 0x5A]);
}

#[test]
fn empty_ring_pull_returns_full_silence_chunk() {
    let (sink, state) = ScriptedSink::new(SinkCapabilities::default());
    let mut engine = SyncEngine::new(Box::new(sink), fast_config());
    engine
        .open("sink:10.0.0.2", &SourceFormat::pcm(44100, 2, 16))
        .unwrap();

    {
        let mut guard = state.puller.lock();
        let puller = guard.as_mut().unwrap();
        let chunk = puller.next_chunk(1024);
        assert_eq!(chunk.len(), 1024);
        assert!(chunk.iter().all(|&b| b == 0x00));
    }
    assert_eq!(engine.underrun_count(), 1);
}

#[test]
fn dsd_underrun_pads_with_dsd_silence_pattern() {
    let (sink, state) = ScriptedSink::new(SinkCapabilities::default());
    let mut engine = SyncEngine::new(Box::new(sink), fast_config());
    let fmt = SourceFormat::dsd(2_822_400, 2, DsdBitOrder::MsbFirst, ByteOrder::Big);
    engine.open("sink:10.0.0.2", &fmt).unwrap();

    let mut guard = state.puller.lock();
    let puller = guard.as_mut().unwrap();
    let chunk = puller.next_chunk(512);
    assert_eq!(chunk.len(), 512);
    assert!(chunk.iter().all(|&b| b == 0x69));
}

#[test]
fn dsf_source_against_msb_little_sink_sets_both_flags() {
    let caps = SinkCapabilities {
        dsd_bit_order: DsdBitOrder::MsbFirst,
        dsd_byte_order: ByteOrder::Little,
        ..Default::default()
    };
    let source = SourceFormat::dsd(2_822_400, 2, DsdBitOrder::LsbFirst, ByteOrder::Big);
    let desc = SinkFormatDescriptor::negotiate(&source, &caps).unwrap();
    match ConversionPlan::derive(&source, &desc).unwrap() {
        ConversionPlan::Dsd(plan) => {
            assert!(plan.bit_reverse);
            assert!(plan.byte_swap);
        }
        other => panic!("expected DSD plan, got {other:?}"),
    }
}

#[test]
fn mid_stream_pcm_to_dsd_reconfigures_and_resumes() {
    let (sink, state) = ScriptedSink::new(SinkCapabilities::default());
    let mut engine = SyncEngine::new(Box::new(sink), fast_config());
    let pcm = SourceFormat::pcm(44100, 2, 16);
    engine.open("sink:10.0.0.2", &pcm).unwrap();

    let data = vec![0x11u8; 2048];
    engine.push_frames(FrameBatch::new(&data, pcm)).unwrap();

    // A DSD batch cannot ride the PCM descriptor: full reconfigure
    let dsd = SourceFormat::dsd(2_822_400, 2, DsdBitOrder::LsbFirst, ByteOrder::Big);
    let dsd_data = vec![0x69u8; 256];
    engine
        .push_frames(FrameBatch::new(&dsd_data, dsd))
        .unwrap();

    assert_eq!(engine.state(), EngineState::Streaming);
    let desc = engine.sink_format().unwrap();
    assert!(desc.dsd);
    assert_eq!(desc.rate, 2_822_400);
    assert_eq!(engine.buffered_bytes(), 256);

    // Transport saw the full cycle, in order
    let calls = state.calls.lock();
    assert_eq!(
        calls.as_slice(),
        &["open", "set_format", "stop", "disconnect", "open", "set_format"]
    );
    let formats = state.opened_formats.lock();
    assert!(!formats[0].dsd);
    assert!(formats[1].dsd);
}

#[test]
fn reconfigure_drain_times_out_without_hanging() {
    // Nobody pulls, so injected silence can never drain; the bounded
    // timeout must force the transition through anyway.
    let (sink, _state) = ScriptedSink::new(SinkCapabilities::default());
    let mut engine = SyncEngine::new(Box::new(sink), fast_config());
    let pcm = SourceFormat::pcm(44100, 2, 16);
    engine.open("sink:10.0.0.2", &pcm).unwrap();

    let start = std::time::Instant::now();
    engine
        .reconfigure(&SourceFormat::pcm(96000, 2, 16))
        .unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(engine.state(), EngineState::Streaming);
    assert_eq!(engine.sink_format().unwrap().rate, 96000);
    // The old stream's bytes are gone after the ring reset
    assert_eq!(engine.buffered_bytes(), 0);
}

#[test]
fn stop_interrupts_backpressured_push() {
    let (sink, _state) = ScriptedSink::new(SinkCapabilities::default());
    let renderer = Arc::new(Renderer::new(Box::new(sink), fast_config()));
    let pcm = SourceFormat::pcm(44100, 2, 16);
    renderer.open("sink:10.0.0.2", &pcm).unwrap();

    // Far more than the ring can hold, and nobody pulling
    let pusher = {
        let renderer = renderer.clone();
        std::thread::spawn(move || {
            let data = vec![0u8; 8 * 1024 * 1024];
            let _ = renderer.on_decoded_frames(&data, &pcm);
        })
    };

    std::thread::sleep(Duration::from_millis(50));
    renderer.stop().unwrap();

    // The push loop observes the cancel token within one poll cycle
    pusher.join().unwrap();
    assert!(!renderer.is_streaming());
}

#[test]
fn push_after_stop_is_rejected_not_fatal() {
    let (sink, _state) = ScriptedSink::new(SinkCapabilities::default());
    let mut engine = SyncEngine::new(Box::new(sink), fast_config());
    let pcm = SourceFormat::pcm(44100, 2, 16);
    engine.open("sink:10.0.0.2", &pcm).unwrap();
    engine.stop().unwrap();

    let data = vec![0u8; 64];
    let err = engine.push_frames(FrameBatch::new(&data, pcm)).unwrap_err();
    assert!(matches!(err, BridgeError::NotStreaming));
    assert!(!err.is_recoverable());
}

#[test]
fn unsupported_open_leaves_engine_reusable() {
    let caps = SinkCapabilities {
        dsd_rates: vec![],
        ..Default::default()
    };
    let (sink, _state) = ScriptedSink::new(caps);
    let mut engine = SyncEngine::new(Box::new(sink), fast_config());

    let dsd = SourceFormat::dsd(2_822_400, 2, DsdBitOrder::LsbFirst, ByteOrder::Big);
    let err = engine.open("sink:10.0.0.2", &dsd).unwrap_err();
    assert!(matches!(err, BridgeError::FormatUnsupported(_)));
    assert!(err.is_recoverable());

    // Fall back to PCM on the same engine
    engine
        .open("sink:10.0.0.2", &SourceFormat::pcm(44100, 2, 16))
        .unwrap();
    assert!(engine.is_streaming());
}
