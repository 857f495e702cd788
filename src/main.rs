//! dacbridge CLI

use anyhow::Result;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dacbridge::audio::SourceFormat;
use dacbridge::config::{Args, Command, TuningConfig};
use dacbridge::render::Renderer;
use dacbridge::sink::{NullSink, SinkCapabilities};

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    match args.command.unwrap_or_default() {
        Command::Start {
            target,
            config,
            rate,
            channels,
            bits,
        } => cmd_start(&target, config.as_deref(), rate, channels, bits),
        Command::Caps => cmd_caps(),
        Command::SampleConfig { write } => cmd_sample_config(write.as_deref()),
    }
}

fn cmd_sample_config(write: Option<&str>) -> Result<()> {
    match write {
        Some(path) => {
            TuningConfig::default().save(path)?;
            println!("Wrote default tuning to {}", path);
        }
        None => print!("{}", TuningConfig::sample_config()),
    }
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    let level = args.log_level();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if let Some(log_file) = &args.log {
        let file = std::fs::File::create(log_file)?;
        subscriber.with_writer(file).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Run a soak session: feed silence frames at real-time rate through the
/// full conversion path into the null sink until Ctrl+C.
fn cmd_start(
    target: &str,
    config_path: Option<&str>,
    rate: u32,
    channels: u16,
    bits: u16,
) -> Result<()> {
    let tuning = match config_path {
        Some(path) => TuningConfig::load(path)?,
        None => TuningConfig::load_default()?,
    };

    let format = SourceFormat::pcm(rate, channels, bits);
    let renderer = Renderer::new(Box::new(NullSink::default()), tuning.to_engine_config());

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    let _ = ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping...");
        r.store(false, Ordering::SeqCst);
    });

    match renderer.open(target, &format) {
        Ok(()) => {
            if let Some(sink_format) = renderer.sink_format() {
                info!("Negotiated sink format: {}", sink_format);
            }
            println!("Streaming {} to {}. Press Ctrl+C to stop.", format, target);
        }
        Err(e) => {
            error!("Failed to open stream: {}", e);
            return Err(e.into());
        }
    }

    // 20ms batches of digital silence at the source rate
    let batch_bytes = (format.bytes_per_second() as usize / 50).max(64);
    let batch = vec![0u8; batch_bytes];
    let mut next_deadline = Instant::now();

    while running.load(Ordering::SeqCst) && renderer.is_streaming() {
        renderer.on_decoded_frames(&batch, &format)?;
        next_deadline += Duration::from_millis(20);
        if let Some(wait) = next_deadline.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
    }

    renderer.stop()?;
    println!("Stopped. Underruns: {}", renderer.underrun_count());

    Ok(())
}

/// Print the built-in null sink's declared capabilities
fn cmd_caps() -> Result<()> {
    let caps = SinkCapabilities::default();

    println!("Null sink capabilities:\n");
    println!("  PCM rates:    {:?}", caps.pcm_rates);
    println!("  PCM bits:     {:?}", caps.pcm_bits);
    println!("  DSD rates:    {:?}", caps.dsd_rates);
    println!("  Max channels: {}", caps.max_channels);
    println!(
        "  DSD layout:   {:?} bit order, {:?} endian, {}-byte words",
        caps.dsd_bit_order, caps.dsd_byte_order, caps.dsd_word_bytes
    );

    Ok(())
}
