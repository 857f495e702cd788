//! CLI argument parsing using clap

use clap::{Parser, Subcommand};

/// dacbridge - network audio renderer core
///
/// Bridges decoded PCM/DSD audio to pull-based DAC sink transports
#[derive(Parser, Debug)]
#[command(name = "dacbridge")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Verbose output (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output to file
    #[arg(long, global = true)]
    pub log: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a soak session against the built-in null sink
    Start {
        /// Sink target address
        #[arg(short, long, default_value = "null:")]
        target: String,

        /// Tuning file path (default: search standard locations)
        #[arg(short, long)]
        config: Option<String>,

        /// Source sample rate in Hz
        #[arg(long, default_value = "44100")]
        rate: u32,

        /// Source channel count
        #[arg(long, default_value = "2")]
        channels: u16,

        /// Source bit depth
        #[arg(long, default_value = "16")]
        bits: u16,
    },

    /// Print the capabilities of the built-in null sink
    Caps,

    /// Print a sample tuning file, or write the defaults to a file
    SampleConfig {
        /// Write a tuning file with the defaults instead of printing
        #[arg(long, value_name = "PATH")]
        write: Option<String>,
    },
}

impl Args {
    /// Get the log level based on verbose/quiet flags
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::INFO,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Command::Start {
            target: "null:".to_string(),
            config: None,
            rate: 44100,
            channels: 2,
            bits: 16,
        }
    }
}
