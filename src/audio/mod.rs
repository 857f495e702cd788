//! Audio formats, sample conversion, buffering, and stream synchronization

pub mod buffer;
pub mod convert;
pub mod engine;
pub mod plan;

pub use buffer::RingBuffer;
pub use engine::{EngineConfig, EngineState, StreamPuller, SyncEngine};
pub use plan::{ConversionPlan, DsdPlan, PcmShape};

/// Bit order of DSD sample data within a byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsdBitOrder {
    /// Oldest sample in the least-significant bit (DSF convention)
    LsbFirst,
    /// Oldest sample in the most-significant bit (DFF convention)
    MsbFirst,
}

/// Byte order of multi-byte sample words on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Decode-side format metadata accompanying every frame batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFormat {
    /// PCM sample rate, or the DSD bit clock rate (e.g. 2822400 for DSD64)
    pub sample_rate: u32,
    pub channels: u16,
    /// PCM container size in bits; ignored for DSD (always 1-bit data)
    pub bits_per_sample: u16,
    pub dsd: bool,
    /// Bit order of DSD bytes as produced by the decoder
    pub dsd_bit_order: DsdBitOrder,
    /// Byte order of DSD words as produced by the decoder
    pub dsd_byte_order: ByteOrder,
}

impl SourceFormat {
    /// Conventional 16-bit stereo PCM at the given rate
    pub fn pcm(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
            dsd: false,
            dsd_bit_order: DsdBitOrder::MsbFirst,
            dsd_byte_order: ByteOrder::Big,
        }
    }

    /// DSD at the given bit clock rate
    pub fn dsd(rate: u32, channels: u16, bit_order: DsdBitOrder, byte_order: ByteOrder) -> Self {
        Self {
            sample_rate: rate,
            channels,
            bits_per_sample: 1,
            dsd: true,
            dsd_bit_order: bit_order,
            dsd_byte_order: byte_order,
        }
    }

    /// Source-side data rate in bytes per second
    pub fn bytes_per_second(&self) -> u64 {
        if self.dsd {
            // 1 bit per channel per clock tick
            self.sample_rate as u64 / 8 * self.channels as u64
        } else {
            self.sample_rate as u64 * self.channels as u64 * (self.bits_per_sample as u64 / 8)
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.dsd {
            write!(
                f,
                "DSD {}Hz {}ch ({:?}/{:?})",
                self.sample_rate, self.channels, self.dsd_bit_order, self.dsd_byte_order
            )
        } else {
            write!(
                f,
                "PCM {}Hz {}ch {}bit",
                self.sample_rate, self.channels, self.bits_per_sample
            )
        }
    }
}

/// A batch of decoded frames handed to the engine by the decode front end.
///
/// PCM payloads are interleaved little-endian samples. DSD payloads are
/// planar: all of channel 0's bytes, then all of channel 1's, and so on.
#[derive(Debug, Clone, Copy)]
pub struct FrameBatch<'a> {
    pub data: &'a [u8],
    pub format: SourceFormat,
}

impl<'a> FrameBatch<'a> {
    pub fn new(data: &'a [u8], format: SourceFormat) -> Self {
        Self { data, format }
    }

    /// Bytes per channel for a planar DSD payload
    pub fn bytes_per_channel(&self) -> usize {
        if self.format.channels == 0 {
            return 0;
        }
        self.data.len() / self.format.channels as usize
    }
}
