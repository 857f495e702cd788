//! Sink capability declaration and format negotiation

use crate::audio::{ByteOrder, DsdBitOrder, SourceFormat};

/// Default DSD idle pattern. All-zero DSD is a hard DC offset, not silence;
/// the repeating 01101001 pattern is what DSD DACs expect when idle.
pub const DSD_SILENCE_BYTE: u8 = 0x69;

/// The support set a sink transport declares at connect time
#[derive(Debug, Clone)]
pub struct SinkCapabilities {
    /// Accepted PCM sample rates
    pub pcm_rates: Vec<u32>,
    /// Accepted PCM container sizes in bits (16/24/32)
    pub pcm_bits: Vec<u16>,
    /// Accepted DSD bit clock rates (empty = no DSD support)
    pub dsd_rates: Vec<u32>,
    pub max_channels: u16,
    /// Bit order the sink requires for DSD data
    pub dsd_bit_order: DsdBitOrder,
    /// Byte order the sink requires for multi-byte words
    pub dsd_byte_order: ByteOrder,
    /// DSD word size per channel, in bytes
    pub dsd_word_bytes: usize,
}

impl Default for SinkCapabilities {
    fn default() -> Self {
        Self {
            pcm_rates: vec![44100, 48000, 88200, 96000, 176400, 192000, 352800, 384000],
            pcm_bits: vec![24, 32],
            dsd_rates: vec![2_822_400, 5_644_800, 11_289_600],
            max_channels: 8,
            dsd_bit_order: DsdBitOrder::MsbFirst,
            dsd_byte_order: ByteOrder::Big,
            dsd_word_bytes: 2,
        }
    }
}

/// The negotiated wire format for one streaming session.
///
/// Owned by the sync engine and replaced atomically (under the transition
/// exclusion) on every format change; every push dispatch is computed
/// against the current descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkFormatDescriptor {
    /// Sink-side container size per sample (e.g. 3 or 4)
    pub bytes_per_sample: usize,
    pub channels: u16,
    /// PCM sample rate or DSD bit clock rate
    pub rate: u32,
    pub dsd: bool,
    /// Required DSD bit order
    pub bit_order: DsdBitOrder,
    /// Required word byte order
    pub byte_order: ByteOrder,
}

impl SinkFormatDescriptor {
    /// Map decode-side metadata to the sink's format vocabulary, preferring
    /// the narrowest container that holds the source. Returns `None` when
    /// the sink cannot carry the source format at all.
    pub fn negotiate(source: &SourceFormat, caps: &SinkCapabilities) -> Option<Self> {
        if source.channels == 0 || source.channels > caps.max_channels {
            return None;
        }

        if source.dsd {
            if !caps.dsd_rates.contains(&source.sample_rate) {
                return None;
            }
            return Some(Self {
                bytes_per_sample: caps.dsd_word_bytes,
                channels: source.channels,
                rate: source.sample_rate,
                dsd: true,
                bit_order: caps.dsd_bit_order,
                byte_order: caps.dsd_byte_order,
            });
        }

        if !caps.pcm_rates.contains(&source.sample_rate) {
            return None;
        }
        // Narrowest container that holds the source bits
        let bits = caps
            .pcm_bits
            .iter()
            .copied()
            .filter(|&b| b >= source.bits_per_sample.min(24))
            .min()?;
        Some(Self {
            bytes_per_sample: bits as usize / 8,
            channels: source.channels,
            rate: source.sample_rate,
            dsd: false,
            bit_order: caps.dsd_bit_order,
            byte_order: caps.dsd_byte_order,
        })
    }

    /// Wire data rate in bytes per second
    pub fn bytes_per_second(&self) -> u64 {
        if self.dsd {
            self.rate as u64 / 8 * self.channels as u64
        } else {
            self.rate as u64 * self.channels as u64 * self.bytes_per_sample as u64
        }
    }

    /// The byte value that represents silence in this format
    pub fn silence_byte(&self) -> u8 {
        if self.dsd {
            DSD_SILENCE_BYTE
        } else {
            0x00
        }
    }
}

impl std::fmt::Display for SinkFormatDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.dsd {
            write!(
                f,
                "DSD {}Hz {}ch word={}B ({:?}/{:?})",
                self.rate, self.channels, self.bytes_per_sample, self.bit_order, self.byte_order
            )
        } else {
            write!(
                f,
                "PCM {}Hz {}ch {}bit",
                self.rate,
                self.channels,
                self.bytes_per_sample * 8
            )
        }
    }
}

impl SinkCapabilities {
    /// Pure support predicate; returns false (never panics) for any
    /// unsupported combination.
    pub fn supports(&self, format: &SinkFormatDescriptor) -> bool {
        if format.channels == 0 || format.channels > self.max_channels {
            return false;
        }
        if format.dsd {
            self.dsd_rates.contains(&format.rate)
                && format.bytes_per_sample == self.dsd_word_bytes
                && format.bit_order == self.dsd_bit_order
                && format.byte_order == self.dsd_byte_order
        } else {
            self.pcm_rates.contains(&format.rate)
                && self.pcm_bits.contains(&(format.bytes_per_sample as u16 * 8))
        }
    }
}
