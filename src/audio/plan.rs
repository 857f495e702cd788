//! Conversion plan derivation
//!
//! A `ConversionPlan` is the single derived value describing how incoming
//! source bytes become sink wire bytes. It is recomputed synchronously
//! whenever the source format or the negotiated sink descriptor changes and
//! is read-only in the push hot path, so a push can never observe a
//! half-updated set of conversion flags.

use crate::audio::{ByteOrder, SourceFormat};
use crate::error::{BridgeError, Result};
use crate::sink::caps::SinkFormatDescriptor;

/// The active PCM shape path. Exactly one applies at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmShape {
    /// Source and sink layouts already match
    Direct,
    /// 16-bit LE source widened into 24-bit words
    Upsample16To24,
    /// 16-bit LE source widened into 32-bit words
    Upsample16To32,
    /// Padded-32-bit source packed down to tight 24-bit words
    Pack24From32,
}

impl PcmShape {
    /// Output bytes produced per input byte, as a ratio (numerator,
    /// denominator)
    pub fn expansion(&self) -> (usize, usize) {
        match self {
            PcmShape::Direct => (1, 1),
            PcmShape::Upsample16To24 => (3, 2),
            PcmShape::Upsample16To32 => (4, 2),
            PcmShape::Pack24From32 => (3, 4),
        }
    }
}

/// DSD handling layered on top of the planar-to-interleaved remux
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DsdPlan {
    /// Source bit order differs from what the sink requires
    pub bit_reverse: bool,
    /// Sink declared little-endian words; the canonical remux output is
    /// big-endian, so the swap depends only on the sink's endianness
    pub byte_swap: bool,
    /// Sink word size per channel, in bytes
    pub word_bytes: usize,
}

/// Derived description of the conversion path from the current source
/// format to the negotiated sink descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionPlan {
    Pcm(PcmShape),
    Dsd(DsdPlan),
}

impl ConversionPlan {
    /// Compute the plan for a source format against the negotiated sink
    /// descriptor. Fails with `FormatUnsupported` when no conversion path
    /// exists; the caller then renegotiates or rejects the stream.
    pub fn derive(source: &SourceFormat, sink: &SinkFormatDescriptor) -> Result<Self> {
        if source.dsd != sink.dsd {
            return Err(BridgeError::FormatUnsupported(format!(
                "{source} vs sink {}",
                if sink.dsd { "DSD" } else { "PCM" }
            )));
        }

        if source.dsd {
            return Ok(ConversionPlan::Dsd(DsdPlan {
                bit_reverse: source.dsd_bit_order != sink.bit_order,
                byte_swap: sink.byte_order == ByteOrder::Little,
                word_bytes: sink.bytes_per_sample,
            }));
        }

        let shape = match (source.bits_per_sample, sink.bytes_per_sample) {
            (16, 2) => PcmShape::Direct,
            (16, 3) => PcmShape::Upsample16To24,
            (16, 4) => PcmShape::Upsample16To32,
            (24, 3) => PcmShape::Direct,
            (32, 3) => PcmShape::Pack24From32,
            (32, 4) => PcmShape::Direct,
            (bits, bytes) => {
                return Err(BridgeError::FormatUnsupported(format!(
                    "no conversion from {bits}-bit source to {bytes}-byte sink samples"
                )))
            }
        };
        Ok(ConversionPlan::Pcm(shape))
    }

    /// Sink-side bytes produced for `input_len` source bytes, assuming
    /// unlimited destination space. Used for flow control and tests, never
    /// for bounds decisions inside the ring (those clamp against actual
    /// free space).
    pub fn output_len(&self, input_len: usize) -> usize {
        match self {
            ConversionPlan::Pcm(shape) => {
                let (num, den) = shape.expansion();
                input_len / den * num
            }
            // The remux is 1:1 at the byte level
            ConversionPlan::Dsd(_) => input_len,
        }
    }
}
