//! Pure sample-layout conversions
//!
//! Every function here is stateless and allocation-free, writing into a
//! caller-supplied destination. Callers are responsible for validating
//! destination space before invoking: output byte counts derive from the
//! input sample count and the conversion's expansion ratio, never from the
//! sink's nominal bytes-per-sample.

/// Precomputed per-byte bit-reversal table.
///
/// Used when the source DSD bit order (LSB-first DSF vs MSB-first DFF)
/// differs from what the sink requires.
pub const BIT_REVERSE: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = (i as u8).reverse_bits();
        i += 1;
    }
    table
};

/// Byte-identical copy. Used when source and sink layouts already match.
#[inline]
pub fn direct_copy(src: &[u8], dst: &mut [u8]) -> usize {
    dst[..src.len()].copy_from_slice(src);
    src.len()
}

/// Widen one 16-bit little-endian sample into a 24-bit little-endian word,
/// original bits in the two most-significant bytes (left shift by 8).
#[inline]
pub fn widen_16_to_24(lo: u8, hi: u8) -> [u8; 3] {
    [0, lo, hi]
}

/// Widen one 16-bit little-endian sample into a 32-bit little-endian word
/// (left shift by 16).
#[inline]
pub fn widen_16_to_32(lo: u8, hi: u8) -> [u8; 4] {
    [0, 0, lo, hi]
}

/// Convert 16-bit LE samples to 24-bit LE words.
///
/// `src.len()` must be even; `dst` must hold at least `src.len() / 2 * 3`
/// bytes. Returns the number of output bytes written.
pub fn upsample_16_to_24(src: &[u8], dst: &mut [u8]) -> usize {
    let samples = src.len() / 2;
    let out_len = samples * 3;
    for (s, d) in src.chunks_exact(2).zip(dst[..out_len].chunks_exact_mut(3)) {
        d.copy_from_slice(&widen_16_to_24(s[0], s[1]));
    }
    out_len
}

/// Convert 16-bit LE samples to 32-bit LE words.
///
/// `src.len()` must be even; `dst` must hold at least `src.len() / 2 * 4`
/// bytes. Returns the number of output bytes written.
pub fn upsample_16_to_32(src: &[u8], dst: &mut [u8]) -> usize {
    let samples = src.len() / 2;
    let out_len = samples * 4;
    for (s, d) in src.chunks_exact(2).zip(dst[..out_len].chunks_exact_mut(4)) {
        d.copy_from_slice(&widen_16_to_32(s[0], s[1]));
    }
    out_len
}

/// Extract the low 3 bytes of each 4-byte padded-24-bit LE sample.
///
/// `src.len()` must be a multiple of 4; `dst` must hold at least
/// `src.len() / 4 * 3` bytes. Returns the number of output bytes written.
pub fn pack_24_from_padded_32(src: &[u8], dst: &mut [u8]) -> usize {
    let samples = src.len() / 4;
    let out_len = samples * 3;
    for (s, d) in src.chunks_exact(4).zip(dst[..out_len].chunks_exact_mut(3)) {
        d.copy_from_slice(&s[..3]);
    }
    out_len
}

/// Source byte index for a DSD channel stream, accounting for word-level
/// byte swapping: within each `word`-byte group, bytes are emitted in
/// reverse order.
#[inline]
pub fn dsd_swap_index(i: usize, word: Option<usize>) -> usize {
    match word {
        Some(w) if w > 1 => {
            let group = i / w;
            let offset = i % w;
            group * w + (w - 1 - offset)
        }
        _ => i,
    }
}

/// Interleave planar DSD channel buffers into `dst`, one byte per channel in
/// round-robin order.
///
/// Reads `bytes_per_channel` bytes from each slice in `channels`. When
/// `table` is given, every output byte is replaced by its table entry
/// (bit-order reversal). When `swap_word` is given, each `swap_word`-byte
/// group within a channel is emitted byte-reversed to match the sink's
/// declared endianness; `bytes_per_channel` must then be a multiple of it.
///
/// `dst` must hold at least `bytes_per_channel * channels.len()` bytes.
/// Returns the number of output bytes written.
pub fn remux_dsd_planar_to_interleaved(
    channels: &[&[u8]],
    dst: &mut [u8],
    bytes_per_channel: usize,
    table: Option<&[u8; 256]>,
    swap_word: Option<usize>,
) -> usize {
    let mut pos = 0;
    for i in 0..bytes_per_channel {
        let src_idx = dsd_swap_index(i, swap_word);
        for ch in channels {
            let byte = ch[src_idx];
            dst[pos] = match table {
                Some(t) => t[byte as usize],
                None => byte,
            };
            pos += 1;
        }
    }
    pos
}
