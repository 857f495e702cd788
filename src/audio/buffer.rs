//! Lock-free ring buffer for audio data
//!
//! Single-producer single-consumer: exactly one thread calls the push-family
//! functions and exactly one thread (the sink's pull callback) calls `pop`.
//! Cursors are monotonic wrapping counters published with release stores and
//! observed with acquire loads, so a pop never sees a write-cursor advance
//! without also seeing the bytes behind it.
//!
//! The conversion-aware push variants compute their output size from the
//! input sample count and the conversion's expansion ratio, clamp it to a
//! whole-input-sample-aligned prefix of the free space, and only then write.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::audio::convert;

/// Lock-free SPSC circular byte buffer with conversion-aware push variants.
///
/// Capacity is rounded up to the next power of two; one byte of capacity is
/// reserved so that full and empty states stay distinguishable, giving the
/// invariant `available_to_read() + available_to_write() == capacity() - 1`.
pub struct RingBuffer {
    buf: UnsafeCell<Box<[u8]>>,
    capacity: usize,
    /// Mask for fast modulo (capacity is a power of 2)
    mask: usize,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
}

// SAFETY: the SPSC discipline is upheld by the sync engine: only the producer
// mutates bytes ahead of write_pos, only the consumer reads behind it, and
// the cursor acquire/release pairs order the byte accesses between them.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Create a new ring buffer holding at least `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two();
        Self {
            buf: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
            capacity,
            mask: capacity - 1,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    /// Total capacity in bytes (usable capacity is one less)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered and readable
    pub fn available_to_read(&self) -> usize {
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Acquire);
        w.wrapping_sub(r)
    }

    /// Free space available to the producer
    pub fn available_to_write(&self) -> usize {
        self.capacity - 1 - self.available_to_read()
    }

    /// Reset both cursors to zero.
    ///
    /// Requires external synchronization: no push or pop may be in flight.
    /// The sync engine only calls this while the transport is disconnected
    /// and the pull gate is closed.
    pub fn reset(&self) {
        self.write_pos.store(0, Ordering::SeqCst);
        self.read_pos.store(0, Ordering::SeqCst);
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        // SAFETY: callers only touch bytes in regions they own per the SPSC
        // discipline documented on the type.
        unsafe { (*self.buf.get()).as_mut_ptr() }
    }

    /// Copy `data` into the ring starting at monotonic position `pos`,
    /// splitting at the physical wrap point.
    ///
    /// # Safety
    /// Producer-only. `data.len()` must not exceed free space at `pos`.
    unsafe fn write_run(&self, pos: usize, data: &[u8]) {
        let idx = pos & self.mask;
        let first = data.len().min(self.capacity - idx);
        std::ptr::copy_nonoverlapping(data.as_ptr(), self.base().add(idx), first);
        std::ptr::copy_nonoverlapping(
            data.as_ptr().add(first),
            self.base(),
            data.len() - first,
        );
    }

    /// Borrow a contiguous free region of `len` bytes starting at `pos`.
    ///
    /// # Safety
    /// Producer-only. The region `[pos, pos + len)` must lie within free
    /// space and must not cross the physical wrap point.
    unsafe fn free_run(&self, pos: usize, len: usize) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.base().add(pos & self.mask), len)
    }

    /// Direct-copy push. Writes `min(data.len(), free)` bytes and returns
    /// the count actually written; partial writes are expected under
    /// backpressure and the caller retries or drops.
    pub fn push(&self, data: &[u8]) -> usize {
        let w = self.write_pos.load(Ordering::Relaxed);
        let n = data.len().min(self.available_to_write());
        if n == 0 {
            return 0;
        }
        unsafe { self.write_run(w, &data[..n]) };
        self.write_pos.store(w.wrapping_add(n), Ordering::Release);
        n
    }

    /// Push 16-bit LE samples, widening each to a 24-bit word.
    ///
    /// Output size is `data.len() / 2 * 3`, clamped to the largest
    /// whole-sample prefix that fits in free space. Returns output bytes
    /// written.
    pub fn push_16_to_24(&self, data: &[u8]) -> usize {
        let samples = (data.len() / 2).min(self.available_to_write() / 3);
        if samples == 0 {
            return 0;
        }
        let out_len = samples * 3;
        let w = self.write_pos.load(Ordering::Relaxed);
        let idx = w & self.mask;
        if idx + out_len <= self.capacity {
            let dst = unsafe { self.free_run(w, out_len) };
            convert::upsample_16_to_24(&data[..samples * 2], dst);
        } else {
            // Output straddles the wrap point; go byte-at-a-time
            let mut wr = ByteWriter::new(self, idx);
            for s in data[..samples * 2].chunks_exact(2) {
                wr.put_all(&convert::widen_16_to_24(s[0], s[1]));
            }
        }
        self.write_pos.store(w.wrapping_add(out_len), Ordering::Release);
        out_len
    }

    /// Push 16-bit LE samples, widening each to a 32-bit word.
    pub fn push_16_to_32(&self, data: &[u8]) -> usize {
        let samples = (data.len() / 2).min(self.available_to_write() / 4);
        if samples == 0 {
            return 0;
        }
        let out_len = samples * 4;
        let w = self.write_pos.load(Ordering::Relaxed);
        let idx = w & self.mask;
        if idx + out_len <= self.capacity {
            let dst = unsafe { self.free_run(w, out_len) };
            convert::upsample_16_to_32(&data[..samples * 2], dst);
        } else {
            let mut wr = ByteWriter::new(self, idx);
            for s in data[..samples * 2].chunks_exact(2) {
                wr.put_all(&convert::widen_16_to_32(s[0], s[1]));
            }
        }
        self.write_pos.store(w.wrapping_add(out_len), Ordering::Release);
        out_len
    }

    /// Push padded-24-bit samples (4 bytes each), packing to tight 3-byte
    /// words.
    pub fn push_24_packed(&self, data: &[u8]) -> usize {
        let samples = (data.len() / 4).min(self.available_to_write() / 3);
        if samples == 0 {
            return 0;
        }
        let out_len = samples * 3;
        let w = self.write_pos.load(Ordering::Relaxed);
        let idx = w & self.mask;
        if idx + out_len <= self.capacity {
            let dst = unsafe { self.free_run(w, out_len) };
            convert::pack_24_from_padded_32(&data[..samples * 4], dst);
        } else {
            let mut wr = ByteWriter::new(self, idx);
            for s in data[..samples * 4].chunks_exact(4) {
                wr.put_all(&s[..3]);
            }
        }
        self.write_pos.store(w.wrapping_add(out_len), Ordering::Release);
        out_len
    }

    /// Push planar DSD channel buffers, interleaving one byte per channel in
    /// round-robin order, with optional bit-order reversal and word-level
    /// byte swapping.
    ///
    /// Consumes whole frames only: the written prefix is aligned to
    /// `channels.len()` bytes (times `swap_word` when given). Returns output
    /// bytes written; divide by the channel count for the per-channel input
    /// bytes consumed.
    pub fn push_dsd_planar(
        &self,
        channels: &[&[u8]],
        bytes_per_channel: usize,
        table: Option<&[u8; 256]>,
        swap_word: Option<usize>,
    ) -> usize {
        let nch = channels.len();
        if nch == 0 {
            return 0;
        }
        let mut per_ch = bytes_per_channel
            .min(channels.iter().map(|c| c.len()).min().unwrap_or(0))
            .min(self.available_to_write() / nch);
        if let Some(w) = swap_word {
            if w > 1 {
                per_ch -= per_ch % w;
            }
        }
        if per_ch == 0 {
            return 0;
        }
        let out_len = per_ch * nch;
        let w = self.write_pos.load(Ordering::Relaxed);
        let idx = w & self.mask;
        if idx + out_len <= self.capacity {
            let dst = unsafe { self.free_run(w, out_len) };
            convert::remux_dsd_planar_to_interleaved(channels, dst, per_ch, table, swap_word);
        } else {
            let mut wr = ByteWriter::new(self, idx);
            for i in 0..per_ch {
                let src_idx = convert::dsd_swap_index(i, swap_word);
                for ch in channels {
                    let byte = ch[src_idx];
                    wr.put(match table {
                        Some(t) => t[byte as usize],
                        None => byte,
                    });
                }
            }
        }
        self.write_pos.store(w.wrapping_add(out_len), Ordering::Release);
        out_len
    }

    /// Copy up to `dst.len()` buffered bytes out. Returns 0 when empty;
    /// the consumer treats that as "send silence", not as an error.
    pub fn pop(&self, dst: &mut [u8]) -> usize {
        let r = self.read_pos.load(Ordering::Relaxed);
        let w = self.write_pos.load(Ordering::Acquire);
        let n = dst.len().min(w.wrapping_sub(r));
        if n == 0 {
            return 0;
        }
        let idx = r & self.mask;
        let first = n.min(self.capacity - idx);
        // SAFETY: consumer-only region behind the write cursor; the acquire
        // load above ordered these bytes after the producer's writes.
        unsafe {
            std::ptr::copy_nonoverlapping(self.base().add(idx), dst.as_mut_ptr(), first);
            std::ptr::copy_nonoverlapping(self.base(), dst.as_mut_ptr().add(first), n - first);
        }
        self.read_pos.store(r.wrapping_add(n), Ordering::Release);
        n
    }
}

/// Producer-side byte cursor for conversion pushes that straddle the
/// physical wrap point.
struct ByteWriter<'a> {
    ring: &'a RingBuffer,
    idx: usize,
}

impl<'a> ByteWriter<'a> {
    fn new(ring: &'a RingBuffer, idx: usize) -> Self {
        Self { ring, idx }
    }

    #[inline]
    fn put(&mut self, byte: u8) {
        // SAFETY: producer-only; the push variant clamped the output length
        // to free space before constructing this writer.
        unsafe { *self.ring.base().add(self.idx) = byte };
        self.idx = (self.idx + 1) & self.ring.mask;
    }

    #[inline]
    fn put_all(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.put(b);
        }
    }
}
