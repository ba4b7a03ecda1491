//! The DMA arena: one physically contiguous, uncached region holding every ring's words, slot
//! headers and packet buffers.
//!
//! Layout, in order: RX ring words, TX ring words, RX headers, TX headers, RX buffers,
//! TX buffers. Everything the engine sees is addressed by `phys_base + offset`.

use core::ptr::NonNull;
use core::sync::atomic::{Ordering, fence};

use crate::config::Config;
use crate::ring::HEADER_SIZE;

/// Bytes per slot buffer. Also the RX truncation length programmed into DMA_IF_CTRL.
pub const RING_BUFFER: usize = 1600;
pub const MAX_RX_RINGS: usize = 8;
pub const MAX_TX_RINGS: usize = 4;

const WORD: usize = 4;
const BUFFER_ALIGN: usize = 32;

/// Memory shared with the DMA engine.
///
/// Offsets are relative to the start of the region. Implementations may panic on an access
/// outside `0..len()`; callers only use offsets handed out by [`Layout`].
pub trait DmaRegion {
    fn len(&self) -> usize;

    /// Bus address of offset 0. Must be 4-byte aligned.
    fn phys_base(&self) -> u32;

    fn read(&self, offset: usize, buf: &mut [u8]);

    fn write(&mut self, offset: usize, data: &[u8]);

    fn read_word(&self, offset: usize) -> u32 {
        let mut b = [0u8; WORD];
        self.read(offset, &mut b);
        u32::from_ne_bytes(b)
    }

    fn write_word(&mut self, offset: usize, value: u32) {
        self.write(offset, &value.to_ne_bytes())
    }

    fn fill(&mut self, offset: usize, len: usize, byte: u8) {
        let chunk = [byte; 64];
        let mut done = 0;
        while done < len {
            let n = (len - done).min(chunk.len());
            self.write(offset + done, &chunk[..n]);
            done += n;
        }
    }

    /// Order every earlier access to the region before every later one, as seen by the
    /// engine. The region is uncached, so a fence is enough.
    fn barrier(&self) {
        fence(Ordering::SeqCst);
    }

    fn phys(&self, offset: usize) -> u32 {
        self.phys_base().wrapping_add(offset as u32)
    }

    /// Region offset of a bus address, if it falls inside the region.
    fn offset_of(&self, phys: u32) -> Option<usize> {
        let off = phys.checked_sub(self.phys_base())? as usize;
        (off < self.len()).then_some(off)
    }
}

/// An uncached mapping of physically contiguous memory.
pub struct CoherentRegion {
    virt: NonNull<u8>,
    phys: u32,
    len: usize,
}

// SAFETY: the region is exclusively owned and only touched through `&self`/`&mut self`.
unsafe impl Send for CoherentRegion {}

impl CoherentRegion {
    /// # Safety
    ///
    /// `virt` must be a 4-byte aligned uncached mapping of `len` bytes of memory starting at bus
    /// address `phys`, valid and not otherwise accessed by software for the lifetime of the
    /// returned value.
    pub unsafe fn new(virt: NonNull<u8>, phys: u32, len: usize) -> Self {
        Self { virt, phys, len }
    }

    fn check(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "DMA region access out of bounds"
        );
    }
}

impl DmaRegion for CoherentRegion {
    fn len(&self) -> usize {
        self.len
    }

    fn phys_base(&self) -> u32 {
        self.phys
    }

    fn read(&self, offset: usize, buf: &mut [u8]) {
        self.check(offset, buf.len());
        let src = unsafe { self.virt.as_ptr().add(offset) };
        for (i, b) in buf.iter_mut().enumerate() {
            // SAFETY: bounds checked above, mapping valid per `new`.
            *b = unsafe { core::ptr::read_volatile(src.add(i)) };
        }
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        self.check(offset, data.len());
        let dst = unsafe { self.virt.as_ptr().add(offset) };
        for (i, b) in data.iter().enumerate() {
            // SAFETY: see read.
            unsafe { core::ptr::write_volatile(dst.add(i), *b) };
        }
    }

    fn read_word(&self, offset: usize) -> u32 {
        self.check(offset, WORD);
        debug_assert_eq!(offset % WORD, 0);
        // SAFETY: in bounds and aligned (base and offset are 4-aligned).
        unsafe { core::ptr::read_volatile(self.virt.as_ptr().add(offset) as *const u32) }
    }

    fn write_word(&mut self, offset: usize, value: u32) {
        self.check(offset, WORD);
        debug_assert_eq!(offset % WORD, 0);
        // SAFETY: see read_word.
        unsafe { core::ptr::write_volatile(self.virt.as_ptr().add(offset) as *mut u32, value) }
    }
}

/// Where each ring's pieces sit in the arena.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Layout {
    pub rx_rings: usize,
    pub rx_ring_len: usize,
    pub tx_rings: usize,
    pub tx_ring_len: usize,
}

fn align_up(v: usize, align: usize) -> usize {
    v.div_ceil(align) * align
}

impl Layout {
    pub fn from_config(config: &Config) -> Self {
        Self {
            rx_rings: config.rx_rings,
            rx_ring_len: config.rx_ring_len,
            tx_rings: config.tx_rings,
            tx_ring_len: config.tx_ring_len,
        }
    }

    fn rx_slots(&self) -> usize {
        self.rx_rings * self.rx_ring_len
    }

    fn tx_slots(&self) -> usize {
        self.tx_rings * self.tx_ring_len
    }

    pub fn rx_words(&self, ring: usize) -> usize {
        ring * self.rx_ring_len * WORD
    }

    pub fn tx_words(&self, ring: usize) -> usize {
        self.rx_slots() * WORD + ring * self.tx_ring_len * WORD
    }

    fn headers(&self) -> usize {
        (self.rx_slots() + self.tx_slots()) * WORD
    }

    pub fn rx_headers(&self, ring: usize) -> usize {
        self.headers() + ring * self.rx_ring_len * HEADER_SIZE
    }

    pub fn tx_headers(&self, ring: usize) -> usize {
        self.headers() + (self.rx_slots() + ring * self.tx_ring_len) * HEADER_SIZE
    }

    fn buffers(&self) -> usize {
        align_up(
            self.headers() + (self.rx_slots() + self.tx_slots()) * HEADER_SIZE,
            BUFFER_ALIGN,
        )
    }

    /// Slot `s` of RX ring `r` owns `rx_buffers(r) + s * RING_BUFFER`.
    pub fn rx_buffers(&self, ring: usize) -> usize {
        self.buffers() + ring * self.rx_ring_len * RING_BUFFER
    }

    pub fn tx_buffers(&self, ring: usize) -> usize {
        self.buffers() + (self.rx_slots() + ring * self.tx_ring_len) * RING_BUFFER
    }

    /// Bytes the region must provide.
    pub fn size(&self) -> usize {
        self.tx_buffers(self.tx_rings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regmap::ChipFamily;

    #[test]
    fn sections_do_not_overlap() {
        let l = Layout::from_config(&Config::new(ChipFamily::Rtl838x));
        assert_eq!(l.rx_words(0), 0);
        assert_eq!(l.tx_words(0), 8 * 32 * 4);
        assert_eq!(l.rx_headers(0), l.tx_words(2));
        assert_eq!(l.tx_headers(0), l.rx_headers(8));
        assert!(l.rx_buffers(0) >= l.tx_headers(2));
        assert_eq!(l.rx_buffers(0) % BUFFER_ALIGN, 0);
        assert_eq!(l.tx_buffers(0), l.rx_buffers(8));
        assert_eq!(l.size(), l.tx_buffers(0) + 2 * 20 * RING_BUFFER);
    }

    #[test]
    fn per_slot_buffers_are_disjoint_across_rings() {
        let l = Layout {
            rx_rings: 2,
            rx_ring_len: 4,
            tx_rings: 1,
            tx_ring_len: 2,
        };
        // Last slot of ring 0 ends where slot 0 of ring 1 starts
        assert_eq!(l.rx_buffers(0) + 4 * RING_BUFFER, l.rx_buffers(1));
    }

    #[test]
    fn offset_of_bounds() {
        let r = crate::sim::HeapRegion::new(64, 0x1000);
        assert_eq!(r.offset_of(0x1000), Some(0));
        assert_eq!(r.offset_of(0x103f), Some(63));
        assert_eq!(r.offset_of(0x1040), None);
        assert_eq!(r.offset_of(0x0fff), None);
    }
}
