//! Descriptor rings.
//!
//! A ring is an array of 32-bit words in the arena. Each word holds the bus address of its
//! slot's [`Header`] plus two flag bits: [`OWNED_BY_DEVICE`] and, on the last slot only,
//! [`WRAP`]. Whoever owns a slot may touch its header and buffer; ownership is handed over by
//! rewriting the word, after a barrier.

use bytemuck::{Pod, Zeroable};

use crate::arena::{DmaRegion, Layout, RING_BUFFER};

pub const OWNED_BY_DEVICE: u32 = 1 << 0;
pub const WRAP: u32 = 1 << 1;
const FLAGS: u32 = OWNED_BY_DEVICE | WRAP;

/// Slot header as the engine reads and writes it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Header {
    /// Bus address of the slot buffer
    pub buf: u32,
    pub reserved: u16,
    /// Buffer capacity
    pub size: u16,
    /// Payload offset within the buffer
    pub offset: u16,
    /// Payload length, including the FCS
    pub len: u16,
    pub reserved2: u16,
    /// CPU tag: destination portmask on TX, source port on RX
    pub tag: [u16; 5],
}

pub const HEADER_SIZE: usize = core::mem::size_of::<Header>();

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Rx,
    Tx,
}

/// A received slot, handed to software.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RxSlot {
    pub slot: usize,
    /// Arena offset of the payload
    pub data: usize,
    pub len: u16,
    pub tag: [u16; 5],
}

/// A TX slot software may fill.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct TxSlot {
    pub slot: usize,
    /// Arena offset of the slot buffer
    pub data: usize,
    /// Header with the buffer address already set
    pub header: Header,
}

pub struct DescriptorRing {
    direction: Direction,
    slots: usize,
    words: usize,
    headers: usize,
    buffers: usize,
    cursor: usize,
}

impl DescriptorRing {
    pub fn rx(layout: &Layout, ring: usize) -> Self {
        Self {
            direction: Direction::Rx,
            slots: layout.rx_ring_len,
            words: layout.rx_words(ring),
            headers: layout.rx_headers(ring),
            buffers: layout.rx_buffers(ring),
            cursor: 0,
        }
    }

    pub fn tx(layout: &Layout, ring: usize) -> Self {
        Self {
            direction: Direction::Tx,
            slots: layout.tx_ring_len,
            words: layout.tx_words(ring),
            headers: layout.tx_headers(ring),
            buffers: layout.tx_buffers(ring),
            cursor: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Next slot software will look at.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn word_offset(&self, slot: usize) -> usize {
        self.words + slot * 4
    }

    pub fn header_offset(&self, slot: usize) -> usize {
        self.headers + slot * HEADER_SIZE
    }

    pub fn buffer_offset(&self, slot: usize) -> usize {
        self.buffers + slot * RING_BUFFER
    }

    /// Bus address programmed into the ring base register.
    pub fn base_phys<M: DmaRegion + ?Sized>(&self, mem: &M) -> u32 {
        mem.phys(self.words)
    }

    /// Slot whose ring word sits at bus address `phys`.
    pub fn slot_at<M: DmaRegion + ?Sized>(&self, mem: &M, phys: u32) -> Option<usize> {
        let off = mem.offset_of(phys)?;
        let rel = off.checked_sub(self.words)?;
        (rel % 4 == 0 && rel / 4 < self.slots).then_some(rel / 4)
    }

    pub fn read_header<M: DmaRegion + ?Sized>(&self, mem: &M, slot: usize) -> Header {
        let mut raw = [0u8; HEADER_SIZE];
        mem.read(self.header_offset(slot), &mut raw);
        bytemuck::pod_read_unaligned(&raw)
    }

    fn write_header<M: DmaRegion + ?Sized>(&self, mem: &mut M, slot: usize, h: &Header) {
        mem.write(self.header_offset(slot), bytemuck::bytes_of(h));
    }

    fn fresh_header<M: DmaRegion + ?Sized>(&self, mem: &M, slot: usize) -> Header {
        Header {
            buf: mem.phys(self.buffer_offset(slot)),
            size: RING_BUFFER as u16,
            ..Default::default()
        }
    }

    fn wrap(&self, slot: usize) -> u32 {
        if slot == self.slots - 1 { WRAP } else { 0 }
    }

    fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.slots;
    }

    /// Write every header and word. RX slots start out owned by the engine, TX slots by
    /// software.
    pub fn init<M: DmaRegion + ?Sized>(&mut self, mem: &mut M) {
        let own = match self.direction {
            Direction::Rx => OWNED_BY_DEVICE,
            Direction::Tx => 0,
        };
        for slot in 0..self.slots {
            let h = self.fresh_header(mem, slot);
            self.write_header(mem, slot, &h);
            let word = mem.phys(self.header_offset(slot)) | own | self.wrap(slot);
            mem.write_word(self.word_offset(slot), word);
        }
        mem.barrier();
        self.cursor = 0;
    }

    pub fn word<M: DmaRegion + ?Sized>(&self, mem: &M, slot: usize) -> u32 {
        mem.read_word(self.word_offset(slot))
    }

    pub fn is_owned_by_device<M: DmaRegion + ?Sized>(&self, mem: &M, slot: usize) -> bool {
        self.word(mem, slot) & OWNED_BY_DEVICE != 0
    }

    /// The slot at the cursor, if the engine has handed it back.
    pub fn claim_rx<M: DmaRegion + ?Sized>(&self, mem: &M) -> Option<RxSlot> {
        let slot = self.cursor;
        if self.is_owned_by_device(mem, slot) {
            return None;
        }
        // Header must not be read before the ownership flip is observed
        mem.barrier();
        let h = self.read_header(mem, slot);
        Some(RxSlot {
            slot,
            data: self.buffer_offset(slot) + h.offset as usize,
            len: h.len,
            tag: h.tag,
        })
    }

    /// Return the cursor slot to the engine with a fresh header, then advance.
    pub fn recycle_rx<M: DmaRegion + ?Sized>(&mut self, mem: &mut M) {
        let slot = self.cursor;
        let h = self.fresh_header(mem, slot);
        self.write_header(mem, slot, &h);
        mem.barrier();
        let word = mem.phys(self.header_offset(slot)) | OWNED_BY_DEVICE | self.wrap(slot);
        mem.write_word(self.word_offset(slot), word);
        self.advance();
    }

    /// The slot at the cursor, unless the engine still owns it.
    pub fn claim_tx<M: DmaRegion + ?Sized>(&self, mem: &M) -> Option<TxSlot> {
        let slot = self.cursor;
        if self.is_owned_by_device(mem, slot) {
            return None;
        }
        mem.barrier();
        Some(TxSlot {
            slot,
            data: self.buffer_offset(slot),
            header: self.fresh_header(mem, slot),
        })
    }

    /// Publish `header` in the cursor slot and hand it to the engine, then advance.
    pub fn submit_tx<M: DmaRegion + ?Sized>(&mut self, mem: &mut M, header: &Header) {
        let slot = self.cursor;
        self.write_header(mem, slot, header);
        mem.barrier();
        let word = self.word(mem, slot);
        mem.write_word(self.word_offset(slot), word | OWNED_BY_DEVICE);
        self.advance();
    }

    /// Header address stored in a slot's word.
    pub fn header_phys<M: DmaRegion + ?Sized>(&self, mem: &M, slot: usize) -> u32 {
        self.word(mem, slot) & !FLAGS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{HeapRegion, hw_complete_rx, hw_complete_tx};

    fn layout() -> Layout {
        Layout {
            rx_rings: 2,
            rx_ring_len: 4,
            tx_rings: 1,
            tx_ring_len: 3,
        }
    }

    #[test]
    fn header_is_24_bytes() {
        assert_eq!(HEADER_SIZE, 24);
    }

    #[test]
    fn init_sets_ownership_and_single_wrap() {
        let l = layout();
        let mut mem = HeapRegion::for_layout(&l);
        let mut rx = DescriptorRing::rx(&l, 1);
        let mut tx = DescriptorRing::tx(&l, 0);
        rx.init(&mut mem);
        tx.init(&mut mem);

        for s in 0..4 {
            assert!(rx.is_owned_by_device(&mem, s));
            assert_eq!(rx.word(&mem, s) & WRAP != 0, s == 3);
            assert_eq!(rx.header_phys(&mem, s), mem.phys(rx.header_offset(s)));
            let h = rx.read_header(&mem, s);
            assert_eq!(h.buf, mem.phys(l.rx_buffers(1) + s * RING_BUFFER));
            assert_eq!(h.size, RING_BUFFER as u16);
        }
        for s in 0..3 {
            assert!(!tx.is_owned_by_device(&mem, s));
            assert_eq!(tx.word(&mem, s) & WRAP != 0, s == 2);
        }
    }

    #[test]
    fn recycle_restores_slot_for_every_position() {
        let l = layout();
        let mut mem = HeapRegion::for_layout(&l);
        let mut rx = DescriptorRing::rx(&l, 0);
        rx.init(&mut mem);

        for s in 0..4 {
            hw_complete_rx(&mut mem, &rx, s, &[0xab; 100], [0; 5]);
            let got = rx.claim_rx(&mem).unwrap();
            assert_eq!((got.slot, got.len), (s, 100));
            rx.recycle_rx(&mut mem);

            let h = rx.read_header(&mem, s);
            assert_eq!(h.len, 0);
            assert_eq!(h.size, RING_BUFFER as u16);
            assert_eq!(h.buf, mem.phys(rx.buffer_offset(s)));
            assert!(rx.is_owned_by_device(&mem, s));
            assert_eq!(rx.word(&mem, s) & WRAP != 0, s == 3);
            assert_eq!(rx.cursor(), (s + 1) % 4);
        }
    }

    #[test]
    fn claim_rx_waits_for_engine() {
        let l = layout();
        let mut mem = HeapRegion::for_layout(&l);
        let mut rx = DescriptorRing::rx(&l, 0);
        rx.init(&mut mem);
        assert_eq!(rx.claim_rx(&mem), None);
    }

    #[test]
    fn tx_cursor_tracks_submissions() {
        let l = layout();
        let mut mem = HeapRegion::for_layout(&l);
        let mut tx = DescriptorRing::tx(&l, 0);
        tx.init(&mut mem);

        for n in 1..=7 {
            let slot = tx.claim_tx(&mem).unwrap();
            tx.submit_tx(&mut mem, &slot.header);
            assert!(tx.is_owned_by_device(&mem, slot.slot));
            assert_eq!(tx.word(&mem, slot.slot) & WRAP != 0, slot.slot == 2);
            assert_eq!(tx.cursor(), n % 3);
            hw_complete_tx(&mut mem, &tx, slot.slot);
        }
    }

    #[test]
    fn claim_tx_refuses_device_owned_slot() {
        let l = layout();
        let mut mem = HeapRegion::for_layout(&l);
        let mut tx = DescriptorRing::tx(&l, 0);
        tx.init(&mut mem);
        for _ in 0..3 {
            let slot = tx.claim_tx(&mem).unwrap();
            tx.submit_tx(&mut mem, &slot.header);
        }
        assert_eq!(tx.claim_tx(&mem), None);
        assert_eq!(tx.cursor(), 0);
    }

    #[test]
    fn slot_at_maps_word_addresses() {
        let l = layout();
        let mem = HeapRegion::for_layout(&l);
        let rx = DescriptorRing::rx(&l, 1);
        assert_eq!(rx.slot_at(&mem, mem.phys(rx.word_offset(2))), Some(2));
        assert_eq!(rx.slot_at(&mem, mem.phys(rx.word_offset(0)) + 1), None);
        assert_eq!(rx.slot_at(&mem, mem.phys(l.rx_words(0))), None);
        assert_eq!(rx.slot_at(&mem, mem.phys(rx.word_offset(4))), None);
    }
}
