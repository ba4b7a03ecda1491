//! Host-side stand-ins for the switch: a register file, a heap DMA region and a delay that
//! doesn't.

use std::collections::HashMap;
use std::sync::Mutex;

use embedded_hal::delay::DelayNs;

use crate::arena::{DmaRegion, Layout};
use crate::config::Config;
use crate::device::RegisterBus;
use crate::driver::Device;
use crate::ring::{DescriptorRing, OWNED_BY_DEVICE};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum Access {
    Read(u32),
    Write(u32, u32),
}

/// Sparse register file. Unwritten registers read as zero.
#[derive(Default)]
pub(crate) struct SimBus {
    regs: Mutex<HashMap<u32, u32>>,
    /// Bits that drop back to zero as soon as they are written, like execute and reset bits
    self_clearing: Mutex<HashMap<u32, u32>>,
    log: Mutex<Vec<Access>>,
}

impl SimBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Set a register without logging an access.
    pub(crate) fn poke(&self, addr: u32, value: u32) {
        self.regs.lock().unwrap().insert(addr, value);
    }

    pub(crate) fn peek(&self, addr: u32) -> u32 {
        self.regs.lock().unwrap().get(&addr).copied().unwrap_or(0)
    }

    pub(crate) fn self_clearing(&self, addr: u32, mask: u32) {
        self.self_clearing.lock().unwrap().insert(addr, mask);
    }

    pub(crate) fn log(&self) -> Vec<Access> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    pub(crate) fn reads_of(&self, addr: u32) -> usize {
        self.log()
            .iter()
            .filter(|a| **a == Access::Read(addr))
            .count()
    }

    /// Values written to `addr`, before any self-clearing.
    pub(crate) fn writes_to(&self, addr: u32) -> Vec<u32> {
        self.log()
            .iter()
            .filter_map(|a| match a {
                Access::Write(a, v) if *a == addr => Some(*v),
                _ => None,
            })
            .collect()
    }
}

impl RegisterBus for SimBus {
    fn read32(&self, addr: u32) -> u32 {
        self.log.lock().unwrap().push(Access::Read(addr));
        self.peek(addr)
    }

    fn write32(&self, addr: u32, value: u32) {
        self.log.lock().unwrap().push(Access::Write(addr, value));
        let clear = self
            .self_clearing
            .lock()
            .unwrap()
            .get(&addr)
            .copied()
            .unwrap_or(0);
        self.poke(addr, value & !clear);
    }
}

/// DMA region backed by a heap buffer.
pub(crate) struct HeapRegion {
    mem: Vec<u8>,
    phys: u32,
}

impl HeapRegion {
    pub(crate) fn new(len: usize, phys: u32) -> Self {
        Self {
            mem: vec![0; len],
            phys,
        }
    }

    pub(crate) fn for_layout(layout: &Layout) -> Self {
        Self::new(layout.size(), 0x0100_0000)
    }
}

impl DmaRegion for HeapRegion {
    fn len(&self) -> usize {
        self.mem.len()
    }

    fn phys_base(&self) -> u32 {
        self.phys
    }

    fn read(&self, offset: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.mem[offset..offset + buf.len()]);
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        self.mem[offset..offset + data.len()].copy_from_slice(data);
    }
}

/// What the engine does after receiving into RX `slot`: payload into the buffer, length and
/// tag into the header, ownership back to software.
pub(crate) fn hw_complete_rx<M: DmaRegion + ?Sized>(
    mem: &mut M,
    ring: &DescriptorRing,
    slot: usize,
    payload: &[u8],
    tag: [u16; 5],
) {
    let mut h = ring.read_header(mem, slot);
    mem.write(ring.buffer_offset(slot), payload);
    h.len = payload.len() as u16;
    h.tag = tag;
    mem.write(ring.header_offset(slot), bytemuck::bytes_of(&h));
    let word = ring.word(mem, slot);
    mem.write_word(ring.word_offset(slot), word & !OWNED_BY_DEVICE);
}

/// What the engine does after sending TX `slot`.
pub(crate) fn hw_complete_tx<M: DmaRegion + ?Sized>(
    mem: &mut M,
    ring: &DescriptorRing,
    slot: usize,
) {
    let word = ring.word(mem, slot);
    mem.write_word(ring.word_offset(slot), word & !OWNED_BY_DEVICE);
}

/// Counts requested delay instead of sleeping.
#[derive(Default)]
pub(crate) struct NoDelay {
    pub(crate) total_ns: u64,
}

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }
}

/// A device opened on a fresh register file. The reset bit clears itself; nothing else does.
pub(crate) fn running_device(config: Config) -> Device<SimBus, HeapRegion, NoDelay> {
    let bus = SimBus::new();
    let m = config.family.register_map();
    bus.self_clearing(m.rst_glb_ctrl(), m.dma_reset());
    bus.self_clearing(0x1180, 1 << 17);
    let region = HeapRegion::for_layout(&Layout::from_config(&config));
    let dev = Device::new(bus, config, region, NoDelay::default()).unwrap();
    dev.open(&mut NoDelay::default()).unwrap();
    dev
}
