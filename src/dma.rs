//! The CPU port DMA engine: reset, ring installation, transmit, receive and overflow recovery.
//!
//! Everything in here runs under the device's ring lock, except [`configure_cpu_port_tables`].

use alloc::vec::Vec;

use embedded_hal::delay::DelayNs;

use crate::arena::{DmaRegion, Layout, RING_BUFFER};
use crate::config::Config;
use crate::device::{RawWord, RegisterBus};
use crate::device::field_sets::DmaIntr;
use crate::driver::Error;
use crate::indirect::IndirectEngine;
use crate::regmap::{Bringup, PortId, RegisterMap, mac_port_crc_err_allow, mac_port_txrx};
use crate::ring::DescriptorRing;
use crate::stats::Counters;
use crate::tag;

/// Frames shorter than this are padded before the FCS is added.
pub const MIN_FRAME_LEN: usize = 64;
pub const FCS_LEN: usize = 4;
/// Largest frame `transmit` accepts.
pub const MAX_FRAME_LEN: usize = RING_BUFFER - FCS_LEN;

const RESET_POLL_BUDGET: u32 = 10_000;
const RESET_POLL_DELAY_US: u32 = 20;
/// DMA_IF_CTRL reads before ringing the TX doorbell
const TX_READY_POLLS: u32 = 10;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineState {
    Uninitialized,
    /// Reset done, rings not yet installed
    Reset,
    /// Rings installed, traffic off
    Configured,
    Running,
    Stopped,
}

/// Outcome of looking at one RX slot.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Received {
    /// Nothing pending at the cursor
    Empty,
    Frame(Vec<u8>),
    /// Slot consumed, frame discarded
    Dropped,
}

/// Interrupt status/mask word with the given per-ring class bits.
pub(crate) fn intr_word(rx_overflow: u8, rx_done: u8, tx_done: u8) -> u32 {
    let mut w = DmaIntr::new_zero();
    w.set_rx_overflow(rx_overflow);
    w.set_rx_done(rx_done);
    w.set_tx_done(tx_done);
    w.to_word()
}

fn alloc_frame(len: usize) -> Result<Vec<u8>, Error> {
    let mut frame = Vec::new();
    frame
        .try_reserve_exact(len)
        .map_err(|_| Error::AllocationFailure)?;
    frame.resize(len, 0);
    Ok(frame)
}

fn ring_bits(rings: usize) -> u8 {
    ((1u16 << rings) - 1) as u8
}

/// The part of the CPU port bring-up that lives in switch tables. Must not run under the ring
/// lock: the table engine may keep the caller polling for its whole budget.
pub fn configure_cpu_port_tables<B, E>(
    bus: &B,
    map: &dyn RegisterMap,
    indirect: &IndirectEngine<E>,
) -> Result<(), Error>
where
    B: RegisterBus + ?Sized,
    E: DelayNs,
{
    if let Bringup::FloodPortmask {
        table,
        index,
        word,
        bit,
    } = map.cpu_port_bringup()
    {
        indirect.table_modify(bus, map, table, index, |d| d[word] |= bit)?;
    }
    Ok(())
}

pub struct DmaEngine<M> {
    map: &'static dyn RegisterMap,
    region: M,
    rx: Vec<DescriptorRing>,
    tx: Vec<DescriptorRing>,
    state: EngineState,
    cpu_port: PortId,
    tag_mode: bool,
    settle_ms: u32,
    pub(crate) counters: Counters,
}

impl<M: DmaRegion> DmaEngine<M> {
    pub fn new(config: &Config, region: M) -> Result<Self, Error> {
        let layout = Layout::from_config(config);
        let required = layout.size();
        if region.len() < required {
            return Err(Error::RegionTooSmall {
                size: region.len(),
                required,
            });
        }
        if region.phys_base() % 4 != 0 || region.phys_base().checked_add(required as u32).is_none()
        {
            return Err(Error::Unsupported);
        }
        Ok(Self {
            map: config.family.register_map(),
            rx: (0..layout.rx_rings)
                .map(|r| DescriptorRing::rx(&layout, r))
                .collect(),
            tx: (0..layout.tx_rings)
                .map(|r| DescriptorRing::tx(&layout, r))
                .collect(),
            region,
            state: EngineState::Uninitialized,
            cpu_port: config.cpu_port,
            tag_mode: config.tag_mode,
            settle_ms: config.reset_settle_ms,
            counters: Counters::default(),
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn region(&self) -> &M {
        &self.region
    }

    pub fn rx_ring(&self, ring: usize) -> Option<&DescriptorRing> {
        self.rx.get(ring)
    }

    pub fn tx_ring(&self, ring: usize) -> Option<&DescriptorRing> {
        self.tx.get(ring)
    }

    pub fn rx_ring_bits(&self) -> u8 {
        ring_bits(self.rx.len())
    }

    pub fn tx_ring_bits(&self) -> u8 {
        ring_bits(self.tx.len())
    }

    /// Quiesce the CPU port, reset the NIC and redo the family's CPU port register setup.
    ///
    /// Setup that goes through the table engine is left to [`configure_cpu_port_tables`], to
    /// be run once the ring lock is released.
    pub fn reset_and_configure<B, D>(&mut self, bus: &B, delay: &mut D) -> Result<(), Error>
    where
        B: RegisterBus + ?Sized,
        D: DelayNs,
    {
        let m = self.map;
        let port_ctrl = m.mac_port_ctrl(self.cpu_port);
        self.state = EngineState::Reset;

        // Stop TX/RX to the CPU port and let in-flight frames drain
        bus.write32_masked(port_ctrl, mac_port_txrx(), 0);
        delay.delay_ms(self.settle_ms);

        let saved = bus.read32(m.dma_if_intr_msk()) & m.preserved_intr_mask();
        bus.write32(m.rst_glb_ctrl(), m.dma_reset());
        delay.delay_ms(self.settle_ms);

        let mut done = false;
        for _ in 0..RESET_POLL_BUDGET {
            if bus.read32(m.rst_glb_ctrl()) & m.dma_reset() == 0 {
                done = true;
                break;
            }
            delay.delay_us(RESET_POLL_DELAY_US);
        }
        if !done {
            #[cfg(feature = "defmt")]
            defmt::error!("DMA reset did not complete");
            return Err(Error::Timeout);
        }

        bus.write32_masked(m.dma_if_intr_msk(), m.preserved_intr_mask(), saved);
        bus.write32_masked(port_ctrl, 0, mac_port_txrx());

        if let Bringup::ForceMode(v) = m.cpu_port_bringup() {
            bus.write32(m.mac_force_mode_ctrl(self.cpu_port), v);
            bus.write32_masked(port_ctrl, 0, mac_port_crc_err_allow());
        }
        #[cfg(feature = "defmt")]
        defmt::debug!("DMA reset complete");
        Ok(())
    }

    /// Initialise every ring in the arena. Cursors go back to slot 0.
    pub fn setup_rings(&mut self) {
        for r in self.rx.iter_mut().chain(self.tx.iter_mut()) {
            r.init(&mut self.region);
        }
    }

    /// Point the engine at the rings.
    pub fn install_rings<B: RegisterBus + ?Sized>(&mut self, bus: &B) {
        for (i, r) in self.rx.iter().enumerate() {
            bus.write32(self.map.dma_rx_base(i), r.base_phys(&self.region));
        }
        for (i, r) in self.tx.iter().enumerate() {
            bus.write32(self.map.dma_tx_base(i), r.base_phys(&self.region));
        }
        self.state = EngineState::Configured;
    }

    pub fn enable_traffic<B: RegisterBus + ?Sized>(&mut self, bus: &B) {
        let m = self.map;
        // No head-of-line blocking on any RX ring
        for r in (0..self.rx.len()).step_by(8) {
            bus.write32(m.dma_if_rx_ring_size(r), u32::MAX);
        }
        bus.write32(m.dma_if_ctrl(), m.dma_if_ctrl_setup(RING_BUFFER as u16));

        let all = intr_word(0xff, 0xff, 0xf);
        let rx = self.rx_ring_bits();
        bus.write32(m.dma_if_intr_sts(), all);
        bus.write32_masked(m.dma_if_intr_msk(), all, intr_word(rx, rx, self.tx_ring_bits()));

        bus.write32_masked(m.dma_if_ctrl(), 0, m.dma_rxtx_enable());
        self.state = EngineState::Running;
    }

    /// Mask everything, clear pending status, turn both engines off.
    pub fn stop<B: RegisterBus + ?Sized>(&mut self, bus: &B) {
        let m = self.map;
        bus.write32(m.dma_if_intr_msk(), 0);
        bus.write32(m.dma_if_intr_sts(), u32::MAX);
        bus.write32(m.dma_if_ctrl(), 0);
        self.state = EngineState::Stopped;
    }

    /// Queue one frame on TX ring 0 and ring the doorbell.
    ///
    /// `dest` steers the frame to a front port; `None` leaves forwarding to the switch.
    pub fn transmit<B: RegisterBus + ?Sized>(
        &mut self,
        bus: &B,
        frame: &[u8],
        dest: Option<PortId>,
    ) -> Result<(), Error> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(Error::TxPacketTooBig {
                size: frame.len(),
                max: MAX_FRAME_LEN,
            });
        }
        if dest.is_some_and(|p| p >= self.cpu_port) {
            return Err(Error::Unsupported);
        }
        if self.state != EngineState::Running {
            return Err(Error::NotRunning);
        }

        let m = self.map;
        let ring = &mut self.tx[0];
        let Some(mut slot) = ring.claim_tx(&self.region) else {
            #[cfg(feature = "defmt")]
            defmt::warn!("TX ring full");
            return Err(Error::Busy);
        };

        let len = frame.len().max(MIN_FRAME_LEN) + FCS_LEN;
        self.region.write(slot.data, frame);
        self.region
            .fill(slot.data + frame.len(), len - frame.len(), 0);

        slot.header.size = len as u16;
        slot.header.len = len as u16;
        if let Some(port) = dest {
            slot.header.tag = m.tx_tag(port);
        }
        ring.submit_tx(&mut self.region, &slot.header);

        // The engine can miss a doorbell rung while it is still coming up
        let ready = m.dma_rxtx_enable();
        for _ in 0..TX_READY_POLLS {
            if bus.read32(m.dma_if_ctrl()) & ready == ready {
                break;
            }
        }
        bus.write32_masked(m.dma_if_ctrl(), 0, m.dma_tx_doorbell());

        self.counters.tx_packets += 1;
        self.counters.tx_bytes += len as u64;
        Ok(())
    }

    /// Take the frame at `ring`'s cursor, if the engine has filled it, and give the slot back.
    pub fn receive(&mut self, ring: usize) -> Received {
        if self.state != EngineState::Running {
            return Received::Empty;
        }
        let Some(r) = self.rx.get_mut(ring) else {
            return Received::Empty;
        };
        let Some(slot) = r.claim_rx(&self.region) else {
            return Received::Empty;
        };
        // Handed back but not written yet
        if slot.len == 0 {
            return Received::Empty;
        }

        let hw_len = slot.len as usize;
        let in_buffer = slot.data - r.buffer_offset(slot.slot) + hw_len <= RING_BUFFER;
        // Nothing but FCS is a runt, trailer or not
        if hw_len <= FCS_LEN || !in_buffer {
            #[cfg(feature = "defmt")]
            defmt::warn!("RX ring {=usize} slot {=usize}: bad length {=usize}", ring, slot.slot, hw_len);
            r.recycle_rx(&mut self.region);
            self.counters.rx_dropped += 1;
            return Received::Dropped;
        }

        // Tag mode keeps the FCS bytes and overwrites them with the trailer
        let len = if self.tag_mode { hw_len } else { hw_len - FCS_LEN };
        let mut frame = match alloc_frame(len) {
            Ok(f) => f,
            Err(_) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("RX ring {=usize}: no memory for {=usize} byte frame", ring, len);
                r.recycle_rx(&mut self.region);
                self.counters.rx_dropped += 1;
                return Received::Dropped;
            }
        };
        self.region.read(slot.data, &mut frame);
        if self.tag_mode {
            let port = self.map.rx_source_port(&slot.tag);
            frame[len - tag::TRAILER_LEN..].copy_from_slice(&tag::encode_trailer(port));
        }
        r.recycle_rx(&mut self.region);

        self.counters.rx_packets += 1;
        self.counters.rx_bytes += len as u64;
        Received::Frame(frame)
    }

    /// Acknowledge the frames taken from `ring` to the engine.
    pub fn ack_rx<B: RegisterBus + ?Sized>(&self, bus: &B, ring: usize) {
        let addr = self.map.dma_if_rx_ring_cntr(ring);
        bus.write32(addr, bus.read32(addr));
    }

    /// Give back every slot between the cursor and the engine's current position, dropping
    /// their contents. Returns how many slots were recycled.
    pub fn cleanup_overflow<B: RegisterBus + ?Sized>(&mut self, bus: &B, ring: usize) -> usize {
        let Some(r) = self.rx.get_mut(ring) else {
            return 0;
        };
        let cur = bus.read32(self.map.dma_if_rx_cur(ring));
        let Some(stop) = r.slot_at(&self.region, cur) else {
            #[cfg(feature = "defmt")]
            defmt::warn!("RX ring {=usize}: engine position {=u32:#x} outside ring", ring, cur);
            return 0;
        };

        let mut n = 0;
        while r.cursor() != stop && n < r.slots() {
            r.recycle_rx(&mut self.region);
            n += 1;
        }
        self.counters.rx_dropped += n as u64;
        #[cfg(feature = "defmt")]
        defmt::debug!("RX ring {=usize}: overflow, dropped {=usize} slots", ring, n);
        n
    }
}

#[cfg(test)]
impl<M: DmaRegion> DmaEngine<M> {
    /// Play the engine's part: fill RX `slot` of `ring` and hand it back to software.
    pub(crate) fn hw_rx(&mut self, ring: usize, slot: usize, payload: &[u8], tag: [u16; 5]) {
        crate::sim::hw_complete_rx(&mut self.region, &self.rx[ring], slot, payload, tag);
    }

    pub(crate) fn hw_tx_done(&mut self, ring: usize, slot: usize) {
        crate::sim::hw_complete_tx(&mut self.region, &self.tx[ring], slot);
    }
}
