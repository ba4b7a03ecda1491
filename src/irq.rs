//! Interrupt dispatch and the deferred receive pass.
//!
//! The handler is the top half: it acknowledges what it saw, recovers overflowed rings on the
//! spot and hands RX work to [`Napi`]. The platform then calls [`Device::run_deferred`] from
//! its soft-interrupt context to drain the rings.

use core::sync::atomic::{AtomicU8, Ordering};

use embedded_hal::delay::DelayNs;

use crate::arena::DmaRegion;
use crate::device::field_sets::DmaIntr;
use crate::device::{RawWord, RegisterBus};
use crate::dma::{EngineState, intr_word};
use crate::driver::{Device, FrameSink};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IrqReturn {
    /// Not ours
    None,
    Handled,
}

/// Interrupt causes, one bit per ring in each class.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IrqClasses {
    pub rx_overflow: u8,
    pub rx_done: u8,
    pub tx_done: u8,
}

impl IrqClasses {
    pub fn decode(status: u32) -> Self {
        let s = DmaIntr::from_word(status);
        Self {
            rx_overflow: s.rx_overflow(),
            rx_done: s.rx_done(),
            tx_done: s.tx_done(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rx_overflow == 0 && self.rx_done == 0 && self.tx_done == 0
    }
}

const SCHEDULED: u8 = 1 << 0;
/// Scheduled again while a pass was pending or running
const MISSED: u8 = 1 << 1;

/// Deferred receive scheduling.
///
/// Scheduled by the interrupt handler with RX-done interrupts masked; completed by the poll
/// pass that finds the rings empty, which unmasks them again. A schedule that lands while a
/// pass is already pending is remembered, and the pass may not complete until it has gone
/// over the rings once more.
pub struct Napi {
    state: AtomicU8,
}

impl Napi {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(0),
        }
    }

    /// Returns false if a pass was already pending.
    pub fn schedule(&self) -> bool {
        let prev = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                Some(if s & SCHEDULED != 0 { s | MISSED } else { SCHEDULED })
            })
            .unwrap_or_else(|s| s);
        prev & SCHEDULED == 0
    }

    pub fn is_scheduled(&self) -> bool {
        self.state.load(Ordering::Acquire) & SCHEDULED != 0
    }

    /// Finish the pending pass. Returns false, leaving it scheduled, if another schedule came
    /// in since the last call.
    pub fn complete(&self) -> bool {
        let prev = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                Some(if s & MISSED != 0 { SCHEDULED } else { 0 })
            })
            .unwrap_or_else(|s| s);
        prev & MISSED == 0
    }

    /// Drop whatever is pending.
    pub fn reset(&self) {
        self.state.store(0, Ordering::Release);
    }
}

impl Default for Napi {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: RegisterBus, M: DmaRegion, D: DelayNs> Device<B, M, D> {
    /// Interrupt handler. Reads the status register once and deals with every class in it.
    pub fn handle_interrupt(&self) -> IrqReturn {
        let sts = self.map.dma_if_intr_sts();
        let irq = IrqClasses::decode(self.bus.read32(sts));
        if irq.is_empty() {
            return IrqReturn::None;
        }
        let mut dma = self.dma.lock();

        if irq.tx_done != 0 {
            self.bus.write32(sts, intr_word(0, 0, irq.tx_done));
        }

        if irq.rx_done != 0 {
            // Stay quiet until the deferred pass has caught up
            self.bus
                .write32_masked(self.map.dma_if_intr_msk(), intr_word(0, 0xff, 0), 0);
            self.bus.write32(sts, intr_word(0, irq.rx_done, 0));
            self.napi.schedule();
        }

        if irq.rx_overflow != 0 {
            self.bus.write32(sts, intr_word(irq.rx_overflow, 0, 0));
            dma.counters.rx_overflows += 1;
            for ring in 0..self.config.rx_rings {
                if irq.rx_overflow & (1 << ring) != 0 {
                    dma.cleanup_overflow(&self.bus, ring);
                }
            }
        }
        IrqReturn::Handled
    }

    /// Deferred receive over all RX rings, at most `budget` frames.
    ///
    /// If the rings ran dry before the budget did, the pass completes and RX-done interrupts
    /// are unmasked again. An interrupt taken while the pass was running sends it round the
    /// rings once more first.
    pub fn napi_poll(&self, budget: usize, sink: &mut impl FrameSink) -> usize {
        let mut work = 0;
        loop {
            for ring in 0..self.config.rx_rings {
                if work >= budget {
                    break;
                }
                work += self.drain(ring, budget - work, sink);
            }
            if work >= budget || self.napi.complete() {
                break;
            }
        }

        if work < budget {
            let dma = self.dma.lock();
            if dma.state() == EngineState::Running {
                let rx = dma.rx_ring_bits();
                self.bus
                    .write32_masked(self.map.dma_if_intr_msk(), 0, intr_word(0, rx, 0));
            }
        }
        work
    }

    /// Run the pending receive pass, if any, with the configured budget.
    pub fn run_deferred(&self, sink: &mut impl FrameSink) -> usize {
        if !self.napi.is_scheduled() {
            return 0;
        }
        self.napi_poll(self.config.napi_budget, sink)
    }

    pub fn rx_pending(&self) -> bool {
        self.napi.is_scheduled()
    }
}
