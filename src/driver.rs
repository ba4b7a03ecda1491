use alloc::vec::Vec;

use embedded_hal::delay::DelayNs;

use crate::arena::DmaRegion;
use crate::config::Config;
use crate::device::RegisterBus;
use crate::dma::{self, DmaEngine, EngineState, Received};
use crate::indirect::IndirectEngine;
use crate::irq::Napi;
use crate::regmap::{ChipFamily, PortId, RegisterMap, Table};
use crate::stats::{self, LinkState, Stats};
use crate::tag;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A bounded poll ran out: indirect transaction or reset wait
    Timeout,
    /// The TX slot is still owned by the engine. Retry later.
    Busy,
    /// Argument outside what the hardware can encode
    Unsupported,
    AllocationFailure,
    UnknownChip {
        model: u16,
    },
    TxPacketTooBig {
        size: usize,
        max: usize,
    },
    /// The DMA engine isn't running
    NotRunning,
    RegionTooSmall {
        size: usize,
        required: usize,
    },
}

/// Upstream consumer of received frames.
pub trait FrameSink {
    fn deliver(&mut self, frame: Vec<u8>);
}

impl<F: FnMut(Vec<u8>)> FrameSink for F {
    fn deliver(&mut self, frame: Vec<u8>) {
        self(frame)
    }
}

/// One switch instance.
///
/// Two locks: the ring lock covers the DMA engine (rings, arena, DMA mask and control
/// registers), the indirect lock covers the PHY and table access registers. Neither is taken
/// while holding the other.
pub struct Device<B, M, D> {
    pub(crate) bus: B,
    pub(crate) map: &'static dyn RegisterMap,
    pub(crate) config: Config,
    pub(crate) dma: spin::Mutex<DmaEngine<M>>,
    pub(crate) indirect: IndirectEngine<D>,
    pub(crate) napi: Napi,
}

impl<B: RegisterBus, M: DmaRegion, D: DelayNs> Device<B, M, D> {
    /// Create a device for a known configuration. Nothing is written to the hardware.
    ///
    /// `delay` is used by indirect transactions to pace their polling.
    pub fn new(bus: B, config: Config, region: M, delay: D) -> Result<Self, Error> {
        config.validate()?;
        let dma = DmaEngine::new(&config, region)?;
        Ok(Self {
            bus,
            map: config.family.register_map(),
            indirect: IndirectEngine::new(
                delay,
                config.indirect_poll_budget,
                config.indirect_poll_delay_us,
            ),
            dma: spin::Mutex::new(dma),
            napi: Napi::new(),
            config,
        })
    }

    /// Detect the chip family and create a device with that family's defaults.
    pub fn probe(bus: B, region: M, delay: D, tag_mode: bool) -> Result<Self, Error> {
        let (family, model) = ChipFamily::detect(&bus)?;
        #[cfg(feature = "defmt")]
        defmt::info!("Found RTL{=u16:x} ({})", model, family);
        #[cfg(not(feature = "defmt"))]
        let _ = model;
        Self::new(bus, Config::new(family).with_tag_mode(tag_mode), region, delay)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn family(&self) -> ChipFamily {
        self.config.family
    }

    pub fn state(&self) -> EngineState {
        self.dma.lock().state()
    }

    /// Bring the DMA engine up.
    ///
    /// This:
    /// - Stops the CPU port and resets the NIC
    /// - Does the family's CPU port setup
    /// - Initialises and installs all rings
    /// - Enables interrupts and both engines
    ///
    /// Does nothing if the engine is already running.
    pub fn open(&self, delay: &mut impl DelayNs) -> Result<(), Error> {
        {
            let mut dma = self.dma.lock();
            if dma.state() == EngineState::Running {
                return Ok(());
            }
            dma.reset_and_configure(&self.bus, delay)?;
        }
        // Table setup polls the indirect engine, keep the interrupt path free meanwhile
        dma::configure_cpu_port_tables(&self.bus, self.map, &self.indirect)?;

        let mut dma = self.dma.lock();
        if dma.state() == EngineState::Running {
            return Ok(());
        }
        dma.setup_rings();
        dma.install_rings(&self.bus);
        self.napi.reset();
        dma.enable_traffic(&self.bus);
        Ok(())
    }

    /// Mask interrupts and stop both engines. Frames still in the rings are abandoned.
    pub fn stop(&self) {
        self.dma.lock().stop(&self.bus);
        self.napi.reset();
    }

    /// TX watchdog: restart the engine with fresh rings.
    pub fn tx_timeout(&self) -> Result<(), Error> {
        let mut dma = self.dma.lock();
        if dma.state() != EngineState::Running {
            return Err(Error::NotRunning);
        }
        #[cfg(feature = "defmt")]
        defmt::warn!("TX timeout, restarting DMA");
        dma.stop(&self.bus);
        dma.setup_rings();
        dma.install_rings(&self.bus);
        dma.enable_traffic(&self.bus);
        dma.counters.tx_timeouts += 1;
        Ok(())
    }

    /// Queue a frame for transmission, optionally forcing its egress port.
    pub fn transmit(&self, frame: &[u8], dest: Option<PortId>) -> Result<(), Error> {
        self.dma.lock().transmit(&self.bus, frame, dest)
    }

    /// Transmit entry for the network stack. In tag mode a trailing port tag is stripped and
    /// picks the egress port.
    pub fn start_xmit(&self, frame: &[u8]) -> Result<(), Error> {
        if self.config.tag_mode {
            if let Some(port) = tag::parse_trailer(frame, self.config.cpu_port) {
                let body = &frame[..frame.len() - tag::TRAILER_LEN];
                return self.transmit(body, Some(port));
            }
        }
        self.transmit(frame, None)
    }

    /// Drain up to `budget` frames from RX ring `ring` into `sink`.
    ///
    /// Frames are delivered outside the ring lock. Returns the number of slots consumed,
    /// dropped frames included.
    pub fn poll_receive(
        &self,
        ring: usize,
        budget: usize,
        sink: &mut impl FrameSink,
    ) -> Result<usize, Error> {
        if budget == 0 {
            return Ok(0);
        }
        if ring >= self.config.rx_rings {
            return Err(Error::Unsupported);
        }
        Ok(self.drain(ring, budget, sink))
    }

    pub(crate) fn drain(&self, ring: usize, budget: usize, sink: &mut impl FrameSink) -> usize {
        let mut work = 0;
        while work < budget {
            let got = self.dma.lock().receive(ring);
            match got {
                Received::Empty => break,
                Received::Frame(f) => sink.deliver(f),
                Received::Dropped => {}
            }
            work += 1;
        }
        if work > 0 {
            self.dma.lock().ack_rx(&self.bus, ring);
        }
        work
    }

    /// Forcibly recycle RX slots the engine has overrun. Returns how many were dropped.
    pub fn cleanup_overflow(&self, ring: usize) -> Result<usize, Error> {
        if ring >= self.config.rx_rings {
            return Err(Error::Unsupported);
        }
        Ok(self.dma.lock().cleanup_overflow(&self.bus, ring))
    }

    pub fn phy_read(&self, port: PortId, page: u16, reg: u8) -> Result<u16, Error> {
        self.indirect.phy_read(&self.bus, self.map, port, page, reg)
    }

    pub fn phy_write(&self, port: PortId, page: u16, reg: u8, value: u16) -> Result<(), Error> {
        self.indirect
            .phy_write(&self.bus, self.map, port, page, reg, value)
    }

    /// Clause 45 read of `devad`/`reg`.
    pub fn mmd_read(&self, port: PortId, devad: u8, reg: u16) -> Result<u16, Error> {
        self.indirect.mmd_read(&self.bus, self.map, port, devad, reg)
    }

    pub fn mmd_write(&self, port: PortId, devad: u8, reg: u16, value: u16) -> Result<(), Error> {
        self.indirect
            .mmd_write(&self.bus, self.map, port, devad, reg, value)
    }

    pub fn table_read(&self, table: Table, index: u16) -> Result<[u32; 2], Error> {
        self.indirect.table_read(&self.bus, self.map, table, index)
    }

    pub fn table_write(&self, table: Table, index: u16, data: [u32; 2]) -> Result<(), Error> {
        self.indirect
            .table_write(&self.bus, self.map, table, index, data)
    }

    /// Set the MAC address the switch uses for the CPU port.
    pub fn set_mac_address(&self, mac: [u8; 6]) {
        let high = u32::from(u16::from_be_bytes([mac[0], mac[1]]));
        let low = u32::from_be_bytes([mac[2], mac[3], mac[4], mac[5]]);
        for &addr in self.map.mac_addr() {
            self.bus.write32(addr, high);
            self.bus.write32(addr + 4, low);
        }
    }

    pub fn link_state(&self, port: PortId) -> Result<LinkState, Error> {
        if port >= self.config.cpu_port {
            return Err(Error::Unsupported);
        }
        Ok(stats::read_link_state(&self.bus, self.map, port))
    }

    /// Read `port`'s hardware MIB counters, in [`stats::MIB_COUNTERS`] order.
    pub fn read_port_mib(&self, port: PortId, out: &mut [u64]) -> Result<usize, Error> {
        if port > self.config.cpu_port {
            return Err(Error::Unsupported);
        }
        Ok(stats::read_mib(&self.bus, self.map, port, out))
    }

    pub fn stats(&self) -> Stats {
        Stats {
            counters: self.dma.lock().counters,
            indirect_timeouts: self.indirect.timeouts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Layout;
    use std::sync::Barrier;

    use crate::irq::IrqReturn;
    use crate::sim::{HeapRegion, NoDelay, SimBus, running_device};

    fn maple(config: Config) -> Device<SimBus, HeapRegion, NoDelay> {
        running_device(config)
    }

    #[test]
    fn probe_picks_family() {
        let bus = SimBus::new();
        bus.poke(0x0ff0, 0x8391_0000);
        let c = Config::new(ChipFamily::Rtl839x);
        let region = HeapRegion::for_layout(&Layout::from_config(&c));
        let dev = Device::probe(bus, region, NoDelay::default(), false).unwrap();
        assert_eq!(dev.family(), ChipFamily::Rtl839x);
        assert_eq!(dev.config().cpu_port, 52);
        assert_eq!(dev.state(), EngineState::Uninitialized);
    }

    #[test]
    fn probe_refuses_unknown_chip() {
        let r = Device::probe(
            SimBus::new(),
            HeapRegion::new(16, 0),
            NoDelay::default(),
            false,
        );
        assert_eq!(r.err(), Some(Error::UnknownChip { model: 0 }));
    }

    #[test]
    fn open_runs_engine() {
        let dev = maple(Config::new(ChipFamily::Rtl838x));
        assert_eq!(dev.state(), EngineState::Running);
        assert_eq!(dev.bus.peek(0x9f58) & 0xc, 0xc);
    }

    #[test]
    fn budget_zero_touches_nothing() {
        let dev = maple(Config::new(ChipFamily::Rtl838x));
        dev.dma.lock().hw_rx(0, 0, &[1u8; 64], [0; 5]);
        dev.bus.clear_log();
        let mut sink = |_: Vec<u8>| {};

        assert_eq!(dev.poll_receive(0, 0, &mut sink), Ok(0));
        assert!(dev.bus.log().is_empty());
        let dma = dev.dma.lock();
        let r = dma.rx_ring(0).unwrap();
        assert_eq!(r.cursor(), 0);
        assert!(!r.is_owned_by_device(dma.region(), 0));
    }

    #[test]
    fn drains_slot_five_of_thirty_two() {
        let dev = maple(Config::new(ChipFamily::Rtl838x));
        let mut frames = Vec::new();
        for s in 0..5 {
            dev.dma.lock().hw_rx(0, s, &[0u8; 64], [0; 5]);
        }
        assert_eq!(dev.poll_receive(0, 5, &mut |f: Vec<u8>| frames.push(f)), Ok(5));
        frames.clear();

        dev.dma.lock().hw_rx(0, 5, &[0x5a; 64], [0; 5]);
        assert_eq!(dev.poll_receive(0, 1, &mut |f: Vec<u8>| frames.push(f)), Ok(1));
        assert_eq!(frames, vec![vec![0x5a; 60]]);

        let dma = dev.dma.lock();
        let r = dma.rx_ring(0).unwrap();
        assert_eq!(r.slots(), 32);
        assert!(r.is_owned_by_device(dma.region(), 5));
        assert_eq!(r.read_header(dma.region(), 5).len, 0);
        assert_eq!(r.cursor(), 6);
    }

    #[test]
    fn drain_stops_at_device_owned_slot_and_acks() {
        let dev = maple(Config::new(ChipFamily::Rtl838x));
        dev.bus.poke(0xb7e8, 3);
        for s in 0..3 {
            dev.dma.lock().hw_rx(2, s, &[s as u8; 100], [0; 5]);
        }
        let mut frames = Vec::new();
        assert_eq!(dev.poll_receive(2, 64, &mut |f: Vec<u8>| frames.push(f)), Ok(3));
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2], vec![2u8; 96]);
        assert_eq!(dev.bus.writes_to(0xb7e8), vec![3]);

        assert_eq!(dev.poll_receive(2, 64, &mut |f: Vec<u8>| frames.push(f)), Ok(0));
        assert_eq!(dev.bus.writes_to(0xb7e8), vec![3]);
    }

    #[test]
    fn poll_rejects_unknown_ring() {
        let dev = maple(Config::new(ChipFamily::Rtl838x));
        let mut sink = |_: Vec<u8>| {};
        assert_eq!(dev.poll_receive(8, 1, &mut sink), Err(Error::Unsupported));
        assert_eq!(dev.cleanup_overflow(8), Err(Error::Unsupported));
    }

    #[test]
    fn full_tx_ring_is_busy_with_counters_unchanged() {
        let dev = maple(Config::new(ChipFamily::Rtl838x));
        for _ in 0..20 {
            dev.transmit(&[0u8; 60], None).unwrap();
        }
        let before = dev.stats();
        assert_eq!(before.counters.tx_packets, 20);
        assert_eq!(dev.transmit(&[0u8; 60], Some(1)), Err(Error::Busy));
        assert_eq!(dev.stats(), before);

        dev.dma.lock().hw_tx_done(0, 0);
        assert_eq!(dev.transmit(&[0u8; 60], Some(1)), Ok(()));
    }

    #[test]
    fn start_xmit_uses_trailer_in_tag_mode() {
        let dev = maple(Config::new(ChipFamily::Rtl838x).with_tag_mode(true));
        let mut frame = vec![0x11u8; 100];
        frame.extend_from_slice(&tag::encode_trailer(17));
        dev.start_xmit(&frame).unwrap();

        let dma = dev.dma.lock();
        let h = dma.tx_ring(0).unwrap().read_header(dma.region(), 0);
        assert_eq!(h.len, 104);
        assert_eq!(h.tag, [0x0400, 0x0200, 0, 1 << 1, 0]);
    }

    #[test]
    fn start_xmit_without_tag_mode_sends_frame_as_is() {
        let dev = maple(Config::new(ChipFamily::Rtl838x));
        let mut frame = vec![0x11u8; 100];
        frame.extend_from_slice(&tag::encode_trailer(17));
        dev.start_xmit(&frame).unwrap();

        let dma = dev.dma.lock();
        let h = dma.tx_ring(0).unwrap().read_header(dma.region(), 0);
        assert_eq!(h.len, 108);
        assert_eq!(h.tag, [0; 5]);
    }

    #[test]
    fn tx_timeout_restarts_with_fresh_rings() {
        let dev = maple(Config::new(ChipFamily::Rtl838x));
        for _ in 0..3 {
            dev.transmit(&[0u8; 60], None).unwrap();
        }
        dev.tx_timeout().unwrap();
        assert_eq!(dev.state(), EngineState::Running);
        assert_eq!(dev.stats().counters.tx_timeouts, 1);

        let dma = dev.dma.lock();
        let tx = dma.tx_ring(0).unwrap();
        assert_eq!(tx.cursor(), 0);
        assert!(!tx.is_owned_by_device(dma.region(), 0));
    }

    #[test]
    fn stop_then_open_again() {
        let dev = maple(Config::new(ChipFamily::Rtl838x));
        dev.stop();
        assert_eq!(dev.state(), EngineState::Stopped);
        assert_eq!(dev.transmit(&[0u8; 60], None), Err(Error::NotRunning));
        assert_eq!(dev.tx_timeout(), Err(Error::NotRunning));
        dev.open(&mut NoDelay::default()).unwrap();
        assert_eq!(dev.state(), EngineState::Running);
    }

    #[test]
    fn cypress_transmit_carries_port_mask() {
        let dev = running_device(Config::new(ChipFamily::Rtl839x));
        dev.transmit(&[0x11u8; 100], Some(49)).unwrap();
        dev.transmit(&[0x11u8; 100], Some(0)).unwrap();

        let dma = dev.dma.lock();
        let tx = dma.tx_ring(0).unwrap();
        let h = tx.read_header(dma.region(), 0);
        assert_eq!(h.len, 104);
        assert_eq!(h.tag, [0x0100, 1 << 1, 0, 0, 0]);
        assert_eq!(tx.read_header(dma.region(), 1).tag, [0x0100, 0, 0, 0, 1]);
        assert!(tx.is_owned_by_device(dma.region(), 1));
        let doorbell = dev.map.dma_tx_doorbell();
        assert_eq!(dev.bus.peek(dev.map.dma_if_ctrl()) & doorbell, doorbell);
    }

    #[test]
    fn cypress_receive_decodes_six_bit_source_port() {
        let dev = running_device(Config::new(ChipFamily::Rtl839x).with_tag_mode(true));
        dev.dma.lock().hw_rx(0, 0, &[0x22u8; 100], [0xffe5, 0, 0, 0, 0]);

        let mut frames = Vec::new();
        assert_eq!(dev.poll_receive(0, 8, &mut |f: Vec<u8>| frames.push(f)), Ok(1));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 100);
        assert_eq!(&frames[0][96..], &[0x80, 37, 0x10, 0]);
        assert_eq!(tag::parse_trailer(&frames[0], 52), Some(37));
    }

    /// Parks the first indirect poll until the test thread has had a look around.
    struct Gate<'a> {
        barrier: &'a Barrier,
        armed: bool,
    }

    impl DelayNs for Gate<'_> {
        fn delay_ns(&mut self, _ns: u32) {
            if self.armed {
                self.armed = false;
                self.barrier.wait();
                self.barrier.wait();
            }
        }
    }

    #[test]
    fn table_bringup_leaves_ring_lock_free() {
        let config = Config::new(ChipFamily::Rtl839x);
        let m = config.family.register_map();
        let bus = SimBus::new();
        bus.self_clearing(m.rst_glb_ctrl(), m.dma_reset());
        let region = HeapRegion::for_layout(&Layout::from_config(&config));
        let barrier = Barrier::new(2);
        let gate = Gate {
            barrier: &barrier,
            armed: true,
        };
        let dev = Device::new(bus, config, region, gate).unwrap();

        std::thread::scope(|s| {
            let opener = s.spawn(|| dev.open(&mut NoDelay::default()));
            // open is now polling the table engine
            barrier.wait();
            let ring_lock_free = dev.dma.try_lock().is_some();
            let irq = dev.handle_interrupt();
            dev.bus.self_clearing(0x1180, 1 << 17);
            dev.bus.poke(0x1180, 0);
            barrier.wait();

            assert!(ring_lock_free);
            assert_eq!(irq, IrqReturn::None);
            assert_eq!(opener.join().unwrap(), Ok(()));
        });
        assert_eq!(dev.state(), EngineState::Running);
        assert_eq!(dev.bus.peek(0x1184), 1 << 31);
    }

    #[test]
    fn indirect_timeouts_show_in_stats() {
        let dev = maple(Config::new(ChipFamily::Rtl838x));
        assert_eq!(dev.phy_read(0, 0, 1), Err(Error::Timeout));
        assert_eq!(dev.stats().indirect_timeouts, 1);
        assert_eq!(dev.phy_read(28, 0, 1), Err(Error::Unsupported));
        assert_eq!(dev.stats().indirect_timeouts, 1);
    }

    #[test]
    fn mac_address_goes_to_every_register_pair() {
        let dev = maple(Config::new(ChipFamily::Rtl838x));
        dev.set_mac_address([0x00, 0xe0, 0x4c, 0x83, 0x80, 0x01]);
        for base in [0xa9ec, 0x6b04, 0xa320] {
            assert_eq!(dev.bus.peek(base), 0x00e0);
            assert_eq!(dev.bus.peek(base + 4), 0x4c83_8001);
        }
    }

    #[test]
    fn link_state_rejects_cpu_port() {
        let dev = maple(Config::new(ChipFamily::Rtl838x));
        assert_eq!(dev.link_state(28), Err(Error::Unsupported));
        assert!(dev.link_state(0).is_ok());
        let mut out = [0u64; 46];
        assert_eq!(dev.read_port_mib(28, &mut out), Ok(46));
        assert_eq!(dev.read_port_mib(29, &mut out), Err(Error::Unsupported));
    }
}
