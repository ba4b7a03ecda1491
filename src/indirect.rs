//! Indirect access: PHY and MMD registers behind the SMI controller, and switch tables behind
//! the table access controller.
//!
//! Every access follows the same shape: program the data/address registers, write a command
//! word with the execute bit set, poll until hardware clears execute, read back results. One
//! transaction at a time per device; the whole sequence runs under the device's indirect lock.

use core::sync::atomic::{AtomicU32, Ordering};

use embedded_hal::delay::DelayNs;

use crate::device::RegisterBus;
use crate::driver::Error;
use crate::regmap::{PortId, RegisterMap, Table};

const MAX_SETUP: usize = 4;
const MAX_RESULTS: usize = 2;

/// A register write done before the command word.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RegWrite {
    pub addr: u32,
    /// Bits replaced by `set`. All ones means a plain write.
    pub clear: u32,
    pub set: u32,
}

impl RegWrite {
    pub fn full(addr: u32, value: u32) -> Self {
        Self {
            addr,
            clear: u32::MAX,
            set: value,
        }
    }

    pub fn masked(addr: u32, clear: u32, set: u32) -> Self {
        Self { addr, clear, set }
    }

    fn apply<B: RegisterBus + ?Sized>(&self, bus: &B) {
        if self.clear == u32::MAX {
            bus.write32(self.addr, self.set);
        } else {
            bus.write32_masked(self.addr, self.clear, self.set);
        }
    }
}

/// One fully encoded indirect access.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Transaction {
    /// Command register
    pub control: u32,
    /// Execute bit(s) of the command register. Hardware clears them on completion.
    pub execute: u32,
    pub command: u32,
    /// Command register bits carried over from its current value
    pub keep: u32,
    pub setup: [Option<RegWrite>; MAX_SETUP],
    /// Registers read back after completion, in order
    pub results: [Option<u32>; MAX_RESULTS],
}

impl Transaction {
    pub fn new(control: u32, execute: u32, command: u32) -> Self {
        Self {
            control,
            execute,
            command,
            keep: 0,
            setup: [None; MAX_SETUP],
            results: [None; MAX_RESULTS],
        }
    }

    pub fn keep(mut self, mask: u32) -> Self {
        self.keep = mask;
        self
    }

    pub fn setup(mut self, write: RegWrite) -> Self {
        let free = self.setup.iter_mut().find(|s| s.is_none());
        debug_assert!(free.is_some(), "too many setup writes");
        if let Some(slot) = free {
            *slot = Some(write);
        }
        self
    }

    pub fn result(mut self, addr: u32) -> Self {
        let free = self.results.iter_mut().find(|s| s.is_none());
        debug_assert!(free.is_some(), "too many result registers");
        if let Some(slot) = free {
            *slot = Some(addr);
        }
        self
    }
}

/// Serialises indirect transactions of one device.
pub struct IndirectEngine<D> {
    /// The delay doubles as the lock payload: whoever polls holds the lock.
    delay: spin::Mutex<D>,
    poll_budget: u32,
    poll_delay_us: u32,
    timeouts: AtomicU32,
}

impl<D: DelayNs> IndirectEngine<D> {
    pub fn new(delay: D, poll_budget: u32, poll_delay_us: u32) -> Self {
        Self {
            delay: spin::Mutex::new(delay),
            poll_budget,
            poll_delay_us,
            timeouts: AtomicU32::new(0),
        }
    }

    /// Transactions that never saw their execute bit clear.
    pub fn timeouts(&self) -> u32 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Run one transaction and return its result registers (zero where unused).
    pub fn execute<B: RegisterBus + ?Sized>(
        &self,
        bus: &B,
        txn: &Transaction,
    ) -> Result<[u32; MAX_RESULTS], Error> {
        let mut delay = self.delay.lock();
        self.run(bus, &mut *delay, txn)
    }

    fn run<B: RegisterBus + ?Sized>(
        &self,
        bus: &B,
        delay: &mut D,
        txn: &Transaction,
    ) -> Result<[u32; MAX_RESULTS], Error> {
        for w in txn.setup.iter().flatten() {
            w.apply(bus);
        }

        let kept = if txn.keep != 0 {
            bus.read32(txn.control) & txn.keep
        } else {
            0
        };
        bus.write32(txn.control, txn.command | kept | txn.execute);

        let mut done = false;
        for _ in 0..self.poll_budget {
            if bus.read32(txn.control) & txn.execute == 0 {
                done = true;
                break;
            }
            delay.delay_us(self.poll_delay_us);
        }
        if !done {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "defmt")]
            defmt::warn!("indirect access at {=u32:#x} timed out", txn.control);
            return Err(Error::Timeout);
        }

        let mut out = [0u32; MAX_RESULTS];
        for (o, addr) in out.iter_mut().zip(txn.results.iter()) {
            if let Some(addr) = addr {
                *o = bus.read32(*addr);
            }
        }
        Ok(out)
    }

    pub fn phy_read<B: RegisterBus + ?Sized>(
        &self,
        bus: &B,
        map: &dyn RegisterMap,
        port: PortId,
        page: u16,
        reg: u8,
    ) -> Result<u16, Error> {
        let txn = map.phy_read(port, page, reg)?;
        let [data, _] = self.execute(bus, &txn)?;
        Ok(data as u16)
    }

    pub fn phy_write<B: RegisterBus + ?Sized>(
        &self,
        bus: &B,
        map: &dyn RegisterMap,
        port: PortId,
        page: u16,
        reg: u8,
        value: u16,
    ) -> Result<(), Error> {
        let txn = map.phy_write(port, page, reg, value)?;
        self.execute(bus, &txn).map(|_| ())
    }

    pub fn mmd_read<B: RegisterBus + ?Sized>(
        &self,
        bus: &B,
        map: &dyn RegisterMap,
        port: PortId,
        devad: u8,
        reg: u16,
    ) -> Result<u16, Error> {
        let txn = map.mmd_read(port, devad, reg)?;
        let [data, _] = self.execute(bus, &txn)?;
        Ok(data as u16)
    }

    pub fn mmd_write<B: RegisterBus + ?Sized>(
        &self,
        bus: &B,
        map: &dyn RegisterMap,
        port: PortId,
        devad: u8,
        reg: u16,
        value: u16,
    ) -> Result<(), Error> {
        let txn = map.mmd_write(port, devad, reg, value)?;
        self.execute(bus, &txn).map(|_| ())
    }

    pub fn table_read<B: RegisterBus + ?Sized>(
        &self,
        bus: &B,
        map: &dyn RegisterMap,
        table: Table,
        index: u16,
    ) -> Result<[u32; 2], Error> {
        let txn = map.table_read(table, index)?;
        self.execute(bus, &txn)
    }

    pub fn table_write<B: RegisterBus + ?Sized>(
        &self,
        bus: &B,
        map: &dyn RegisterMap,
        table: Table,
        index: u16,
        data: [u32; 2],
    ) -> Result<(), Error> {
        let txn = map.table_write(table, index, data)?;
        self.execute(bus, &txn).map(|_| ())
    }

    /// Read-modify-write of a table entry, holding the lock across both transactions.
    pub fn table_modify<B: RegisterBus + ?Sized>(
        &self,
        bus: &B,
        map: &dyn RegisterMap,
        table: Table,
        index: u16,
        f: impl FnOnce(&mut [u32; 2]),
    ) -> Result<(), Error> {
        let read = map.table_read(table, index)?;
        let mut delay = self.delay.lock();
        let mut data = self.run(bus, &mut *delay, &read)?;
        f(&mut data);
        let write = map.table_write(table, index, data)?;
        self.run(bus, &mut *delay, &write).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regmap::{ChipFamily, TableBank};
    use crate::sim::{NoDelay, SimBus};

    const SMI_CTRL_1: u32 = 0xa1bc;
    const SMI_CTRL_2: u32 = 0xa1c0;

    fn engine() -> IndirectEngine<NoDelay> {
        IndirectEngine::new(NoDelay::default(), 100, 10)
    }

    #[test]
    fn maple_phy_read_encodes_command() {
        let bus = SimBus::new();
        bus.self_clearing(SMI_CTRL_1, 1);
        bus.poke(SMI_CTRL_1, 0x1f << 15);
        bus.poke(SMI_CTRL_2, 0x0000_1234);
        let map = ChipFamily::Rtl838x.register_map();

        let v = engine().phy_read(&bus, map, 3, 2, 9).unwrap();
        assert_eq!(v, 0x1234);
        // Park page survives, execute issued once
        assert_eq!(
            bus.writes_to(SMI_CTRL_1),
            vec![(9 << 20) | (0x1f << 15) | (2 << 3) | 1]
        );
        assert_eq!(bus.writes_to(SMI_CTRL_2), vec![0x0003_1234]);
    }

    #[test]
    fn stuck_execute_bit_times_out_without_data_reads() {
        let bus = SimBus::new();
        let map = ChipFamily::Rtl838x.register_map();
        let e = engine();

        assert_eq!(e.phy_read(&bus, map, 1, 0, 1), Err(Error::Timeout));
        assert_eq!(e.timeouts(), 1);
        // The only read of the data register was the masked setup write's
        assert_eq!(bus.reads_of(SMI_CTRL_2), 1);
        // Park page fetch, then the poll budget
        assert_eq!(bus.reads_of(SMI_CTRL_1), 101);
    }

    #[test]
    fn rejected_arguments_touch_nothing() {
        let bus = SimBus::new();
        let map = ChipFamily::Rtl838x.register_map();
        assert_eq!(
            engine().phy_write(&bus, map, 28, 0, 0, 0),
            Err(Error::Unsupported)
        );
        assert!(bus.log().is_empty());
    }

    #[test]
    fn cypress_phy_write_selects_one_port() {
        let bus = SimBus::new();
        bus.self_clearing(0x03dc, 1);
        bus.poke(0x03e4, 0xffff_ffff);
        bus.poke(0x03e8, 0xffff_ffff);
        let map = ChipFamily::Rtl839x.register_map();

        engine().phy_write(&bus, map, 40, 0, 4, 0xbeef).unwrap();
        assert_eq!(bus.peek(0x03e4), 0);
        assert_eq!(bus.peek(0x03e8), 1 << 8);
        assert_eq!(bus.peek(0x03f0) >> 16, 0xbeef);
        assert_eq!(bus.peek(0x03e0), 0x1ff);
        assert_eq!(bus.writes_to(0x03dc), vec![(4 << 5) | (1 << 3) | 1]);
    }

    #[test]
    fn mmd_read_programs_address() {
        let bus = SimBus::new();
        bus.self_clearing(SMI_CTRL_1, 1);
        bus.poke(SMI_CTRL_2, 0x0000_00aa);
        let map = ChipFamily::Rtl838x.register_map();

        assert_eq!(engine().mmd_read(&bus, map, 5, 7, 0x3c).unwrap(), 0xaa);
        assert_eq!(bus.peek(0xa1c4), (7 << 16) | 0x3c);
        assert_eq!(bus.writes_to(SMI_CTRL_1), vec![0b11]);
    }

    #[test]
    fn table_modify_sets_bit_under_one_lock() {
        let bus = SimBus::new();
        bus.self_clearing(0x1180, 1 << 17);
        bus.poke(0x1184, 0x0000_0001);
        bus.poke(0x1188, 0x0000_0002);
        let map = ChipFamily::Rtl839x.register_map();

        engine()
            .table_modify(&bus, map, Table::CYPRESS_MC_PORTMASK, 0, |d| d[0] |= 1 << 31)
            .unwrap();
        assert_eq!(bus.peek(0x1184), 0x8000_0001);
        assert_eq!(bus.peek(0x1188), 0x0000_0002);
        assert_eq!(bus.writes_to(0x1180), vec![0x28000, 0x38000]);
    }

    /// Remembers which thread made each access.
    struct ThreadTrace {
        bus: SimBus,
        order: std::sync::Mutex<Vec<std::thread::ThreadId>>,
    }

    impl ThreadTrace {
        fn new() -> Self {
            let bus = SimBus::new();
            bus.self_clearing(SMI_CTRL_1, 1);
            Self {
                bus,
                order: Default::default(),
            }
        }

        fn accesses(&self) -> Vec<std::thread::ThreadId> {
            self.order.lock().unwrap().clone()
        }
    }

    impl RegisterBus for ThreadTrace {
        fn read32(&self, addr: u32) -> u32 {
            self.order.lock().unwrap().push(std::thread::current().id());
            self.bus.read32(addr)
        }

        fn write32(&self, addr: u32, value: u32) {
            self.order.lock().unwrap().push(std::thread::current().id());
            self.bus.write32(addr, value)
        }
    }

    #[test]
    fn concurrent_transactions_do_not_interleave() {
        const ROUNDS: usize = 100;
        let map = ChipFamily::Rtl838x.register_map();

        // Accesses per transaction, measured alone
        let t = ThreadTrace::new();
        engine().phy_write(&t, map, 4, 0, 9, 0x1234).unwrap();
        let write_len = t.accesses().len();
        let t = ThreadTrace::new();
        engine().phy_read(&t, map, 7, 0, 2).unwrap();
        let read_len = t.accesses().len();

        let bus = ThreadTrace::new();
        let e = engine();
        let (writer, reader) = std::thread::scope(|s| {
            let w = s.spawn(|| {
                for i in 0..ROUNDS {
                    e.phy_write(&bus, map, 4, 0, 9, i as u16).unwrap();
                }
                std::thread::current().id()
            });
            let r = s.spawn(|| {
                for _ in 0..ROUNDS {
                    e.phy_read(&bus, map, 7, 0, 2).unwrap();
                }
                std::thread::current().id()
            });
            (w.join().unwrap(), r.join().unwrap())
        });

        let order = bus.accesses();
        assert_eq!(order.len(), ROUNDS * (write_len + read_len));
        // Each stretch of one thread's accesses is made of whole transactions
        for run in order.chunk_by(|a, b| a == b) {
            let len = if run[0] == writer {
                write_len
            } else {
                assert_eq!(run[0], reader);
                read_len
            };
            assert_eq!(run.len() % len, 0);
        }
        assert_eq!(e.timeouts(), 0);
    }

    #[test]
    fn table_read_returns_both_words() {
        let bus = SimBus::new();
        bus.self_clearing(0x6914, 1 << 15);
        bus.poke(0x6918, 7);
        bus.poke(0x691c, 9);
        let map = ChipFamily::Rtl838x.register_map();
        let t = Table {
            bank: TableBank::Primary,
            kind: 1,
        };
        assert_eq!(engine().table_read(&bus, map, t, 12).unwrap(), [7, 9]);
    }
}
