use device_driver::FieldSet;

use crate::device::field_sets::{
    CypressDmaIfCtrl, CypressL2TableCtrl, CypressPhyregAccess, CypressTableCtrl, DmaIntr,
    MacPortCtrl, MapleDmaIfCtrl, MapleSmiCtrl, MapleTableCtrl, MmdAddr, ModelInfo, PhyData,
};

/// Raw 32-bit access to the switch register space.
///
/// Addresses are offsets from the switch base (0xBB00_0000 on the SoC). All accesses are
/// aligned 32-bit reads or writes.
pub trait RegisterBus {
    fn read32(&self, addr: u32) -> u32;

    fn write32(&self, addr: u32, value: u32);

    /// Read-modify-write: clears `clear`, then sets `set`.
    ///
    /// Not atomic on its own. Callers hold whichever lock guards the register.
    fn write32_masked(&self, addr: u32, clear: u32, set: u32) {
        let v = self.read32(addr);
        self.write32(addr, (v & !clear) | set);
    }
}

impl<T: RegisterBus + ?Sized> RegisterBus for &T {
    fn read32(&self, addr: u32) -> u32 {
        (**self).read32(addr)
    }

    fn write32(&self, addr: u32, value: u32) {
        (**self).write32(addr, value)
    }

    fn write32_masked(&self, addr: u32, clear: u32, set: u32) {
        (**self).write32_masked(addr, clear, set)
    }
}

/// Memory-mapped register window.
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// Switch register base as seen through KSEG1 on the RTL83xx SoCs.
    pub const SWITCH_BASE: usize = 0xBB00_0000;

    /// # Safety
    ///
    /// `base` must point at the switch register block, mapped uncached, and stay mapped for the
    /// lifetime of the returned value.
    pub unsafe fn new(base: usize) -> Self {
        Self { base }
    }
}

impl RegisterBus for Mmio {
    fn read32(&self, addr: u32) -> u32 {
        // SAFETY: `new` guarantees the window is mapped; every offset is 4-aligned.
        unsafe { core::ptr::read_volatile((self.base + addr as usize) as *const u32) }
    }

    fn write32(&self, addr: u32, value: u32) {
        // SAFETY: see read32.
        unsafe { core::ptr::write_volatile((self.base + addr as usize) as *mut u32, value) }
    }
}

/// Conversion between a raw register word and its fieldset.
pub(crate) trait RawWord: Sized {
    fn from_word(word: u32) -> Self;
    fn to_word(&self) -> u32;
}

macro_rules! raw_word {
    ($($t:ty),* $(,)?) => {
        $(
            impl RawWord for $t {
                fn from_word(word: u32) -> Self {
                    let mut f = <$t>::new_zero();
                    f.get_inner_buffer_mut().copy_from_slice(&word.to_le_bytes());
                    f
                }

                fn to_word(&self) -> u32 {
                    let mut b = [0u8; 4];
                    b.copy_from_slice(self.get_inner_buffer());
                    u32::from_le_bytes(b)
                }
            }
        )*
    };
}

raw_word!(
    DmaIntr,
    MapleDmaIfCtrl,
    CypressDmaIfCtrl,
    MacPortCtrl,
    MapleSmiCtrl,
    CypressPhyregAccess,
    PhyData,
    MmdAddr,
    MapleTableCtrl,
    CypressTableCtrl,
    CypressL2TableCtrl,
    ModelInfo,
);

// None of these are real registers at the addresses below! Register addresses differ between
// the chip families and live in `regmap`. Device driver doesn't currently allow standalone
// fieldsets (https://github.com/diondokter/device-driver/issues/77) so they're declared as
// registers and only the generated field sets are used.
device_driver::create_device!(
    device_name: SwitchFields,
    dsl: {
        config {
            type RegisterAddressType = u8;
            type CommandAddressType = u8;
            type BufferAddressType = u8;
            type DefaultFieldAccess = RW;
            type DefaultByteOrder = LE;
            type DefaultBitOrder = LSB0;
        }
        /// DMA Interface Interrupt Status / Mask
        ///
        /// Status bits are write-1-to-clear. The mask register shares the layout.
        register DmaIntr {
            const ADDRESS = 0x00;
            const SIZE_BITS = 32;

            /// RX ring overrun, one bit per ring
            rx_overflow: uint = 0..=7,
            /// RX done, one bit per ring
            rx_done: uint = 8..=15,
            /// TX done, one bit per ring
            tx_done: uint = 16..=19,
            /// L2 notification (RTL839x only)
            notify: uint = 20..=22,
        },
        /// RTL838x DMA Interface Control
        register MapleDmaIfCtrl {
            const ADDRESS = 0x01;
            const SIZE_BITS = 32;

            /// Received frames are truncated to this many bytes
            rx_trunc_len: uint = 20..=31,
            /// Pad short TX frames
            tx_pad_en: bool = 5,
            tx_en: bool = 3,
            rx_en: bool = 2,
            /// TX doorbell, cleared by the engine once it fetched the ring
            tx_do: bool = 1,
        },
        /// RTL839x DMA Interface Control
        register CypressDmaIfCtrl {
            const ADDRESS = 0x02;
            const SIZE_BITS = 32;

            rx_trunc_len: uint = 16..=29,
            tx_pad_en: bool = 5,
            tx_en: bool = 3,
            rx_en: bool = 2,
            tx_do: bool = 1,
        },
        /// MAC Port Control
        register MacPortCtrl {
            const ADDRESS = 0x03;
            const SIZE_BITS = 32;

            /// Accept frames with a bad FCS
            crc_err_allow: bool = 3,
            rx_en: bool = 1,
            tx_en: bool = 0,
        },
        /// RTL838x SMI_ACCESS_PHY_CTRL_1
        register MapleSmiCtrl {
            const ADDRESS = 0x04;
            const SIZE_BITS = 32;

            reg: uint = 20..=24,
            /// Parked page, carried over between accesses
            park_page: uint = 15..=19,
            page: uint = 3..=14,
            /// 1 = write, 0 = read
            write: bool = 2,
            /// Clause 45 access through SMI_ACCESS_PHY_CTRL_3
            mmd: bool = 1,
            /// Execute. Cleared by hardware when the access is done.
            cmd: bool = 0,
        },
        /// RTL839x PHYREG_ACCESS_CTRL
        register CypressPhyregAccess {
            const ADDRESS = 0x05;
            const SIZE_BITS = 32;

            park_page: uint = 23..=27,
            page: uint = 10..=22,
            reg: uint = 5..=9,
            write: bool = 3,
            mmd: bool = 2,
            fail: bool = 1,
            cmd: bool = 0,
        },
        /// PHY data: SMI_ACCESS_PHY_CTRL_2 (RTL838x) / PHYREG_DATA_CTRL (RTL839x)
        register PhyData {
            const ADDRESS = 0x06;
            const SIZE_BITS = 32;

            /// Write data on writes, port number on reads
            high: uint = 16..=31,
            /// Read result
            data: uint = 0..=15,
        },
        /// Clause 45 address: SMI_ACCESS_PHY_CTRL_3 (RTL838x) / PHYREG_MMD_CTRL (RTL839x)
        register MmdAddr {
            const ADDRESS = 0x07;
            const SIZE_BITS = 32;

            devad: uint = 16..=20,
            reg: uint = 0..=15,
        },
        /// RTL838x TBL_ACCESS_CTRL_0 / TBL_ACCESS_CTRL_1
        register MapleTableCtrl {
            const ADDRESS = 0x08;
            const SIZE_BITS = 32;

            execute: bool = 15,
            /// 1 = read, 0 = write
            read: bool = 14,
            table: uint = 12..=13,
            index: uint = 0..=11,
        },
        /// RTL839x TBL_ACCESS_CTRL_0
        register CypressTableCtrl {
            const ADDRESS = 0x09;
            const SIZE_BITS = 32;

            execute: bool = 16,
            read: bool = 15,
            table: uint = 12..=14,
            index: uint = 0..=11,
        },
        /// RTL839x TBL_ACCESS_L2_CTRL
        register CypressL2TableCtrl {
            const ADDRESS = 0x0A;
            const SIZE_BITS = 32;

            execute: bool = 17,
            /// 1 = write, 0 = read
            write: bool = 16,
            table: uint = 14..=15,
            index: uint = 0..=13,
        },
        /// MODEL_NAME_INFO
        register ModelInfo {
            const ADDRESS = 0x0B;
            const SIZE_BITS = 32;

            model: uint = 16..=31,
            revision: uint = 0..=15,
        }
    }
);
