//! Per-family register tables.
//!
//! The RTL838x ("Maple") and RTL839x ("Cypress") switches carry the same DMA engine and indirect
//! access blocks at different addresses, with slightly different command encodings. Everything
//! that differs lives behind [`RegisterMap`]; one table is bound per device at bring-up.

use crate::device::RawWord;
use crate::device::RegisterBus;
use crate::device::field_sets::{
    CypressDmaIfCtrl, CypressL2TableCtrl, CypressPhyregAccess, CypressTableCtrl, DmaIntr,
    MacPortCtrl, MapleDmaIfCtrl, MapleSmiCtrl, MapleTableCtrl, MmdAddr, ModelInfo, PhyData,
};
use crate::driver::Error;
use crate::indirect::{RegWrite, Transaction};

/// Switch port number.
pub type PortId = u8;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChipFamily {
    Rtl838x,
    Rtl839x,
}

const MAPLE_MODEL_NAME_INFO: u32 = 0x00d4;
const CYPRESS_MODEL_NAME_INFO: u32 = 0x0ff0;

impl ChipFamily {
    pub fn register_map(self) -> &'static dyn RegisterMap {
        match self {
            ChipFamily::Rtl838x => &Maple,
            ChipFamily::Rtl839x => &Cypress,
        }
    }

    /// Identify the chip from its model name register.
    ///
    /// Returns the family and the model number (e.g. 0x8382).
    pub fn detect<B: RegisterBus + ?Sized>(bus: &B) -> Result<(Self, u16), Error> {
        let maple = ModelInfo::from_word(bus.read32(MAPLE_MODEL_NAME_INFO)).model();
        if matches!(maple, 0x8330 | 0x8332 | 0x8380 | 0x8381 | 0x8382) {
            return Ok((ChipFamily::Rtl838x, maple));
        }
        let cypress = ModelInfo::from_word(bus.read32(CYPRESS_MODEL_NAME_INFO)).model();
        if matches!(cypress, 0x8390..=0x8393 | 0x8396) {
            return Ok((ChipFamily::Rtl839x, cypress));
        }
        Err(Error::UnknownChip { model: maple })
    }
}

/// Which of a family's two table access register sets to use.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TableBank {
    /// TBL_ACCESS_CTRL_0
    Primary,
    /// TBL_ACCESS_CTRL_1 (RTL838x) / TBL_ACCESS_L2_CTRL (RTL839x)
    Secondary,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Table {
    pub bank: TableBank,
    /// Table type within the bank
    pub kind: u8,
}

impl Table {
    /// RTL839x L2 multicast portmask table.
    pub const CYPRESS_MC_PORTMASK: Table = Table {
        bank: TableBank::Secondary,
        kind: 2,
    };
}

/// Family specific CPU port setup done after the DMA reset.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Bringup {
    /// Write the CPU port's force mode register and accept bad FCS from the CPU.
    ForceMode(u32),
    /// Set `bit` in data word `word` of a table entry.
    FloodPortmask {
        table: Table,
        index: u16,
        word: usize,
        bit: u32,
    },
}

/// Per-port link status registers.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LinkReg {
    Link,
    Duplex,
    TxPause,
    RxPause,
}

/// Register addresses and encodings of one chip family.
///
/// Addresses are offsets from the switch base.
pub trait RegisterMap: Sync {
    fn family(&self) -> ChipFamily;
    fn cpu_port(&self) -> PortId;

    fn mac_port_ctrl(&self, port: PortId) -> u32;
    fn mac_force_mode_ctrl(&self, port: PortId) -> u32;
    fn dma_if_intr_sts(&self) -> u32;
    fn dma_if_intr_msk(&self) -> u32;
    fn dma_if_ctrl(&self) -> u32;
    fn dma_rx_base(&self, ring: usize) -> u32;
    fn dma_tx_base(&self, ring: usize) -> u32;
    fn dma_if_rx_ring_size(&self, ring: usize) -> u32;
    fn dma_if_rx_ring_cntr(&self, ring: usize) -> u32;
    /// Physical address of the ring word the engine is working on.
    fn dma_if_rx_cur(&self, ring: usize) -> u32;
    fn rst_glb_ctrl(&self) -> u32;
    /// Bits of `rst_glb_ctrl` that reset the NIC. Self clearing.
    fn dma_reset(&self) -> u32;
    /// Interrupt mask bits that survive a DMA reset.
    fn preserved_intr_mask(&self) -> u32;
    /// DMA_IF_CTRL value with RX truncation and TX padding set, engines off.
    fn dma_if_ctrl_setup(&self, rx_trunc_len: u16) -> u32;
    /// RX and TX engine enable bits of DMA_IF_CTRL.
    fn dma_rxtx_enable(&self) -> u32;
    /// TX doorbell bit of DMA_IF_CTRL.
    fn dma_tx_doorbell(&self) -> u32;
    fn cpu_port_bringup(&self) -> Bringup;
    /// Host MAC address register pairs (high 16 bits, low 32 bits).
    fn mac_addr(&self) -> &'static [u32];
    /// Register and bit of a per-port link status flag.
    fn link_reg(&self, reg: LinkReg, port: PortId) -> (u32, u32);
    /// Register and shift of a port's 2-bit speed field.
    fn link_speed(&self, port: PortId) -> (u32, u32);
    fn mib_base(&self, port: PortId) -> u32;

    /// Descriptor tag words steering a frame to `port`.
    fn tx_tag(&self, port: PortId) -> [u16; 5];
    /// Source port from a received descriptor's tag words.
    fn rx_source_port(&self, tag: &[u16; 5]) -> PortId;

    fn phy_read(&self, port: PortId, page: u16, reg: u8) -> Result<Transaction, Error>;
    fn phy_write(&self, port: PortId, page: u16, reg: u8, value: u16)
    -> Result<Transaction, Error>;
    fn mmd_read(&self, port: PortId, devad: u8, reg: u16) -> Result<Transaction, Error>;
    fn mmd_write(&self, port: PortId, devad: u8, reg: u16, value: u16)
    -> Result<Transaction, Error>;
    fn table_read(&self, table: Table, index: u16) -> Result<Transaction, Error>;
    fn table_write(&self, table: Table, index: u16, data: [u32; 2])
    -> Result<Transaction, Error>;
}

/// MAC_PORT_CTRL bits enabling TX and RX.
pub(crate) fn mac_port_txrx() -> u32 {
    let mut c = MacPortCtrl::new_zero();
    c.set_tx_en(true);
    c.set_rx_en(true);
    c.to_word()
}

/// MAC_PORT_CTRL bit accepting frames with a bad FCS.
pub(crate) fn mac_port_crc_err_allow() -> u32 {
    let mut c = MacPortCtrl::new_zero();
    c.set_crc_err_allow(true);
    c.to_word()
}

/// Data register write that keeps the low half (PHY read result) intact.
fn phy_data_high(addr: u32, high: u16) -> RegWrite {
    let mut d = PhyData::new_zero();
    d.set_high(high);
    RegWrite::masked(addr, 0xffff_0000, d.to_word())
}

fn mmd_addr(addr: u32, devad: u8, reg: u16) -> RegWrite {
    let mut m = MmdAddr::new_zero();
    m.set_devad(devad);
    m.set_reg(reg);
    RegWrite::full(addr, m.to_word())
}

/// RTL838x
pub struct Maple;

const MAPLE_SMI_CTRL_0: u32 = 0xa1b8;
const MAPLE_SMI_CTRL_1: u32 = 0xa1bc;
const MAPLE_SMI_CTRL_2: u32 = 0xa1c0;
const MAPLE_SMI_CTRL_3: u32 = 0xa1c4;
const MAPLE_TBL_CTRL_0: u32 = 0x6914;
const MAPLE_TBL_DATA_0: u32 = 0x6918;
const MAPLE_TBL_CTRL_1: u32 = 0xa4c8;
const MAPLE_TBL_DATA_1: u32 = 0xa4cc;
const MAPLE_MAX_PHY: PortId = 27;

impl Maple {
    fn smi_execute() -> u32 {
        let mut c = MapleSmiCtrl::new_zero();
        c.set_cmd(true);
        c.to_word()
    }

    fn smi_park_page() -> u32 {
        let mut c = MapleSmiCtrl::new_zero();
        c.set_park_page(0x1f);
        c.to_word()
    }

    fn check_phy(port: PortId, page: u16, reg: u8) -> Result<(), Error> {
        if port > MAPLE_MAX_PHY || page > 4095 || reg > 31 {
            return Err(Error::Unsupported);
        }
        Ok(())
    }

    fn smi(page: u16, reg: u8, write: bool) -> u32 {
        let mut c = MapleSmiCtrl::new_zero();
        c.set_reg(reg);
        c.set_page(page);
        c.set_write(write);
        c.to_word()
    }

    fn smi_mmd(write: bool) -> u32 {
        let mut c = MapleSmiCtrl::new_zero();
        c.set_mmd(true);
        c.set_write(write);
        c.to_word()
    }

    fn table_regs(table: Table) -> Result<(u32, u32), Error> {
        if table.kind > 3 {
            return Err(Error::Unsupported);
        }
        Ok(match table.bank {
            TableBank::Primary => (MAPLE_TBL_CTRL_0, MAPLE_TBL_DATA_0),
            TableBank::Secondary => (MAPLE_TBL_CTRL_1, MAPLE_TBL_DATA_1),
        })
    }

    fn table_cmd(table: Table, index: u16, read: bool) -> Result<(u32, u32, u32, u32), Error> {
        let (ctrl, data) = Self::table_regs(table)?;
        if index > 0xfff {
            return Err(Error::Unsupported);
        }
        let mut c = MapleTableCtrl::new_zero();
        c.set_read(read);
        c.set_table(table.kind);
        c.set_index(index);
        let mut e = MapleTableCtrl::new_zero();
        e.set_execute(true);
        Ok((ctrl, data, c.to_word(), e.to_word()))
    }
}

impl RegisterMap for Maple {
    fn family(&self) -> ChipFamily {
        ChipFamily::Rtl838x
    }

    fn cpu_port(&self) -> PortId {
        28
    }

    fn mac_port_ctrl(&self, port: PortId) -> u32 {
        0xd560 + ((port as u32) << 7)
    }

    fn mac_force_mode_ctrl(&self, port: PortId) -> u32 {
        0xa104 + ((port as u32) << 2)
    }

    fn dma_if_intr_sts(&self) -> u32 {
        0x9f54
    }

    fn dma_if_intr_msk(&self) -> u32 {
        0x9f50
    }

    fn dma_if_ctrl(&self) -> u32 {
        0x9f58
    }

    fn dma_rx_base(&self, ring: usize) -> u32 {
        0x9f00 + ((ring as u32) << 2)
    }

    fn dma_tx_base(&self, ring: usize) -> u32 {
        0x9f40 + ((ring as u32) << 2)
    }

    fn dma_if_rx_ring_size(&self, ring: usize) -> u32 {
        0xb7e4 + (((ring as u32) >> 3) << 2)
    }

    fn dma_if_rx_ring_cntr(&self, ring: usize) -> u32 {
        0xb7e8 + (((ring as u32) >> 3) << 2)
    }

    fn dma_if_rx_cur(&self, ring: usize) -> u32 {
        0x9f20 + ((ring as u32) << 2)
    }

    fn rst_glb_ctrl(&self) -> u32 {
        0x003c
    }

    fn dma_reset(&self) -> u32 {
        0x08
    }

    fn preserved_intr_mask(&self) -> u32 {
        0
    }

    fn dma_if_ctrl_setup(&self, rx_trunc_len: u16) -> u32 {
        let mut c = MapleDmaIfCtrl::new_zero();
        c.set_rx_trunc_len(rx_trunc_len);
        c.set_tx_pad_en(true);
        c.to_word()
    }

    fn dma_rxtx_enable(&self) -> u32 {
        let mut c = MapleDmaIfCtrl::new_zero();
        c.set_rx_en(true);
        c.set_tx_en(true);
        c.to_word()
    }

    fn dma_tx_doorbell(&self) -> u32 {
        let mut c = MapleDmaIfCtrl::new_zero();
        c.set_tx_do(true);
        c.to_word()
    }

    fn cpu_port_bringup(&self) -> Bringup {
        // FORCE_EN | LINK_EN | NWAY_EN | DUP_SEL | SPD_SEL = 1000M | FORCE_FC_EN
        // | PHY_MASTER_SLV_MANUAL_EN | MEDIA_SEL
        Bringup::ForceMode(0x6192f)
    }

    fn mac_addr(&self) -> &'static [u32] {
        // Host MAC, ALE block, MAC2
        &[0xa9ec, 0x6b04, 0xa320]
    }

    fn link_reg(&self, reg: LinkReg, port: PortId) -> (u32, u32) {
        let addr = match reg {
            LinkReg::Link => 0xa188,
            LinkReg::Duplex => 0xa19c,
            LinkReg::TxPause => 0xa1a0,
            LinkReg::RxPause => 0xa1a4,
        };
        (addr, 1 << (port % 32))
    }

    fn link_speed(&self, port: PortId) -> (u32, u32) {
        (0xa190 + (((port as u32) >> 4) << 2), ((port as u32) % 16) << 1)
    }

    fn mib_base(&self, port: PortId) -> u32 {
        0x1200 + ((port as u32) << 8)
    }

    fn tx_tag(&self, port: PortId) -> [u16; 5] {
        // Ports 16..=27 land in word 3, 0..=15 in word 4
        let mask = 1u32 << port;
        [0x0400, 0x0200, 0x0000, (mask >> 16) as u16, mask as u16]
    }

    fn rx_source_port(&self, tag: &[u16; 5]) -> PortId {
        (tag[0] & 0x1f) as PortId
    }

    fn phy_read(&self, port: PortId, page: u16, reg: u8) -> Result<Transaction, Error> {
        Self::check_phy(port, page, reg)?;
        Ok(
            Transaction::new(MAPLE_SMI_CTRL_1, Self::smi_execute(), Self::smi(page, reg, false))
                .keep(Self::smi_park_page())
                .setup(phy_data_high(MAPLE_SMI_CTRL_2, port as u16))
                .result(MAPLE_SMI_CTRL_2),
        )
    }

    fn phy_write(
        &self,
        port: PortId,
        page: u16,
        reg: u8,
        value: u16,
    ) -> Result<Transaction, Error> {
        Self::check_phy(port, page, reg)?;
        Ok(
            Transaction::new(MAPLE_SMI_CTRL_1, Self::smi_execute(), Self::smi(page, reg, true))
                .keep(Self::smi_park_page())
                .setup(RegWrite::full(MAPLE_SMI_CTRL_0, 1 << port))
                .setup(phy_data_high(MAPLE_SMI_CTRL_2, value)),
        )
    }

    fn mmd_read(&self, port: PortId, devad: u8, reg: u16) -> Result<Transaction, Error> {
        if port > MAPLE_MAX_PHY || devad > 31 {
            return Err(Error::Unsupported);
        }
        Ok(
            Transaction::new(MAPLE_SMI_CTRL_1, Self::smi_execute(), Self::smi_mmd(false))
                .setup(phy_data_high(MAPLE_SMI_CTRL_2, port as u16))
                .setup(mmd_addr(MAPLE_SMI_CTRL_3, devad, reg))
                .result(MAPLE_SMI_CTRL_2),
        )
    }

    fn mmd_write(
        &self,
        port: PortId,
        devad: u8,
        reg: u16,
        value: u16,
    ) -> Result<Transaction, Error> {
        if port > MAPLE_MAX_PHY || devad > 31 {
            return Err(Error::Unsupported);
        }
        Ok(
            Transaction::new(MAPLE_SMI_CTRL_1, Self::smi_execute(), Self::smi_mmd(true))
                .setup(RegWrite::full(MAPLE_SMI_CTRL_0, 1 << port))
                .setup(phy_data_high(MAPLE_SMI_CTRL_2, value))
                .setup(mmd_addr(MAPLE_SMI_CTRL_3, devad, reg)),
        )
    }

    fn table_read(&self, table: Table, index: u16) -> Result<Transaction, Error> {
        let (ctrl, data, cmd, exec) = Self::table_cmd(table, index, true)?;
        Ok(Transaction::new(ctrl, exec, cmd)
            .result(data)
            .result(data + 4))
    }

    fn table_write(
        &self,
        table: Table,
        index: u16,
        data: [u32; 2],
    ) -> Result<Transaction, Error> {
        let (ctrl, base, cmd, exec) = Self::table_cmd(table, index, false)?;
        Ok(Transaction::new(ctrl, exec, cmd)
            .setup(RegWrite::full(base, data[0]))
            .setup(RegWrite::full(base + 4, data[1])))
    }
}

/// RTL839x
pub struct Cypress;

const CYPRESS_PHYREG_ACCESS_CTRL: u32 = 0x03dc;
const CYPRESS_PHYREG_CTRL: u32 = 0x03e0;
const CYPRESS_PHYREG_PORT_CTRL: u32 = 0x03e4;
const CYPRESS_PHYREG_DATA_CTRL: u32 = 0x03f0;
const CYPRESS_PHYREG_MMD_CTRL: u32 = 0x03f4;
const CYPRESS_TBL_CTRL_0: u32 = 0x1190;
const CYPRESS_TBL_DATA_0: u32 = 0x1194;
const CYPRESS_TBL_L2_CTRL: u32 = 0x1180;
const CYPRESS_TBL_L2_DATA: u32 = 0x1184;
const CYPRESS_MAX_PHY: PortId = 63;

impl Cypress {
    fn execute() -> u32 {
        let mut c = CypressPhyregAccess::new_zero();
        c.set_cmd(true);
        c.to_word()
    }

    fn check_phy(port: PortId, page: u16, reg: u8) -> Result<(), Error> {
        if port > CYPRESS_MAX_PHY || page > 4095 || reg > 31 {
            return Err(Error::Unsupported);
        }
        Ok(())
    }

    fn access(page: u16, reg: u8, write: bool) -> u32 {
        let mut c = CypressPhyregAccess::new_zero();
        c.set_reg(reg);
        c.set_page(page);
        c.set_write(write);
        c.to_word()
    }

    fn access_mmd(write: bool) -> u32 {
        let mut c = CypressPhyregAccess::new_zero();
        c.set_mmd(true);
        c.set_write(write);
        c.to_word()
    }

    /// Select a single target port in the two PHYREG_PORT_CTRL words.
    fn port_select(port: PortId) -> [RegWrite; 2] {
        let bit = 1u32 << (port % 32);
        let (lo, hi) = if port < 32 { (bit, 0) } else { (0, bit) };
        [
            RegWrite::full(CYPRESS_PHYREG_PORT_CTRL, lo),
            RegWrite::full(CYPRESS_PHYREG_PORT_CTRL + 4, hi),
        ]
    }
}

impl RegisterMap for Cypress {
    fn family(&self) -> ChipFamily {
        ChipFamily::Rtl839x
    }

    fn cpu_port(&self) -> PortId {
        52
    }

    fn mac_port_ctrl(&self, port: PortId) -> u32 {
        0x8004 + ((port as u32) << 7)
    }

    fn mac_force_mode_ctrl(&self, port: PortId) -> u32 {
        0x02bc + ((port as u32) << 2)
    }

    fn dma_if_intr_sts(&self) -> u32 {
        0x7868
    }

    fn dma_if_intr_msk(&self) -> u32 {
        0x7864
    }

    fn dma_if_ctrl(&self) -> u32 {
        0x786c
    }

    fn dma_rx_base(&self, ring: usize) -> u32 {
        0x780c + ((ring as u32) << 2)
    }

    fn dma_tx_base(&self, ring: usize) -> u32 {
        0x784c + ((ring as u32) << 2)
    }

    fn dma_if_rx_ring_size(&self, ring: usize) -> u32 {
        0x6038 + (((ring as u32) >> 3) << 2)
    }

    fn dma_if_rx_ring_cntr(&self, ring: usize) -> u32 {
        0x603c + (((ring as u32) >> 3) << 2)
    }

    fn dma_if_rx_cur(&self, ring: usize) -> u32 {
        0x782c + ((ring as u32) << 2)
    }

    fn rst_glb_ctrl(&self) -> u32 {
        0x0014
    }

    fn dma_reset(&self) -> u32 {
        0x800
    }

    fn preserved_intr_mask(&self) -> u32 {
        // L2 notification
        let mut m = DmaIntr::new_zero();
        m.set_notify(0x7);
        m.to_word()
    }

    fn dma_if_ctrl_setup(&self, rx_trunc_len: u16) -> u32 {
        let mut c = CypressDmaIfCtrl::new_zero();
        c.set_rx_trunc_len(rx_trunc_len);
        c.set_tx_pad_en(true);
        c.to_word()
    }

    fn dma_rxtx_enable(&self) -> u32 {
        let mut c = CypressDmaIfCtrl::new_zero();
        c.set_rx_en(true);
        c.set_tx_en(true);
        c.to_word()
    }

    fn dma_tx_doorbell(&self) -> u32 {
        let mut c = CypressDmaIfCtrl::new_zero();
        c.set_tx_do(true);
        c.to_word()
    }

    fn cpu_port_bringup(&self) -> Bringup {
        // CPU port joins the lookup miss flooding portmask
        Bringup::FloodPortmask {
            table: Table::CYPRESS_MC_PORTMASK,
            index: 0,
            word: 0,
            bit: 1 << 31,
        }
    }

    fn mac_addr(&self) -> &'static [u32] {
        &[0x02b4]
    }

    fn link_reg(&self, reg: LinkReg, port: PortId) -> (u32, u32) {
        let base = match reg {
            LinkReg::Link => 0x0390,
            LinkReg::Duplex => 0x03b0,
            LinkReg::TxPause => 0x03b8,
            LinkReg::RxPause => 0x03c0,
        };
        (base + (((port as u32) >> 5) << 2), 1 << (port % 32))
    }

    fn link_speed(&self, port: PortId) -> (u32, u32) {
        (0x03a0 + (((port as u32) >> 4) << 2), ((port as u32) % 16) << 1)
    }

    fn mib_base(&self, port: PortId) -> u32 {
        0xc000 + ((port as u32) << 8)
    }

    fn tx_tag(&self, port: PortId) -> [u16; 5] {
        let mask = 1u64 << port;
        [
            0x0100,
            (mask >> 48) as u16,
            (mask >> 32) as u16,
            (mask >> 16) as u16,
            mask as u16,
        ]
    }

    fn rx_source_port(&self, tag: &[u16; 5]) -> PortId {
        (tag[0] & 0x3f) as PortId
    }

    fn phy_read(&self, port: PortId, page: u16, reg: u8) -> Result<Transaction, Error> {
        Self::check_phy(port, page, reg)?;
        Ok(Transaction::new(
            CYPRESS_PHYREG_ACCESS_CTRL,
            Self::execute(),
            Self::access(page, reg, false),
        )
        .setup(phy_data_high(CYPRESS_PHYREG_DATA_CTRL, port as u16))
        .setup(RegWrite::full(CYPRESS_PHYREG_CTRL, 0x1ff))
        .result(CYPRESS_PHYREG_DATA_CTRL))
    }

    fn phy_write(
        &self,
        port: PortId,
        page: u16,
        reg: u8,
        value: u16,
    ) -> Result<Transaction, Error> {
        Self::check_phy(port, page, reg)?;
        let [lo, hi] = Self::port_select(port);
        Ok(Transaction::new(
            CYPRESS_PHYREG_ACCESS_CTRL,
            Self::execute(),
            Self::access(page, reg, true),
        )
        .setup(lo)
        .setup(hi)
        .setup(phy_data_high(CYPRESS_PHYREG_DATA_CTRL, value))
        .setup(RegWrite::full(CYPRESS_PHYREG_CTRL, 0x1ff)))
    }

    fn mmd_read(&self, port: PortId, devad: u8, reg: u16) -> Result<Transaction, Error> {
        if port > CYPRESS_MAX_PHY || devad > 31 {
            return Err(Error::Unsupported);
        }
        Ok(Transaction::new(
            CYPRESS_PHYREG_ACCESS_CTRL,
            Self::execute(),
            Self::access_mmd(false),
        )
        .setup(phy_data_high(CYPRESS_PHYREG_DATA_CTRL, port as u16))
        .setup(mmd_addr(CYPRESS_PHYREG_MMD_CTRL, devad, reg))
        .result(CYPRESS_PHYREG_DATA_CTRL))
    }

    fn mmd_write(
        &self,
        port: PortId,
        devad: u8,
        reg: u16,
        value: u16,
    ) -> Result<Transaction, Error> {
        if port > CYPRESS_MAX_PHY || devad > 31 {
            return Err(Error::Unsupported);
        }
        let [lo, hi] = Self::port_select(port);
        Ok(Transaction::new(
            CYPRESS_PHYREG_ACCESS_CTRL,
            Self::execute(),
            Self::access_mmd(true),
        )
        .setup(lo)
        .setup(hi)
        .setup(phy_data_high(CYPRESS_PHYREG_DATA_CTRL, value))
        .setup(mmd_addr(CYPRESS_PHYREG_MMD_CTRL, devad, reg)))
    }

    fn table_read(&self, table: Table, index: u16) -> Result<Transaction, Error> {
        let (ctrl, data, cmd, exec) = cypress_table_cmd(table, index, true)?;
        Ok(Transaction::new(ctrl, exec, cmd)
            .result(data)
            .result(data + 4))
    }

    fn table_write(
        &self,
        table: Table,
        index: u16,
        data: [u32; 2],
    ) -> Result<Transaction, Error> {
        let (ctrl, base, cmd, exec) = cypress_table_cmd(table, index, false)?;
        Ok(Transaction::new(ctrl, exec, cmd)
            .setup(RegWrite::full(base, data[0]))
            .setup(RegWrite::full(base + 4, data[1])))
    }
}

/// (control, data base, command, execute) for an RTL839x table access.
fn cypress_table_cmd(table: Table, index: u16, read: bool) -> Result<(u32, u32, u32, u32), Error> {
    match table.bank {
        TableBank::Primary => {
            if table.kind > 7 || index > 0xfff {
                return Err(Error::Unsupported);
            }
            let mut c = CypressTableCtrl::new_zero();
            c.set_read(read);
            c.set_table(table.kind);
            c.set_index(index);
            let mut e = CypressTableCtrl::new_zero();
            e.set_execute(true);
            Ok((CYPRESS_TBL_CTRL_0, CYPRESS_TBL_DATA_0, c.to_word(), e.to_word()))
        }
        TableBank::Secondary => {
            if table.kind > 3 || index > 0x3fff {
                return Err(Error::Unsupported);
            }
            // The L2 bank flags writes rather than reads
            let mut c = CypressL2TableCtrl::new_zero();
            c.set_write(!read);
            c.set_table(table.kind);
            c.set_index(index);
            let mut e = CypressL2TableCtrl::new_zero();
            e.set_execute(true);
            Ok((CYPRESS_TBL_L2_CTRL, CYPRESS_TBL_L2_DATA, c.to_word(), e.to_word()))
        }
    }
}
