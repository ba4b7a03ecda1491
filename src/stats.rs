//! Host-side counters, per-port link status and the hardware MIB counters.

use crate::device::RegisterBus;
use crate::regmap::{LinkReg, PortId, RegisterMap};

/// Counters kept by the DMA engine. Updated under the ring lock.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Counters {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    /// Frames discarded: bad length, allocation failure, overflow cleanup
    pub rx_dropped: u64,
    /// RX overflow interrupts seen
    pub rx_overflows: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_timeouts: u64,
}

/// Snapshot of a device's counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stats {
    pub counters: Counters,
    pub indirect_timeouts: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Speed {
    Mbps10,
    Mbps100,
    Mbps1000,
    Unknown,
}

impl Speed {
    fn from_field(v: u32) -> Self {
        match v & 0b11 {
            0 => Speed::Mbps10,
            1 => Speed::Mbps100,
            2 => Speed::Mbps1000,
            _ => Speed::Unknown,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkState {
    pub link: bool,
    pub full_duplex: bool,
    pub speed: Speed,
    pub tx_pause: bool,
    pub rx_pause: bool,
}

pub fn read_link_state<B: RegisterBus + ?Sized>(
    bus: &B,
    map: &dyn RegisterMap,
    port: PortId,
) -> LinkState {
    let flag = |reg| {
        let (addr, bit) = map.link_reg(reg, port);
        bus.read32(addr) & bit != 0
    };
    let (addr, shift) = map.link_speed(port);
    LinkState {
        link: flag(LinkReg::Link),
        full_duplex: flag(LinkReg::Duplex),
        speed: Speed::from_field(bus.read32(addr) >> shift),
        tx_pause: flag(LinkReg::TxPause),
        rx_pause: flag(LinkReg::RxPause),
    }
}

/// One hardware MIB counter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MibCounter {
    pub name: &'static str,
    /// Counter width in 32-bit words
    pub words: u8,
    /// Offset from the top of the port's MIB block
    pub offset: u32,
}

const fn mib(words: u8, offset: u32, name: &'static str) -> MibCounter {
    MibCounter {
        name,
        words,
        offset,
    }
}

pub const MIB_COUNTERS: [MibCounter; 46] = [
    mib(2, 0xf8, "ifInOctets"),
    mib(2, 0xf0, "ifOutOctets"),
    mib(1, 0xec, "dot1dTpPortInDiscards"),
    mib(1, 0xe8, "ifInUcastPkts"),
    mib(1, 0xe4, "ifInMulticastPkts"),
    mib(1, 0xe0, "ifInBroadcastPkts"),
    mib(1, 0xdc, "ifOutUcastPkts"),
    mib(1, 0xd8, "ifOutMulticastPkts"),
    mib(1, 0xd4, "ifOutBroadcastPkts"),
    mib(1, 0xd0, "ifOutDiscards"),
    mib(1, 0xcc, ".3SingleCollisionFrames"),
    mib(1, 0xc8, ".3MultipleCollisionFrames"),
    mib(1, 0xc4, ".3DeferredTransmissions"),
    mib(1, 0xc0, ".3LateCollisions"),
    mib(1, 0xbc, ".3ExcessiveCollisions"),
    mib(1, 0xb8, ".3SymbolErrors"),
    mib(1, 0xb4, ".3ControlInUnknownOpcodes"),
    mib(1, 0xb0, ".3InPauseFrames"),
    mib(1, 0xac, ".3OutPauseFrames"),
    mib(1, 0xa8, "DropEvents"),
    mib(1, 0xa4, "tx_BroadcastPkts"),
    mib(1, 0xa0, "tx_MulticastPkts"),
    mib(1, 0x9c, "CRCAlignErrors"),
    mib(1, 0x98, "tx_UndersizePkts"),
    mib(1, 0x94, "rx_UndersizePkts"),
    mib(1, 0x90, "rx_UndersizedropPkts"),
    mib(1, 0x8c, "tx_OversizePkts"),
    mib(1, 0x88, "rx_OversizePkts"),
    mib(1, 0x84, "Fragments"),
    mib(1, 0x80, "Jabbers"),
    mib(1, 0x7c, "Collisions"),
    mib(1, 0x78, "tx_Pkts64Octets"),
    mib(1, 0x74, "rx_Pkts64Octets"),
    mib(1, 0x70, "tx_Pkts65to127Octets"),
    mib(1, 0x6c, "rx_Pkts65to127Octets"),
    mib(1, 0x68, "tx_Pkts128to255Octets"),
    mib(1, 0x64, "rx_Pkts128to255Octets"),
    mib(1, 0x60, "tx_Pkts256to511Octets"),
    mib(1, 0x5c, "rx_Pkts256to511Octets"),
    mib(1, 0x58, "tx_Pkts512to1023Octets"),
    mib(1, 0x54, "rx_Pkts512to1023Octets"),
    mib(1, 0x50, "tx_Pkts1024to1518Octets"),
    mib(1, 0x4c, "rx_StatsPkts1024to1518Octets"),
    mib(1, 0x48, "tx_Pkts1519tomaxOctets"),
    mib(1, 0x44, "rx_Pkts1519tomaxOctets"),
    mib(1, 0x40, "rxMacDiscards"),
];

/// Read a port's MIB counters into `out`, in [`MIB_COUNTERS`] order. Returns how many were
/// filled.
pub fn read_mib<B: RegisterBus + ?Sized>(
    bus: &B,
    map: &dyn RegisterMap,
    port: PortId,
    out: &mut [u64],
) -> usize {
    // Counters are laid out downwards from the top of the 256-byte block
    let top = map.mib_base(port) + 252;
    let mut n = 0;
    for (c, o) in MIB_COUNTERS.iter().zip(out.iter_mut()) {
        let mut v = bus.read32(top - c.offset) as u64;
        if c.words == 2 {
            v |= (bus.read32(top - c.offset - 4) as u64) << 32;
        }
        *o = v;
        n += 1;
    }
    n
}
