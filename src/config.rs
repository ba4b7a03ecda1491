use crate::arena::{MAX_RX_RINGS, MAX_TX_RINGS};
use crate::driver::Error;
use crate::regmap::{ChipFamily, PortId};

/// Bring-up parameters for one device instance. Fixed once the device is constructed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub family: ChipFamily,
    /// Switch port wired to the DMA engine.
    pub cpu_port: PortId,
    pub rx_rings: usize,
    pub rx_ring_len: usize,
    pub tx_rings: usize,
    pub tx_ring_len: usize,
    /// Carry the source/destination port in a 4-byte trailer on the frame.
    pub tag_mode: bool,
    /// Frames drained per deferred receive pass.
    pub napi_budget: usize,
    /// Polls of an indirect-access execute bit before giving up.
    pub indirect_poll_budget: u32,
    pub indirect_poll_delay_us: u32,
    /// Quiesce time around the global DMA reset.
    pub reset_settle_ms: u32,
}

impl Config {
    /// Family defaults.
    pub fn new(family: ChipFamily) -> Self {
        let (rx_rings, rx_ring_len, tx_ring_len) = match family {
            ChipFamily::Rtl838x => (8, 32, 20),
            ChipFamily::Rtl839x => (2, 300, 160),
        };
        Self {
            family,
            cpu_port: family.register_map().cpu_port(),
            rx_rings,
            rx_ring_len,
            tx_rings: 2,
            tx_ring_len,
            tag_mode: false,
            napi_budget: 64,
            indirect_poll_budget: 10_000,
            indirect_poll_delay_us: 10,
            reset_settle_ms: 50,
        }
    }

    pub fn with_tag_mode(mut self, on: bool) -> Self {
        self.tag_mode = on;
        self
    }

    /// Reject geometries the interrupt and ring registers can't express.
    pub fn validate(&self) -> Result<(), Error> {
        // One status bit per RX ring, four per TX
        if self.rx_rings == 0 || self.rx_rings > MAX_RX_RINGS {
            return Err(Error::Unsupported);
        }
        if self.tx_rings == 0 || self.tx_rings > MAX_TX_RINGS {
            return Err(Error::Unsupported);
        }
        // A ring needs a wrap slot distinct from slot 0
        if self.rx_ring_len < 2 || self.tx_ring_len < 2 {
            return Err(Error::Unsupported);
        }
        if self.cpu_port != self.family.register_map().cpu_port() {
            return Err(Error::Unsupported);
        }
        if self.napi_budget == 0 || self.indirect_poll_budget == 0 {
            return Err(Error::Unsupported);
        }
        Ok(())
    }
}
