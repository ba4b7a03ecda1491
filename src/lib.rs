//! Packet DMA ring engine and indirect register access for the RTL838x/RTL839x SoC switches
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arena;
pub mod config;
pub mod device;
pub mod dma;
pub mod driver;
pub mod indirect;
pub mod irq;
pub mod regmap;
pub mod ring;
pub mod stats;
pub mod tag;

#[cfg(test)]
mod sim;

pub use config::Config;
pub use driver::{Device, Error, FrameSink};
pub use regmap::ChipFamily;
