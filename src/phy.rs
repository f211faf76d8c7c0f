//! PHY (physical layer) operating mode selection.
//!
//! The W5500's PHY can be left under the control of its hardware
//! configuration pins, powered down, or driven to one of six fixed
//! speed/duplex/auto-negotiation combinations via `PHYCFGR`'s `OPMDC`
//! field. [`PhyMode::opmdc`] returns the 3-bit field value;
//! [`crate::registers::Registers::sequence_phycfgr`] drives the
//! reset/bypass sequence the chip requires to apply it.

/// One of the W5500's PHY operating modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PhyMode {
    /// Leave PHY configuration to the chip's hardware configuration pins;
    /// the register-based `OPMDC` override is not applied.
    ConfiguredByHardware,
    /// Power down the PHY.
    PowerDown,
    /// 10BASE-T, half duplex, auto-negotiation disabled.
    Half10Bt,
    /// 10BASE-T, full duplex, auto-negotiation disabled.
    Full10Bt,
    /// 100BASE-TX, half duplex, auto-negotiation disabled.
    Half100Bt,
    /// 100BASE-TX, full duplex, auto-negotiation disabled.
    Full100Bt,
    /// 100BASE-TX, half duplex, auto-negotiation enabled.
    Half100BtAutoNegotiation,
    /// All capable, auto-negotiation enabled.
    AllCapableAutoNegotiation,
}

impl PhyMode {
    /// The 3-bit `OPMDC` field value for this mode.
    pub const fn opmdc(self) -> u8 {
        match self {
            PhyMode::Half10Bt => 0b000,
            PhyMode::Full10Bt => 0b001,
            PhyMode::Half100Bt => 0b010,
            PhyMode::Full100Bt => 0b011,
            PhyMode::Half100BtAutoNegotiation => 0b100,
            PhyMode::PowerDown => 0b110,
            PhyMode::AllCapableAutoNegotiation | PhyMode::ConfiguredByHardware => 0b111,
        }
    }
}
