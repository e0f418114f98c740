//! Acceptance filter banks
//!
//! The two controllers share one set of banks. Banks below
//! [`SECOND_CONTROLLER_FIRST_BANK`] belong to the first controller, the rest
//! to the second one; a controller may only program its own banks.

use crate::bus::Bus;
use crate::core::FILTER_BANKS;
use crate::rx_fifo::Fifo;
use crate::Error;
use core::ops::Range;

/// Boundary between the banks of the two controllers
pub const SECOND_CONTROLLER_FIRST_BANK: u8 = 14;

const STANDARD_MAX: u32 = 0x7FF;
const EXTENDED_MAX: u32 = 0x1FFF_FFFF;
const IDE: u32 = 1 << 2;

impl Bus {
    /// Filter banks this controller may program.
    pub fn filter_banks(self) -> Range<u8> {
        let end = FILTER_BANKS as u8;
        if cfg!(feature = "single-can") {
            match self {
                Bus::Can1 => 0..end,
                Bus::Can2 => end..end,
            }
        } else {
            match self {
                Bus::Can1 => 0..SECOND_CONTROLLER_FIRST_BANK,
                Bus::Can2 => SECOND_CONTROLLER_FIRST_BANK..end,
            }
        }
    }
}

/// How the two filter words of a bank are interpreted
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterMode {
    /// First word is an identifier, second word a mask of bits that must
    /// match
    #[default]
    IdMask,
    /// Both words are identifiers accepted verbatim
    IdList,
}

/// Width of the filter words
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Scale {
    /// One 32-bit filter per bank, standard or extended identifiers
    #[default]
    Single32,
    /// Two 16-bit filters per bank, standard identifiers only
    Dual16,
}

/// Configuration of one filter bank
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FilterBankConfig {
    /// Bank index, 0..28
    pub bank: u8,
    /// Identifier to match
    pub id: u32,
    /// Mask of identifier bits that must match, or second identifier in
    /// [`FilterMode::IdList`]
    pub mask: u32,
    /// Match 29-bit identifiers
    pub extended: bool,
    /// Destination of accepted frames
    pub fifo: Fifo,
    /// Mask or list matching
    pub mode: FilterMode,
    /// Filter width
    pub scale: Scale,
    /// Enable the bank
    pub active: bool,
}

impl FilterBankConfig {
    /// Active 32-bit mask filter for 11-bit identifiers.
    pub fn standard(bank: u8, id: u32, mask: u32, fifo: Fifo) -> Self {
        Self {
            bank,
            id,
            mask,
            extended: false,
            fifo,
            mode: FilterMode::IdMask,
            scale: Scale::Single32,
            active: true,
        }
    }

    /// Active 32-bit mask filter for 29-bit identifiers.
    pub fn extended(bank: u8, id: u32, mask: u32, fifo: Fifo) -> Self {
        Self {
            extended: true,
            ..Self::standard(bank, id, mask, fifo)
        }
    }

    /// Filter letting every frame through to `fifo`.
    pub fn accept_all(bank: u8, fifo: Fifo) -> Self {
        Self::standard(bank, 0, 0, fifo)
    }

    /// Checks the bank against the partition of `bus` and the identifiers
    /// against their width.
    pub fn check(&self, bus: Bus) -> Result<(), Error> {
        if !bus.filter_banks().contains(&self.bank) {
            return Err(Error::InvalidParam);
        }
        let max = if self.extended {
            EXTENDED_MAX
        } else {
            STANDARD_MAX
        };
        if self.id > max || self.mask > max {
            return Err(Error::InvalidParam);
        }
        if self.extended && self.scale == Scale::Dual16 {
            return Err(Error::InvalidParam);
        }
        Ok(())
    }

    /// Bit of this bank in the per-bank filter registers.
    pub fn bank_bit(&self) -> u32 {
        1 << self.bank
    }
}

/// Contents of the two registers of a bank
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterWords {
    /// FxR1
    pub fr1: u32,
    /// FxR2
    pub fr2: u32,
}

impl From<&FilterBankConfig> for FilterWords {
    fn from(config: &FilterBankConfig) -> Self {
        match (config.scale, config.extended) {
            (Scale::Single32, false) => FilterWords {
                fr1: config.id << 21,
                fr2: config.mask << 21,
            },
            (Scale::Single32, true) => FilterWords {
                fr1: config.id << 3 | IDE,
                fr2: config.mask << 3 | IDE,
            },
            // Only the first filter of each word is used; the second one
            // stays zero.
            (Scale::Dual16, _) => FilterWords {
                fr1: (config.id << 5) & 0xFFFF,
                fr2: (config.mask << 5) & 0xFFFF,
            },
        }
    }
}
