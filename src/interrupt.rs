//! Interrupt enable sets

use bitfield::bitfield;

bitfield! {
    /// A set of controller interrupt sources, laid out like the interrupt
    /// enable register.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct InterruptSet(u32);

    /// Sleep
    pub slkie, set_slkie: 17;
    /// Wakeup
    pub wkuie, set_wkuie: 16;
    /// Error
    pub errie, set_errie: 15;
    /// Last error code
    pub lecie, set_lecie: 11;
    /// Bus-off
    pub bofie, set_bofie: 10;
    /// Error passive
    pub epvie, set_epvie: 9;
    /// Error warning
    pub ewgie, set_ewgie: 8;
    /// FIFO 1 overrun
    pub fovie1, set_fovie1: 6;
    /// FIFO 1 full
    pub ffie1, set_ffie1: 5;
    /// FIFO 1 message pending
    pub fmpie1, set_fmpie1: 4;
    /// FIFO 0 overrun
    pub fovie0, set_fovie0: 3;
    /// FIFO 0 full
    pub ffie0, set_ffie0: 2;
    /// FIFO 0 message pending
    pub fmpie0, set_fmpie0: 1;
    /// Transmit mailbox empty
    pub tmeie, set_tmeie: 0;
}

impl InterruptSet {
    /// Bits that name an interrupt source.
    pub const VALID: u32 = 0x0003_8F7F;

    /// Set containing nothing.
    pub const fn empty() -> Self {
        InterruptSet(0)
    }

    /// Returns `true` if every interrupt of `other` is in `self`.
    pub fn contains(&self, other: InterruptSet) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if the set holds no interrupt.
    pub fn is_empty(&self) -> bool {
        self.0 & Self::VALID == 0
    }

    /// Interrupts of `self` that are not in `other`.
    pub fn difference(&self, other: InterruptSet) -> Self {
        InterruptSet(self.0 & !other.0)
    }

    /// An iterator visiting all elements in ascending bit order.
    pub fn iter(&self) -> Iter {
        Iter {
            flags: *self,
            index: 0,
        }
    }
}

impl FromIterator<Interrupt> for InterruptSet {
    fn from_iter<T: IntoIterator<Item = Interrupt>>(iter: T) -> Self {
        let mut set = 0_u32;
        for int in iter.into_iter() {
            set |= u32::from(int);
        }
        InterruptSet(set)
    }
}

impl core::fmt::Debug for InterruptSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// A single interrupt source.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Interrupt {
    /// TMEIE
    TxMailboxEmpty = 0,
    /// FMPIE0
    RxFifo0MessagePending = 1,
    /// FFIE0
    RxFifo0Full = 2,
    /// FOVIE0
    RxFifo0Overrun = 3,
    /// FMPIE1
    RxFifo1MessagePending = 4,
    /// FFIE1
    RxFifo1Full = 5,
    /// FOVIE1
    RxFifo1Overrun = 6,
    /// EWGIE
    ErrorWarning = 8,
    /// EPVIE
    ErrorPassive = 9,
    /// BOFIE
    BusOff = 10,
    /// LECIE
    LastErrorCode = 11,
    /// ERRIE
    ErrorStatus = 15,
    /// WKUIE
    Wakeup = 16,
    /// SLKIE
    Sleep = 17,
}

impl From<Interrupt> for u32 {
    fn from(x: Interrupt) -> Self {
        1 << x as u32
    }
}

/// Bit position that does not name an interrupt source.
#[derive(Debug)]
pub struct InvalidInterruptNumber;

impl TryFrom<u8> for Interrupt {
    type Error = InvalidInterruptNumber;

    fn try_from(value: u8) -> Result<Self, InvalidInterruptNumber> {
        use Interrupt::*;
        let ret = match value {
            0 => TxMailboxEmpty,
            1 => RxFifo0MessagePending,
            2 => RxFifo0Full,
            3 => RxFifo0Overrun,
            4 => RxFifo1MessagePending,
            5 => RxFifo1Full,
            6 => RxFifo1Overrun,
            8 => ErrorWarning,
            9 => ErrorPassive,
            10 => BusOff,
            11 => LastErrorCode,
            15 => ErrorStatus,
            16 => Wakeup,
            17 => Sleep,
            _ => Err(InvalidInterruptNumber)?,
        };
        Ok(ret)
    }
}

/// An iterator over the items of an [`InterruptSet`].
///
/// This `struct` is created by [`InterruptSet::iter`].
pub struct Iter {
    flags: InterruptSet,
    index: u8,
}

impl Iterator for Iter {
    type Item = Interrupt;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < 18 {
            let i = self.index;
            self.index += 1;
            if self.flags.0 & (1 << i) == 0 {
                continue;
            }
            if let Ok(int) = Interrupt::try_from(i) {
                return Some(int);
            }
        }
        None
    }
}
