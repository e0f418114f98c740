//! Register field layouts and memory-mapped access
//!
//! Field views are plain `bitfield!` wrappers over the register word; the
//! transport reads a word through [`Registers`], wraps it, and writes the
//! modified word back.

use crate::core::fugit::HertzU32;
use crate::core::{Dependencies, Register, Registers};
use bitfield::bitfield;
use core::ptr::NonNull;
use vcell::VolatileCell;

bitfield! {
    /// Master control register
    #[derive(Copy, Clone, Default)]
    pub struct Mcr(u32);
    impl Debug;
    /// Debug freeze
    pub dbf, set_dbf: 16;
    /// Software master reset
    pub reset, set_reset: 15;
    /// Time triggered communication mode
    pub ttcm, set_ttcm: 7;
    /// Automatic bus-off management
    pub abom, set_abom: 6;
    /// Automatic wakeup mode
    pub awum, set_awum: 5;
    /// No automatic retransmission
    pub nart, set_nart: 4;
    /// Receive FIFO locked mode
    pub rflm, set_rflm: 3;
    /// Transmit FIFO priority
    pub txfp, set_txfp: 2;
    /// Sleep mode request
    pub sleep, set_sleep: 1;
    /// Initialization request
    pub inrq, set_inrq: 0;
}

bitfield! {
    /// Master status register
    #[derive(Copy, Clone, Default)]
    pub struct Msr(u32);
    impl Debug;
    /// Sleep acknowledge
    pub slak, _: 1;
    /// Initialization acknowledge
    pub inak, _: 0;
}

bitfield! {
    /// Transmit status register
    #[derive(Copy, Clone, Default)]
    pub struct Tsr(u32);
    /// Next free mailbox
    pub u8, code, _: 25, 24;
}

impl Tsr {
    const TME_SHIFT: usize = 26;

    /// Mailbox `n` is empty.
    pub fn tme(&self, n: usize) -> bool {
        self.0 & (1 << (Self::TME_SHIFT + n)) != 0
    }

    /// Mailbox `n` finished its last request, successfully or not.
    pub fn rqcp(&self, n: usize) -> bool {
        self.0 & (1 << (8 * n)) != 0
    }

    /// Write value clearing the request-completed flags of `mailboxes`.
    pub fn clear_rqcp(mailboxes: impl Iterator<Item = usize>) -> Self {
        Tsr(mailboxes.fold(0, |w, n| w | 1 << (8 * n)))
    }
}

impl core::fmt::Debug for Tsr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tsr")
            .field("tme", &[self.tme(0), self.tme(1), self.tme(2)])
            .field("rqcp", &[self.rqcp(0), self.rqcp(1), self.rqcp(2)])
            .field("code", &self.code())
            .finish()
    }
}

bitfield! {
    /// Receive FIFO status register
    #[derive(Copy, Clone, Default)]
    pub struct Rfr(u32);
    impl Debug;
    /// Release output mailbox
    pub rfom, set_rfom: 5;
    /// FIFO overrun
    pub fovr, set_fovr: 4;
    /// FIFO full
    pub full, set_full: 3;
    /// Number of pending messages
    pub u8, fmp, _: 1, 0;
}

bitfield! {
    /// Error status register
    #[derive(Copy, Clone, Default)]
    pub struct Esr(u32);
    impl Debug;
    /// Receive error counter
    pub u8, rec, _: 31, 24;
    /// Transmit error counter
    pub u8, tec, _: 23, 16;
    /// Last error code
    pub u8, lec, _: 6, 4;
    /// Bus-off flag
    pub boff, _: 2;
    /// Error passive flag
    pub epvf, _: 1;
    /// Error warning flag
    pub ewgf, _: 0;
}

bitfield! {
    /// Bit timing register. Fields hold the hardware encoding, one less than
    /// the value in time quanta.
    #[derive(Copy, Clone, Default)]
    pub struct Btr(u32);
    impl Debug;
    /// Silent mode
    pub silm, set_silm: 31;
    /// Loopback mode
    pub lbkm, set_lbkm: 30;
    /// Resynchronization jump width
    pub u8, sjw, set_sjw: 25, 24;
    /// Time segment 2
    pub u8, ts2, set_ts2: 22, 20;
    /// Time segment 1
    pub u8, ts1, set_ts1: 19, 16;
    /// Baud rate prescaler
    pub u16, brp, set_brp: 9, 0;
}

bitfield! {
    /// Filter master register
    #[derive(Copy, Clone, Default)]
    pub struct Fmr(u32);
    impl Debug;
    /// First bank of the second controller
    pub u8, can2sb, set_can2sb: 13, 8;
    /// Filter initialization mode
    pub finit, set_finit: 0;
}

/// Memory-mapped register access for one bxCAN controller
///
/// `filter_base` is the base of the first controller; it equals `base` for
/// the first controller itself.
pub struct Mmio {
    base: NonNull<VolatileCell<u32>>,
    filter_base: NonNull<VolatileCell<u32>>,
    can_clock: HertzU32,
}

// Safety: registers are accessed with volatile word operations only, and the
// transport serializes every read-modify-write under the interrupt mask.
unsafe impl Send for Mmio {}
// Safety: see above.
unsafe impl Sync for Mmio {}

impl Mmio {
    /// # Safety
    /// `base` and `filter_base` must point to bxCAN register blocks that stay
    /// mapped for the lifetime of the value, nothing else may access them,
    /// and the peripheral clock must run at `can_clock` and not change.
    pub unsafe fn new(
        base: NonNull<()>,
        filter_base: NonNull<()>,
        can_clock: HertzU32,
    ) -> Self {
        Self {
            base: base.cast(),
            filter_base: filter_base.cast(),
            can_clock,
        }
    }

    fn cell(&self, reg: Register) -> &VolatileCell<u32> {
        let base = if reg.is_filter() {
            self.filter_base
        } else {
            self.base
        };
        // Safety: offsets come from the register map and are word aligned;
        // `new` guarantees the block is mapped.
        unsafe { &*base.as_ptr().add(reg.offset() / 4) }
    }
}

impl Registers for Mmio {
    fn read(&self, reg: Register) -> u32 {
        self.cell(reg).get()
    }

    fn write(&self, reg: Register, value: u32) {
        self.cell(reg).set(value)
    }
}

// Safety: the caller of `Mmio::new` vouched for the clock.
unsafe impl Dependencies for Mmio {
    fn can_clock(&self) -> HertzU32 {
        self.can_clock
    }
}
