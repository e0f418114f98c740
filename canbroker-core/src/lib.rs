#![no_std]
#![warn(missing_docs)]

//! `canbroker-core` provides the thin integration layer between the platform
//! independent [`canbroker`] crate and platform specific HAL crates (in
//! documentation also referred to as _target HALs_).
//!
//! A target HAL exposes every bxCAN controller it owns as a type implementing
//! [`Registers`] and [`Dependencies`]. Nothing else about the platform leaks
//! into [`canbroker`]: clocks, pins and the interrupt controller stay the
//! target HAL's business.
//!
//! Integrators of this crate into any given target HAL are responsible for
//! soundness of trait implementations and conforming to their respective safety
//! prerequisites.
//!
//! [`canbroker`]: <https://docs.rs/crate/canbroker/>

pub use fugit;

/// Number of transmit mailboxes on every controller.
pub const MAILBOXES: usize = 3;
/// Number of receive FIFOs on every controller.
pub const FIFOS: usize = 2;
/// Number of filter banks shared by both controllers.
pub const FILTER_BANKS: usize = 28;

/// Word-sized registers of a bxCAN controller.
///
/// Indexed variants carry the mailbox, FIFO or filter bank number. Indices are
/// always in range when produced by [`canbroker`]; implementations may assume
/// so.
///
/// [`canbroker`]: <https://docs.rs/crate/canbroker/>
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Register {
    /// Master control
    Mcr,
    /// Master status
    Msr,
    /// Transmit status
    Tsr,
    /// Receive FIFO `n` status
    Rfr(usize),
    /// Interrupt enable
    Ier,
    /// Error status
    Esr,
    /// Bit timing
    Btr,
    /// Mailbox `n` identifier
    Tir(usize),
    /// Mailbox `n` data length and time stamp
    Tdtr(usize),
    /// Mailbox `n` data bytes 0..4
    Tdlr(usize),
    /// Mailbox `n` data bytes 4..8
    Tdhr(usize),
    /// FIFO `n` output identifier
    Rir(usize),
    /// FIFO `n` output data length and time stamp
    Rdtr(usize),
    /// FIFO `n` output data bytes 0..4
    Rdlr(usize),
    /// FIFO `n` output data bytes 4..8
    Rdhr(usize),
    /// Filter master
    Fmr,
    /// Filter mode (mask or list) per bank
    Fm1r,
    /// Filter scale (16 or 32 bit) per bank
    Fs1r,
    /// Filter FIFO assignment per bank
    Ffa1r,
    /// Filter activation per bank
    Fa1r,
    /// Filter bank `n` register 1
    Fr1(usize),
    /// Filter bank `n` register 2
    Fr2(usize),
}

impl Register {
    /// Byte offset of the register from the start of the register block.
    pub const fn offset(self) -> usize {
        match self {
            Register::Mcr => 0x000,
            Register::Msr => 0x004,
            Register::Tsr => 0x008,
            Register::Rfr(n) => 0x00C + 4 * n,
            Register::Ier => 0x014,
            Register::Esr => 0x018,
            Register::Btr => 0x01C,
            Register::Tir(n) => 0x180 + 0x10 * n,
            Register::Tdtr(n) => 0x184 + 0x10 * n,
            Register::Tdlr(n) => 0x188 + 0x10 * n,
            Register::Tdhr(n) => 0x18C + 0x10 * n,
            Register::Rir(n) => 0x1B0 + 0x10 * n,
            Register::Rdtr(n) => 0x1B4 + 0x10 * n,
            Register::Rdlr(n) => 0x1B8 + 0x10 * n,
            Register::Rdhr(n) => 0x1BC + 0x10 * n,
            Register::Fmr => 0x200,
            Register::Fm1r => 0x204,
            Register::Fs1r => 0x20C,
            Register::Ffa1r => 0x214,
            Register::Fa1r => 0x21C,
            Register::Fr1(n) => 0x240 + 8 * n,
            Register::Fr2(n) => 0x244 + 8 * n,
        }
    }

    /// Filter registers exist only in the block of the first controller; the
    /// second controller reaches them through the first one.
    pub const fn is_filter(self) -> bool {
        matches!(
            self,
            Register::Fmr
                | Register::Fm1r
                | Register::Fs1r
                | Register::Ffa1r
                | Register::Fa1r
                | Register::Fr1(_)
                | Register::Fr2(_)
        )
    }
}

/// Word access to the registers of one bxCAN controller
///
/// Access goes through `&self` because hardware registers are shared between
/// thread mode and interrupt handlers anyway; the abstractions in
/// [`canbroker`] serialize every read-modify-write sequence themselves.
///
/// Implementations must route [`Register::is_filter`] registers to the filter
/// block of the first controller.
///
/// # Example
/// ```no_run
/// use canbroker_core::{Register, Registers};
///
/// struct Can1;
///
/// impl Registers for Can1 {
///     fn read(&self, reg: Register) -> u32 {
///         let addr = (0x4000_6400 + reg.offset()) as *const u32;
///         unsafe { addr.read_volatile() }
///     }
///
///     fn write(&self, reg: Register, value: u32) {
///         let addr = (0x4000_6400 + reg.offset()) as *mut u32;
///         unsafe { addr.write_volatile(value) }
///     }
/// }
/// ```
///
/// [`canbroker`]: <https://docs.rs/crate/canbroker/>
pub trait Registers {
    /// Reads the current value of `reg`.
    fn read(&self, reg: Register) -> u32;
    /// Writes `value` to `reg`.
    fn write(&self, reg: Register, value: u32);
    /// Reads `reg`, passes it through `f` and writes the result back.
    fn modify<F: FnOnce(u32) -> u32>(&self, reg: Register, f: F) {
        let value = self.read(reg);
        self.write(reg, f(value));
    }
}

/// Trait representing CAN peripheral dependencies
///
/// Structs implementing [`Dependencies`] should
/// - enclose all object representable dependencies of the controller (clock
///   gate, pins) and release them upon destruction
/// - be constructible only when it is safe and sound to interact with the
///   controller
/// - be a singleton per controller
///
/// # Safety
/// While a [`Dependencies`] instance exists
/// - the APB clock feeding the controller must not change
/// - the controller pins must stay in their CAN alternate function
/// - the register block must not be accessed outside of [`Registers`]
pub unsafe trait Dependencies {
    /// Frequency of the peripheral clock feeding the bit timing logic.
    fn can_clock(&self) -> fugit::HertzU32;
}
