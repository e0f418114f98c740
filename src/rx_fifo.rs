//! Receive FIFOs

use crate::core::{Register, Registers};
use crate::message::{CanFrame, DataLengthRegister, IdentifierRegister, MailboxFrame};
use crate::reg::Rfr;
use core::convert::Infallible;

/// Receive FIFO selector
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fifo {
    /// FIFO 0
    #[default]
    Fifo0,
    /// FIFO 1
    Fifo1,
}

impl Fifo {
    /// Hardware index of the FIFO.
    pub fn index(self) -> usize {
        match self {
            Fifo::Fifo0 => 0,
            Fifo::Fifo1 => 1,
        }
    }
}

/// Depth of each receive FIFO
pub const FIFO_DEPTH: usize = 3;

/// One receive FIFO of a controller.
pub struct RxFifo<'a, R> {
    regs: &'a R,
    fifo: Fifo,
}

impl<'a, R: Registers> RxFifo<'a, R> {
    pub(crate) fn new(regs: &'a R, fifo: Fifo) -> Self {
        Self { regs, fifo }
    }

    fn status(&self) -> Rfr {
        Rfr(self.regs.read(Register::Rfr(self.fifo.index())))
    }

    /// Returns the number of elements in the queue
    pub fn len(&self) -> usize {
        self.status().fmp().into()
    }

    /// Returns `true` if no frame is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of elements the queue can hold
    pub fn capacity(&self) -> usize {
        FIFO_DEPTH
    }

    /// Returns `true` if a frame was dropped because the FIFO was full
    pub fn overrun(&self) -> bool {
        self.status().fovr()
    }

    /// Returns a received frame if available, releasing its FIFO slot
    pub fn receive(&self) -> nb::Result<CanFrame, Infallible> {
        if self.is_empty() {
            return Err(nb::Error::WouldBlock);
        }
        let n = self.fifo.index();
        let words = MailboxFrame {
            id: IdentifierRegister(self.regs.read(Register::Rir(n))),
            length: DataLengthRegister(self.regs.read(Register::Rdtr(n))),
            data_low: self.regs.read(Register::Rdlr(n)),
            data_high: self.regs.read(Register::Rdhr(n)),
        };
        let mut release = Rfr(0);
        release.set_rfom(true);
        self.regs.write(Register::Rfr(n), release.0);
        Ok(words.decode())
    }
}
