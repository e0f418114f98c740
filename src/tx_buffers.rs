//! Transmit mailboxes

use crate::core::{Register, Registers, MAILBOXES};
use crate::message::{CanFrame, MailboxFrame};
use crate::reg::Tsr;
use core::convert::Infallible;

/// The three transmit mailboxes of one controller.
///
/// Submission is never retried here: a full set of mailboxes is reported as
/// [`nb::Error::WouldBlock`] and the caller decides what to do.
pub struct Mailboxes<'a, R> {
    regs: &'a R,
}

impl<'a, R: Registers> Mailboxes<'a, R> {
    pub(crate) fn new(regs: &'a R) -> Self {
        Self { regs }
    }

    fn status(&self) -> Tsr {
        Tsr(self.regs.read(Register::Tsr))
    }

    /// Mailboxes that can take a frame right now.
    pub fn free(&self) -> MailboxSet {
        let tsr = self.status();
        (0..MAILBOXES).filter(|&n| tsr.tme(n)).collect()
    }

    /// Mailboxes whose last request finished since the flags were last
    /// acknowledged.
    pub fn completed(&self) -> MailboxSet {
        let tsr = self.status();
        (0..MAILBOXES).filter(|&n| tsr.rqcp(n)).collect()
    }

    /// Clears the request-completed flags of `mailboxes`.
    pub fn acknowledge(&self, mailboxes: MailboxSet) {
        self.regs.write(Register::Tsr, Tsr::clear_rqcp(mailboxes.iter()).0);
    }

    /// Places `frame` in the lowest free mailbox and requests transmission.
    /// Returns the index of the mailbox used.
    ///
    /// Must not race with another submission on the same controller.
    pub fn transmit(&self, frame: &CanFrame) -> nb::Result<usize, Infallible> {
        let index = self.free().iter().next().ok_or(nb::Error::WouldBlock)?;
        let mut words = MailboxFrame::from(frame);
        self.regs.write(Register::Tir(index), words.id.0);
        self.regs.write(Register::Tdtr(index), words.length.0);
        self.regs.write(Register::Tdlr(index), words.data_low);
        self.regs.write(Register::Tdhr(index), words.data_high);
        words.id.set_txrq(true);
        self.regs.write(Register::Tir(index), words.id.0);
        Ok(index)
    }
}

/// A set of mailbox indices
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MailboxSet(pub u8);

impl FromIterator<usize> for MailboxSet {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        let mut set = 0_u8;
        for i in iter.into_iter() {
            set |= 1u8 << i;
        }
        MailboxSet(set)
    }
}

impl MailboxSet {
    /// Every mailbox
    pub fn all() -> Self {
        (0..MAILBOXES).collect()
    }

    /// Number of mailboxes in the set.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns `true` if the set holds no mailbox.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// An iterator visiting all elements in ascending order.
    pub fn iter(&self) -> Iter {
        Iter {
            flags: *self,
            index: 0,
        }
    }
}

/// An iterator over the mailbox indices of a [`MailboxSet`].
///
/// This `struct` is created by [`MailboxSet::iter`].
pub struct Iter {
    flags: MailboxSet,
    index: u8,
}

impl Iterator for Iter {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        while usize::from(self.index) < MAILBOXES {
            let i = self.index;
            self.index += 1;
            if self.flags.0 & (1 << i) != 0 {
                return Some(i.into());
            }
        }
        None
    }
}
