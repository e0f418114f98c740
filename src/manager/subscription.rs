//! Per-bus subscriber table

use crate::Error;
use core::fmt;
use generic_array::typenum::consts::U12;
use generic_array::typenum::Unsigned;
use generic_array::GenericArray;

/// Subscriber slots per bus
pub type SubscriptionCapacity = U12;

/// Receiver of inbound frames.
///
/// Called from interrupt context with interrupts enabled; may be preempted
/// and re-entered by dispatch of another frame.
pub trait RxHandler {
    /// Handles one frame. `data` holds exactly the payload bytes.
    fn on_frame(&self, id: u32, data: &[u8]);
}

/// A subscriber as stored in the table. The table borrows the handler's
/// environment for `'a`; it never owns it.
#[derive(Copy, Clone)]
pub enum Handler<'a> {
    /// Plain function, no environment
    Fn(fn(u32, &[u8])),
    /// Object implementing [`RxHandler`]
    Dyn(&'a (dyn RxHandler + Sync)),
}

impl<'a> Handler<'a> {
    /// Delivers one frame.
    pub fn call(&self, id: u32, data: &[u8]) {
        match self {
            Handler::Fn(f) => f(id, data),
            Handler::Dyn(h) => h.on_frame(id, data),
        }
    }

    fn address(&self) -> *const () {
        match self {
            Handler::Fn(f) => *f as *const (),
            Handler::Dyn(h) => {
                let ptr: *const (dyn RxHandler + Sync + 'a) = *h;
                ptr.cast()
            }
        }
    }
}

impl<'a> PartialEq for Handler<'a> {
    /// Handlers are the same subscriber when they share kind and address.
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Handler::Fn(_), Handler::Fn(_)) | (Handler::Dyn(_), Handler::Dyn(_))
        ) && self.address() == other.address()
    }
}

impl<'a> Eq for Handler<'a> {}

impl<'a> fmt::Debug for Handler<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Fn(_) => write!(f, "Fn({:p})", self.address()),
            Handler::Dyn(_) => write!(f, "Dyn({:p})", self.address()),
        }
    }
}

impl<'a> From<fn(u32, &[u8])> for Handler<'a> {
    fn from(f: fn(u32, &[u8])) -> Self {
        Handler::Fn(f)
    }
}

impl<'a> From<&'a (dyn RxHandler + Sync)> for Handler<'a> {
    fn from(h: &'a (dyn RxHandler + Sync)) -> Self {
        Handler::Dyn(h)
    }
}

/// Frame identifier paired with the handler receiving it
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Subscription<'a> {
    /// Identifier to match, 11 or 29 bits
    pub id: u32,
    /// Receiver
    pub handler: Handler<'a>,
}

/// Fixed-capacity subscriber table; entries are kept packed at the front.
pub struct SubscriptionTable<'a> {
    slots: GenericArray<Option<Subscription<'a>>, SubscriptionCapacity>,
    len: usize,
}

impl<'a> Default for SubscriptionTable<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> SubscriptionTable<'a> {
    /// Empty table.
    pub fn new() -> Self {
        Self {
            slots: GenericArray::default(),
            len: 0,
        }
    }

    /// Appends `subscription`.
    ///
    /// Fails with [`Error::ResourceBusy`] when full and with
    /// [`Error::InvalidOperation`] if the exact pair is already present.
    pub fn insert(&mut self, subscription: Subscription<'a>) -> Result<(), Error> {
        if self.iter().any(|s| s == subscription) {
            return Err(Error::InvalidOperation);
        }
        if self.is_full() {
            return Err(Error::ResourceBusy);
        }
        self.slots[self.len] = Some(subscription);
        self.len += 1;
        Ok(())
    }

    /// Removes the exact pair, moving the last entry into its slot.
    pub fn remove(&mut self, subscription: Subscription<'a>) -> Result<(), Error> {
        let index = self
            .iter()
            .position(|s| s == subscription)
            .ok_or(Error::InvalidOperation)?;
        let last = self.len - 1;
        self.slots.swap(index, last);
        self.slots[last] = None;
        self.len = last;
        Ok(())
    }

    /// Copies out every handler subscribed to `id`.
    pub fn matching(&self, id: u32) -> Matches<'a> {
        let mut matches = Matches::default();
        for s in self.iter().filter(|s| s.id == id) {
            matches.handlers[matches.len] = Some(s.handler);
            matches.len += 1;
        }
        matches
    }

    /// Subscriptions in table order.
    pub fn iter(&self) -> impl Iterator<Item = Subscription<'a>> + '_ {
        self.slots[..self.len].iter().flatten().copied()
    }

    /// Number of subscriptions.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nobody subscribed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if another insert would fail.
    pub fn is_full(&self) -> bool {
        self.len == SubscriptionCapacity::USIZE
    }
}

/// Handlers copied out of a [`SubscriptionTable`], so they can be invoked
/// after the table is released.
pub struct Matches<'a> {
    handlers: GenericArray<Option<Handler<'a>>, SubscriptionCapacity>,
    len: usize,
}

impl<'a> Default for Matches<'a> {
    fn default() -> Self {
        Self {
            handlers: GenericArray::default(),
            len: 0,
        }
    }
}

impl<'a> Matches<'a> {
    /// Matched handlers in table order.
    pub fn iter(&self) -> impl Iterator<Item = &Handler<'a>> + '_ {
        self.handlers[..self.len].iter().flatten()
    }

    /// Number of matched handlers.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no handler matched.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
