//! Single-owner peripheral registry
//!
//! Maps every peripheral of the node to the opaque hardware handle the target
//! HAL registered for it, and tracks whether some driver currently owns it.
//! Handles are registered once at startup; ownership toggles through
//! [`DeviceRegistry::start_device`] and [`DeviceRegistry::stop_device`].

use crate::mask::MaskGuard;
use crate::Error;
use core::cell::RefCell;
use core::ops::Range;
use core::ptr::NonNull;
use critical_section::Mutex;

/// Peripheral kinds and their slice of the identity space.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Kind {
    /// Basic and general purpose timers 1, 2, 3, 6, 7
    Timer,
    /// bxCAN controllers 1, 2
    Can,
    /// U(S)ARTs 4, 6, 7
    Usart,
    /// PWM timers 12, 3, 4
    Pwm,
    /// SPI 1, 2, 3
    Spi,
}

impl Kind {
    /// Identifiers belonging to this kind.
    pub const fn range(self) -> Range<u8> {
        match self {
            Kind::Timer => 0..5,
            Kind::Can => 5..7,
            Kind::Usart => 7..10,
            Kind::Pwm => 10..13,
            Kind::Spi => 13..16,
        }
    }
}

/// Identity of one peripheral.
///
/// Only constructible through the range checked conversions and the
/// constants below, so a `PeripheralId` always indexes a valid slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeripheralId(u8);

#[allow(missing_docs)]
impl PeripheralId {
    pub const TIMER_1: Self = Self(0);
    pub const TIMER_2: Self = Self(1);
    pub const TIMER_3: Self = Self(2);
    pub const TIMER_6: Self = Self(3);
    pub const TIMER_7: Self = Self(4);
    pub const CAN_1: Self = Self(5);
    pub const CAN_2: Self = Self(6);
    pub const USART_4: Self = Self(7);
    pub const USART_6: Self = Self(8);
    pub const USART_7: Self = Self(9);
    pub const PWM_12: Self = Self(10);
    pub const PWM_3: Self = Self(11);
    pub const PWM_4: Self = Self(12);
    pub const SPI_1: Self = Self(13);
    pub const SPI_2: Self = Self(14);
    pub const SPI_3: Self = Self(15);
}

impl PeripheralId {
    /// Size of the identity space.
    pub const COUNT: usize = 16;

    /// The `index`th peripheral of `kind`, counting from zero.
    pub fn new(kind: Kind, index: u8) -> Result<Self, Error> {
        let range = kind.range();
        let raw = range.start.checked_add(index).ok_or(Error::InvalidDevice)?;
        if range.contains(&raw) {
            Ok(Self(raw))
        } else {
            Err(Error::InvalidDevice)
        }
    }

    /// Kind of peripheral this identifier names.
    pub fn kind(self) -> Kind {
        match self.0 {
            0..=4 => Kind::Timer,
            5..=6 => Kind::Can,
            7..=9 => Kind::Usart,
            10..=12 => Kind::Pwm,
            _ => Kind::Spi,
        }
    }

    /// Checks that this identifier names a peripheral of `kind`.
    pub fn expect_kind(self, kind: Kind) -> Result<Self, Error> {
        if kind.range().contains(&self.0) {
            Ok(self)
        } else {
            Err(Error::InvalidDevice)
        }
    }

    /// Position in the identity space.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u8> for PeripheralId {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self, Error> {
        if (raw as usize) < Self::COUNT {
            Ok(Self(raw))
        } else {
            Err(Error::InvalidDevice)
        }
    }
}

/// Opaque reference to a peripheral's hardware instance, typically the base
/// address of its register block.
///
/// The registry never dereferences a handle; it only stores and compares it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Handle(NonNull<()>);

// Safety: a handle is an address used as a key, never dereferenced here.
unsafe impl Send for Handle {}
// Safety: see above.
unsafe impl Sync for Handle {}

impl Handle {
    /// Wraps a raw address, rejecting null.
    pub fn new(ptr: *const ()) -> Result<Self, Error> {
        NonNull::new(ptr.cast_mut())
            .map(Handle)
            .ok_or(Error::NullHandle)
    }

    /// Handle naming a statically allocated object.
    pub fn from_static<T>(object: &'static T) -> Self {
        Handle(NonNull::from(object).cast())
    }

    /// The wrapped address.
    pub fn as_ptr(self) -> *const () {
        self.0.as_ptr()
    }
}

/// Ownership state of one peripheral.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceStatus {
    /// Nobody claimed the peripheral
    Free,
    /// Some driver owns the peripheral
    InUse,
}

#[derive(Copy, Clone)]
struct Slot {
    handle: Option<Handle>,
    in_use: bool,
}

impl Slot {
    const EMPTY: Slot = Slot {
        handle: None,
        in_use: false,
    };
}

/// Table of every peripheral slot
///
/// Usually placed in a `static` and shared by reference:
///
/// ```
/// use canbroker::registry::{DeviceRegistry, Handle, PeripheralId};
///
/// static REGISTRY: DeviceRegistry = DeviceRegistry::new();
/// static CAN1_REGS: u32 = 0x4000_6400;
///
/// REGISTRY
///     .set_handle(PeripheralId::CAN_1, Handle::from_static(&CAN1_REGS))
///     .unwrap();
/// REGISTRY.start_device(PeripheralId::CAN_1).unwrap();
/// assert!(REGISTRY.start_device(PeripheralId::CAN_1).is_err());
/// ```
pub struct DeviceRegistry {
    slots: Mutex<RefCell<[Slot; PeripheralId::COUNT]>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    /// Registry with no handles and nothing claimed.
    pub const fn new() -> Self {
        Self {
            slots: Mutex::new(RefCell::new([Slot::EMPTY; PeripheralId::COUNT])),
        }
    }

    fn with_slots<R>(&self, f: impl FnOnce(&mut [Slot; PeripheralId::COUNT]) -> R) -> R {
        let guard = MaskGuard::acquire();
        let mut slots = self.slots.borrow_ref_mut(guard.token());
        f(&mut slots)
    }

    /// Associates `handle` with `id`, replacing any earlier handle.
    pub fn set_handle(&self, id: PeripheralId, handle: Handle) -> Result<(), Error> {
        self.with_slots(|slots| slots[id.index()].handle = Some(handle));
        Ok(())
    }

    /// Handle registered for `id`.
    pub fn handle(&self, id: PeripheralId) -> Result<Handle, Error> {
        self.with_slots(|slots| slots[id.index()].handle)
            .ok_or(Error::NullHandle)
    }

    /// Reverse lookup used by interrupt trampolines.
    pub fn find_id_by_handle(&self, handle: Handle) -> Result<PeripheralId, Error> {
        self.with_slots(|slots| {
            slots
                .iter()
                .position(|slot| slot.handle == Some(handle))
                .map(|index| PeripheralId(index as u8))
        })
        .ok_or(Error::NotFound)
    }

    /// Claims `id` for the caller.
    pub fn start_device(&self, id: PeripheralId) -> Result<(), Error> {
        self.with_slots(|slots| {
            let slot = &mut slots[id.index()];
            if slot.in_use {
                return Err(Error::AlreadyInUse);
            }
            slot.in_use = true;
            Ok(())
        })
    }

    /// Releases the claim on `id`.
    ///
    /// Releasing a peripheral nobody claimed reports [`Error::DeviceBusy`].
    pub fn stop_device(&self, id: PeripheralId) -> Result<(), Error> {
        self.with_slots(|slots| {
            let slot = &mut slots[id.index()];
            if !slot.in_use {
                return Err(Error::DeviceBusy);
            }
            slot.in_use = false;
            Ok(())
        })
    }

    /// Current ownership state of `id`.
    pub fn status(&self, id: PeripheralId) -> DeviceStatus {
        if self.with_slots(|slots| slots[id.index()].in_use) {
            DeviceStatus::InUse
        } else {
            DeviceStatus::Free
        }
    }
}
