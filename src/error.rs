//! Crate-wide error type

use core::fmt;

/// Failure reported by the registry, the transport or the bus manager.
///
/// Nothing in this crate retries on its own; every variant is handed back to
/// the caller, which decides whether to try again later.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Malformed identifier, payload length, baud rate or filter bank
    InvalidParam,
    /// Identifier outside the range of the requested peripheral kind
    InvalidDevice,
    /// No hardware handle registered, or the controller was never
    /// initialized
    NullHandle,
    /// Handle not present in the registry
    NotFound,
    /// Peripheral already claimed by another owner
    AlreadyInUse,
    /// Hardware resource occupied, e.g. all transmit mailboxes are pending
    DeviceBusy,
    /// Software table or queue is full
    ResourceBusy,
    /// Call made out of protocol order, or no matching entry to remove
    InvalidOperation,
    /// Clock and baud rate combination without a verified timing
    UnsupportedConfig,
    /// Controller did not accept the programmed configuration
    HardwareError,
    /// Controller did not acknowledge a mode change in time
    Timeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::InvalidParam => "invalid parameter",
            Error::InvalidDevice => "invalid device",
            Error::NullHandle => "no hardware handle",
            Error::NotFound => "handle not registered",
            Error::AlreadyInUse => "device already in use",
            Error::DeviceBusy => "device busy",
            Error::ResourceBusy => "resource busy",
            Error::InvalidOperation => "invalid operation",
            Error::UnsupportedConfig => "unsupported configuration",
            Error::HardwareError => "hardware error",
            Error::Timeout => "timeout",
        };
        f.write_str(msg)
    }
}

impl embedded_can::Error for Error {
    fn kind(&self) -> embedded_can::ErrorKind {
        embedded_can::ErrorKind::Other
    }
}
