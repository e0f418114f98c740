//! Scoped global interrupt masking
//!
//! Every table shared between tasks and interrupt handlers is touched only
//! while a [`MaskGuard`] is alive. Masked regions must stay bounded by a scan
//! over one fixed-capacity table.

use core::marker::PhantomData;
use critical_section::{CriticalSection, RestoreState};

/// Holds the global interrupt mask for as long as it lives.
///
/// The mask state saved on [`acquire`](MaskGuard::acquire) is restored when
/// the guard drops, including on early return and unwinding. Guards nest;
/// they must be dropped in reverse order of acquisition, which scoping
/// ensures.
pub struct MaskGuard {
    restore: RestoreState,
    // Releasing on another core or thread than the acquiring one is unsound.
    _not_send: PhantomData<*mut ()>,
}

impl MaskGuard {
    /// Masks interrupts.
    pub fn acquire() -> Self {
        // Safety: the matching release happens in `Drop`.
        let restore = unsafe { critical_section::acquire() };
        Self {
            restore,
            _not_send: PhantomData,
        }
    }

    /// Token proving that interrupts are masked, for borrowing
    /// [`critical_section::Mutex`] contents.
    pub fn token(&self) -> CriticalSection<'_> {
        // Safety: the token cannot outlive the guard that holds the mask.
        unsafe { CriticalSection::new() }
    }
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        // Safety: `restore` came from the `acquire` in the constructor and
        // guards are released in reverse order of acquisition.
        unsafe { critical_section::release(self.restore) }
    }
}

/// Runs `f` with interrupts masked.
pub fn masked<R>(f: impl FnOnce(CriticalSection<'_>) -> R) -> R {
    let guard = MaskGuard::acquire();
    f(guard.token())
}
