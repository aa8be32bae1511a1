//! Completion bookkeeping shared by the DMA-backed peripheral drivers.
//!
//! A transfer uses one or two streams. Each stream's completion reports to
//! [`TransferState::complete_one`]; the last one yields the aggregate
//! outcome, and the driver then finishes the transfer (chip select, flags)
//! and calls [`TransferState::finish`], which releases the instance, wakes
//! any async waiter and runs the user callback.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use critical_section::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::error::{Error, Result};
use crate::peripheral::Completion;

/// Busy flag, stream countdown and completion fan-out of one instance.
pub struct TransferState {
    busy: AtomicBool,
    remaining: AtomicU8,
    failed: AtomicBool,
    callback: Mutex<Cell<Option<Completion>>>,
    done: Signal<CriticalSectionRawMutex, bool>,
}

impl TransferState {
    /// Idle state with no callback.
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            remaining: AtomicU8::new(0),
            failed: AtomicBool::new(false),
            callback: Mutex::new(Cell::new(None)),
            done: Signal::new(),
        }
    }

    /// Install the user callback run at the end of every transfer.
    pub fn set_callback(&self, callback: Option<Completion>) {
        critical_section::with(|cs| self.callback.borrow(cs).set(callback));
    }

    /// Claim the instance for a transfer over `streams` streams.
    pub fn begin(&self, streams: u8) -> Result<()> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy)?;
        self.failed.store(false, Ordering::Relaxed);
        self.remaining.store(streams, Ordering::Release);
        self.done.reset();
        Ok(())
    }

    /// Give the instance back after a start that never reached hardware.
    pub fn abort(&self) {
        self.remaining.store(0, Ordering::Relaxed);
        self.busy.store(false, Ordering::Release);
    }

    /// Count one stream as finished. Returns the aggregate outcome once every
    /// stream has reported.
    pub fn complete_one(&self, ok: bool) -> Option<bool> {
        if !ok {
            self.failed.store(true, Ordering::Release);
        }
        let before = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()?;
        (before == 1).then(|| !self.failed.load(Ordering::Acquire))
    }

    /// Release the instance and deliver `ok` to waiters and the callback.
    pub fn finish(&self, ok: bool) {
        if !ok {
            self.failed.store(true, Ordering::Release);
        }
        self.busy.store(false, Ordering::Release);
        self.done.signal(ok);
        let callback = critical_section::with(|cs| self.callback.borrow(cs).get());
        if let Some(callback) = callback {
            callback(ok);
        }
    }

    /// `true` while a transfer is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Poll the busy flag at most `retries` times.
    ///
    /// On `Timeout` the transfer is still in flight and the instance stays
    /// busy until its streams complete.
    pub fn wait_blocking(&self, retries: u32) -> Result<()> {
        for _ in 0..retries {
            if !self.is_busy() {
                return if self.failed.load(Ordering::Acquire) {
                    Err(Error::Transfer)
                } else {
                    Ok(())
                };
            }
            core::hint::spin_loop();
        }
        warn!("transfer: blocking wait timed out");
        Err(Error::Timeout)
    }

    /// Wait for the current transfer to finish.
    pub async fn wait(&self) -> Result<()> {
        if self.done.wait().await {
            Ok(())
        } else {
            Err(Error::Transfer)
        }
    }
}

impl Default for TransferState {
    fn default() -> Self {
        Self::new()
    }
}
