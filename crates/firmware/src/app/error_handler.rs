//! Error and event reporting.
//!
//! Every report becomes an [`ErrorRecord`] stamped with a monotonic sequence
//! number (there is no calendar dependency). Records wait in a bounded ring
//! until the logger or telemetry sink drains them; when the ring is full the
//! oldest record is dropped and counted. On target each record is also
//! emitted over defmt.
//!
//! The handler is shared between thread and interrupt context, so all state
//! sits behind `critical_section::Mutex`.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use critical_section::Mutex;
use heapless::Deque;
use platform::{Error, ErrorFlag};

/// How bad a record is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Severity {
    /// Unrecoverable for the reporting subsystem.
    Critical,
    /// Recoverable; operation continued.
    NonCritical,
    /// Milestone reached.
    Success,
}

/// One report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorRecord {
    /// Record class.
    pub severity: Severity,
    /// The failure, absent for successes.
    pub error: Option<Error>,
    /// Milestone text, present for successes.
    pub message: Option<&'static str>,
    /// Sequence number; increases by one per record.
    pub timestamp: u32,
}

/// Bounded reporting ring of `N` records.
pub struct ErrorHandler<const N: usize> {
    ready: AtomicBool,
    sequence: AtomicU32,
    dropped: AtomicU32,
    records: Mutex<RefCell<Deque<ErrorRecord, N>>>,
}

impl<const N: usize> ErrorHandler<N> {
    /// Handler that rejects reports until [`Self::init`].
    pub const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            sequence: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
            records: Mutex::new(RefCell::new(Deque::new())),
        }
    }

    /// Start accepting reports, discarding anything left over.
    pub fn init(&self) {
        critical_section::with(|cs| self.records.borrow_ref_mut(cs).clear());
        self.sequence.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.ready.store(true, Ordering::Release);
    }

    fn push(&self, severity: Severity, error: Option<Error>, message: Option<&'static str>) {
        if !self.ready.load(Ordering::Acquire) {
            return;
        }
        let record = ErrorRecord {
            severity,
            error,
            message,
            timestamp: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        #[cfg(feature = "defmt")]
        defmt::info!("record: {}", record);

        critical_section::with(|cs| {
            let mut records = self.records.borrow_ref_mut(cs);
            if records.is_full() {
                records.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            // Cannot fail: a slot was freed above.
            let _ = records.push_back(record);
        });
    }

    /// Report an unrecoverable failure.
    pub fn log_critical(&self, error: &Error) {
        self.push(Severity::Critical, Some(*error), None);
    }

    /// Report every error in `flag`, plus one `Busy` record if it overflowed.
    pub fn log_non_critical(&self, flag: &ErrorFlag) {
        for error in flag.iter() {
            self.push(Severity::NonCritical, Some(*error), None);
        }
        if flag.overflow() > 0 {
            self.push(Severity::NonCritical, Some(Error::Busy), Some("error flag overflowed"));
        }
    }

    /// Report a milestone.
    pub fn log_successful(&self, message: &'static str) {
        self.push(Severity::Success, None, Some(message));
    }

    /// Oldest pending record.
    pub fn pop(&self) -> Option<ErrorRecord> {
        critical_section::with(|cs| self.records.borrow_ref_mut(cs).pop_front())
    }

    /// Pending records.
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.records.borrow_ref(cs).len())
    }

    /// `true` with nothing pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records lost to a full ring.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<const N: usize> Default for ErrorHandler<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn reports_before_init_are_ignored() {
        let handler = ErrorHandler::<4>::new();
        handler.log_critical(&Error::Timeout);
        assert!(handler.is_empty());
    }

    #[test]
    fn records_are_tagged_and_sequenced() {
        let handler = ErrorHandler::<4>::new();
        handler.init();
        handler.log_successful("boot");
        handler.log_critical(&Error::Transfer);

        let first = handler.pop().unwrap();
        assert_eq!(first.severity, Severity::Success);
        assert_eq!(first.message, Some("boot"));
        assert_eq!(first.timestamp, 0);

        let second = handler.pop().unwrap();
        assert_eq!(second.severity, Severity::Critical);
        assert_eq!(second.error, Some(Error::Transfer));
        assert_eq!(second.timestamp, 1);
        assert!(handler.pop().is_none());
    }

    #[test]
    fn flag_contents_become_non_critical_records() {
        let handler = ErrorHandler::<32>::new();
        handler.init();
        let mut flag = ErrorFlag::new();
        for _ in 0..12 {
            flag.raise(Error::Busy);
        }
        handler.log_non_critical(&flag);
        assert_eq!(handler.len(), 11);
        assert!(core::iter::from_fn(|| handler.pop()).all(|r| r.severity == Severity::NonCritical));
    }

    #[test]
    fn full_ring_drops_oldest() {
        let handler = ErrorHandler::<2>::new();
        handler.init();
        handler.log_critical(&Error::Busy);
        handler.log_critical(&Error::Transfer);
        handler.log_critical(&Error::Timeout);
        assert_eq!(handler.dropped(), 1);
        assert_eq!(handler.pop().unwrap().error, Some(Error::Transfer));
    }
}
