//! Error taxonomy shared by every driver.
//!
//! Fallible operations return [`Result`]. Callers that want to batch
//! non-fatal failures (system bring-up, for instance) record them in an
//! [`ErrorFlag`] and report the whole set once.

use heapless::Vec;

/// Why an operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A configuration or argument was rejected before touching hardware.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The stream or peripheral already has a transfer in flight.
    #[error("resource busy")]
    Busy,
    /// Hardware reported a transfer error.
    #[error("transfer error")]
    Transfer,
    /// A bounded wait for hardware acknowledgement expired.
    #[error("timed out waiting for hardware")]
    Timeout,
}

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;

/// Maximum number of errors an [`ErrorFlag`] retains.
pub const ERROR_FLAG_CAPACITY: usize = 10;

/// Append-only record of errors raised during a multi-step operation.
///
/// The first [`ERROR_FLAG_CAPACITY`] errors are kept; later ones only bump
/// the overflow counter.
#[derive(Debug, Clone, Default)]
pub struct ErrorFlag {
    errors: Vec<Error, ERROR_FLAG_CAPACITY>,
    overflow: u32,
}

impl ErrorFlag {
    /// Empty flag.
    pub const fn new() -> Self {
        Self {
            errors: Vec::new(),
            overflow: 0,
        }
    }

    /// Record `error`.
    pub fn raise(&mut self, error: Error) {
        if self.errors.push(error).is_err() {
            self.overflow = self.overflow.saturating_add(1);
        }
    }

    /// Record the error of `result`, if any, and hand back its value.
    pub fn check<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.raise(error);
                None
            }
        }
    }

    /// `true` once any error has been raised.
    pub fn is_raised(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Errors that did not fit in the record.
    pub fn overflow(&self) -> u32 {
        self.overflow
    }

    /// Total number of errors raised, including overflow.
    pub fn count(&self) -> u32 {
        u32::try_from(self.errors.len())
            .unwrap_or(u32::MAX)
            .saturating_add(self.overflow)
    }

    /// Retained errors, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.errors.iter()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.errors.clear();
        self.overflow = 0;
    }
}
