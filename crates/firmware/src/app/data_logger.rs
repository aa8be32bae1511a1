//! Staging log for flash.
//!
//! Collected readings are appended as little-endian `i32` records to an
//! in-RAM staging area that a flash writer drains. A batch that does not fit
//! is rejected whole with `Busy`; nothing is partially written.

use heapless::Vec;
use platform::{Error, Result};

/// Bytes per record.
pub const RECORD_BYTES: usize = 4;

/// Append-only staging log of `N` bytes.
#[derive(Debug)]
pub struct DataLogger<const N: usize> {
    staged: Vec<u8, N>,
    records: u32,
}

impl<const N: usize> DataLogger<N> {
    /// Empty log.
    pub const fn new() -> Self {
        Self {
            staged: Vec::new(),
            records: 0,
        }
    }

    /// Append `readings`. Returns the staged size in bytes.
    pub fn start(&mut self, readings: &[i32]) -> Result<usize> {
        let needed = readings
            .len()
            .checked_mul(RECORD_BYTES)
            .ok_or(Error::InvalidConfig("batch too large"))?;
        if needed > N.saturating_sub(self.staged.len()) {
            warn_full(needed);
            return Err(Error::Busy);
        }
        for reading in readings {
            self.staged
                .extend_from_slice(&reading.to_le_bytes())
                .map_err(|_| Error::Busy)?;
            self.records = self.records.saturating_add(1);
        }
        Ok(self.staged.len())
    }

    /// Staged bytes, oldest first.
    pub fn staged(&self) -> &[u8] {
        &self.staged
    }

    /// Records appended since the last [`Self::erase`].
    pub fn records(&self) -> u32 {
        self.records
    }

    /// Decode the staged records.
    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.staged
            .chunks_exact(RECORD_BYTES)
            .filter_map(|chunk| chunk.try_into().ok().map(i32::from_le_bytes))
    }

    /// Forget everything staged, after it has been committed to flash.
    pub fn erase(&mut self) {
        self.staged.clear();
        self.records = 0;
    }
}

impl<const N: usize> Default for DataLogger<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "defmt")]
fn warn_full(needed: usize) {
    defmt::warn!("logger: staging full, {} bytes rejected", needed);
}

#[cfg(not(feature = "defmt"))]
fn warn_full(_needed: usize) {}
