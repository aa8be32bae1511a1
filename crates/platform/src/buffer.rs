//! Statically allocated DMA buffers.
//!
//! DMA1/DMA2 read and write memory behind the CPU's back, so a buffer handed
//! to a stream must stay put and untouched until the transfer completes. A
//! [`DmaBuffer`] lives in a `static`; lending part of it produces a
//! [`Region`] carrying the bus address and length, and the buffer refuses CPU
//! access until that region is dropped. Drivers keep the regions of an
//! in-flight transfer and drop them from the completion path.
//!
//! Buffers must sit in memory DMA1/DMA2 can reach (AXI SRAM or SRAM1..3,
//! never DTCM).

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::dma::address_of;
use crate::error::{Error, Result};

/// `N`-byte buffer that can be lent to a DMA stream.
pub struct DmaBuffer<const N: usize> {
    data: UnsafeCell<[u8; N]>,
    lent: AtomicBool,
}

// SAFETY: the contents are only reachable while `lent` is held, either by
// `with` for the duration of a closure or by a live `Region`.
unsafe impl<const N: usize> Sync for DmaBuffer<N> {}

impl<const N: usize> DmaBuffer<N> {
    /// Zero-filled buffer.
    pub const fn new() -> Self {
        Self {
            data: UnsafeCell::new([0; N]),
            lent: AtomicBool::new(false),
        }
    }

    /// Capacity in bytes.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// `true` while a region of this buffer is lent out.
    pub fn is_lent(&self) -> bool {
        self.lent.load(Ordering::Acquire)
    }

    fn acquire(&self) -> Result<()> {
        self.lent
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map(|_| ())
            .map_err(|_| Error::Busy)
    }

    /// Run `f` over the contents. Fails with `Busy` while lent.
    pub fn with<R>(&self, f: impl FnOnce(&mut [u8; N]) -> R) -> Result<R> {
        self.acquire()?;
        // SAFETY: `lent` is held, so neither a stream nor another `with`
        // can reach the contents until it is released below.
        let result = f(unsafe { &mut *self.data.get() });
        self.lent.store(false, Ordering::Release);
        Ok(result)
    }

    /// Lend the first `len` bytes to a transfer.
    pub fn region(&'static self, len: usize) -> Result<Region> {
        if len == 0 || len > N {
            return Err(Error::InvalidConfig("buffer length out of range"));
        }
        let len = u32::try_from(len).map_err(|_| Error::InvalidConfig("buffer length out of range"))?;
        self.acquire()?;
        Ok(Region {
            address: address_of(self.data.get()),
            len,
            lent: &self.lent,
        })
    }
}

impl<const N: usize> Default for DmaBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// A lent stretch of a [`DmaBuffer`]. Dropping it returns the buffer.
#[derive(Debug)]
pub struct Region {
    address: u32,
    len: u32,
    lent: &'static AtomicBool,
}

impl Region {
    /// Bus address of the first byte.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Length in bytes.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Always `false`; regions are never empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        self.lent.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::boxed::Box;

    fn leaked<const N: usize>() -> &'static DmaBuffer<N> {
        Box::leak(Box::new(DmaBuffer::new()))
    }

    #[test]
    fn lending_blocks_cpu_access() {
        let buf = leaked::<16>();
        let region = buf.region(8).unwrap();
        assert_eq!(region.len(), 8);
        assert_eq!(buf.with(|_| ()), Err(Error::Busy));
        assert_eq!(buf.region(4).unwrap_err(), Error::Busy);
        drop(region);
        buf.with(|data| data[0] = 7).unwrap();
        assert_eq!(buf.with(|data| data[0]).unwrap(), 7);
    }

    #[test]
    fn region_length_is_bounded() {
        let buf = leaked::<4>();
        assert!(buf.region(0).is_err());
        assert!(buf.region(5).is_err());
        assert!(!buf.is_lent());
        assert_eq!(buf.region(4).unwrap().address(), address_of(buf.data.get()));
    }
}
