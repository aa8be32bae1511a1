//! Memory-mapped register access.
//!
//! Every driver in this crate programs hardware through the [`Mmio`] trait
//! instead of raw pointers. On target the bus is [`VolatileMmio`]; host tests
//! use [`crate::sim::SimBus`], a register file that models the few hardware
//! side effects the drivers rely on.
//!
//! Addresses are 32-bit physical bus addresses, matching the Cortex-M7/M4
//! address space.

/// A bit field inside a 32-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Bit position of the least-significant bit.
    pub offset: u32,
    /// Width in bits (1..=32).
    pub width: u32,
}

impl Field {
    /// Describe a field of `width` bits starting at bit `offset`.
    pub const fn new(offset: u32, width: u32) -> Self {
        Self { offset, width }
    }

    /// Single-bit field at `offset`.
    pub const fn bit(offset: u32) -> Self {
        Self { offset, width: 1 }
    }

    /// Unshifted mask covering `width` bits.
    pub const fn value_mask(self) -> u32 {
        match 1u32.checked_shl(self.width) {
            Some(top) => top.wrapping_sub(1),
            None => u32::MAX,
        }
    }

    /// Mask of the field in register position.
    pub const fn mask(self) -> u32 {
        self.value_mask().wrapping_shl(self.offset)
    }

    /// Place `value` into register position, truncated to the field width.
    pub const fn encode(self, value: u32) -> u32 {
        (value & self.value_mask()).wrapping_shl(self.offset)
    }

    /// Extract the field from a full register value.
    pub const fn decode(self, reg: u32) -> u32 {
        reg.wrapping_shr(self.offset) & self.value_mask()
    }
}

/// 32-bit register bus.
///
/// Implementations must be usable through a shared reference: drivers keep
/// the bus by value inside `static` instances and touch it from both thread
/// and interrupt context.
pub trait Mmio {
    /// Read the word at `addr`.
    fn read(&self, addr: u32) -> u32;

    /// Write `value` to the word at `addr`.
    fn write(&self, addr: u32, value: u32);

    /// Read-modify-write.
    fn modify(&self, addr: u32, f: impl FnOnce(u32) -> u32) {
        let value = self.read(addr);
        self.write(addr, f(value));
    }

    /// Set every bit in `mask`.
    fn set_bits(&self, addr: u32, mask: u32) {
        self.modify(addr, |v| v | mask);
    }

    /// Clear every bit in `mask`.
    fn clear_bits(&self, addr: u32, mask: u32) {
        self.modify(addr, |v| v & !mask);
    }

    /// `true` when every bit in `mask` reads as one.
    fn bits_set(&self, addr: u32, mask: u32) -> bool {
        self.read(addr) & mask == mask
    }

    /// Read one field.
    fn read_field(&self, addr: u32, field: Field) -> u32 {
        field.decode(self.read(addr))
    }

    /// Replace one field, leaving the rest of the register untouched.
    fn write_field(&self, addr: u32, field: Field, value: u32) {
        self.modify(addr, |v| (v & !field.mask()) | field.encode(value));
    }
}

impl<T: Mmio + ?Sized> Mmio for &T {
    fn read(&self, addr: u32) -> u32 {
        (**self).read(addr)
    }

    fn write(&self, addr: u32, value: u32) {
        (**self).write(addr, value);
    }
}

/// Volatile access to the physical address space.
#[derive(Debug, Clone, Copy)]
pub struct VolatileMmio {
    _private: (),
}

impl VolatileMmio {
    /// Create a handle to the physical bus.
    ///
    /// # Safety
    ///
    /// The caller must only pass addresses of mapped, word-aligned registers
    /// or RAM to the returned bus. Drivers built on it are then responsible
    /// for exclusive ownership of the peripherals they touch.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl Mmio for VolatileMmio {
    #[inline(always)]
    fn read(&self, addr: u32) -> u32 {
        // SAFETY: guaranteed by the contract of `VolatileMmio::new`.
        unsafe { core::ptr::read_volatile(addr as usize as *const u32) }
    }

    #[inline(always)]
    fn write(&self, addr: u32, value: u32) {
        // SAFETY: guaranteed by the contract of `VolatileMmio::new`.
        unsafe { core::ptr::write_volatile(addr as usize as *mut u32, value) }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    #[test]
    fn field_masks() {
        assert_eq!(Field::bit(4).mask(), 0x10);
        assert_eq!(Field::new(16, 2).mask(), 0x0003_0000);
        assert_eq!(Field::new(0, 32).mask(), u32::MAX);
        assert_eq!(Field::new(11, 2).encode(0b111), 0b11 << 11);
        assert_eq!(Field::new(28, 3).decode(0x7000_0000), 7);
    }

    #[test]
    fn write_field_preserves_neighbours() {
        let bus = SimBus::new();
        bus.poke(0x100, 0xFFFF_FFFF);
        bus.write_field(0x100, Field::new(4, 4), 0x5);
        assert_eq!(bus.peek(0x100), 0xFFFF_FF5F);
        assert_eq!(bus.read_field(0x100, Field::new(4, 4)), 0x5);
    }

    #[test]
    fn set_and_clear_bits() {
        let bus = SimBus::new();
        bus.set_bits(0x200, 0b1010);
        assert!(bus.bits_set(0x200, 0b1000));
        bus.clear_bits(0x200, 0b1000);
        assert_eq!(bus.peek(0x200), 0b0010);
    }
}
