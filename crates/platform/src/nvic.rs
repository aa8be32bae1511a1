//! Nested vectored interrupt controller.
//!
//! The STM32H745 implements four priority bits per interrupt (upper nibble of
//! each `IPR` byte); [`set_priority`] takes the logical level 0..=15 where 0
//! is the most urgent.

use crate::error::{Error, Result};
use crate::mmio::Mmio;

/// Set-enable registers.
pub const ISER: u32 = 0xE000_E100;
/// Clear-enable registers.
pub const ICER: u32 = 0xE000_E180;
/// Set-pending registers.
pub const ISPR: u32 = 0xE000_E200;
/// Clear-pending registers.
pub const ICPR: u32 = 0xE000_E280;
/// Priority byte array.
pub const IPR: u32 = 0xE000_E400;

/// Device IRQ lines on this part.
pub const IRQ_COUNT: u16 = 150;
/// Implemented priority bits.
pub const PRIORITY_BITS: u8 = 4;
/// Most urgent priority level.
pub const PRIORITY_HIGHEST: u8 = 0;
/// Least urgent priority level.
pub const PRIORITY_LOWEST: u8 = (1 << PRIORITY_BITS) - 1;

fn bank(base: u32, irq: u16) -> Result<(u32, u32)> {
    if irq >= IRQ_COUNT {
        return Err(Error::InvalidConfig("irq number out of range"));
    }
    let word = u32::from(irq / 32);
    let bit = u32::from(irq % 32);
    Ok((base.wrapping_add(word.wrapping_mul(4)), 1u32.wrapping_shl(bit)))
}

/// Enable `irq`.
pub fn enable(bus: &impl Mmio, irq: u16) -> Result<()> {
    let (addr, mask) = bank(ISER, irq)?;
    bus.write(addr, mask);
    Ok(())
}

/// Disable `irq`.
pub fn disable(bus: &impl Mmio, irq: u16) -> Result<()> {
    let (addr, mask) = bank(ICER, irq)?;
    bus.write(addr, mask);
    Ok(())
}

/// Mark `irq` pending.
pub fn pend(bus: &impl Mmio, irq: u16) -> Result<()> {
    let (addr, mask) = bank(ISPR, irq)?;
    bus.write(addr, mask);
    Ok(())
}

/// Clear a pending `irq`.
pub fn unpend(bus: &impl Mmio, irq: u16) -> Result<()> {
    let (addr, mask) = bank(ICPR, irq)?;
    bus.write(addr, mask);
    Ok(())
}

/// `true` when `irq` is enabled.
pub fn is_enabled(bus: &impl Mmio, irq: u16) -> Result<bool> {
    let (addr, mask) = bank(ISER, irq)?;
    Ok(bus.bits_set(addr, mask))
}

/// Program the priority of `irq` (0 = most urgent).
pub fn set_priority(bus: &impl Mmio, irq: u16, level: u8) -> Result<()> {
    if irq >= IRQ_COUNT {
        return Err(Error::InvalidConfig("irq number out of range"));
    }
    if level > PRIORITY_LOWEST {
        return Err(Error::InvalidConfig("priority level out of range"));
    }
    let addr = IPR.wrapping_add(u32::from(irq & !3));
    let shift = u32::from(irq % 4).wrapping_mul(8);
    let byte = u32::from(level).wrapping_shl(u32::from(8 - PRIORITY_BITS));
    bus.modify(addr, |v| {
        (v & !(0xFFu32.wrapping_shl(shift))) | byte.wrapping_shl(shift)
    });
    Ok(())
}

/// Read back the logical priority of `irq`.
pub fn priority(bus: &impl Mmio, irq: u16) -> Result<u8> {
    if irq >= IRQ_COUNT {
        return Err(Error::InvalidConfig("irq number out of range"));
    }
    let addr = IPR.wrapping_add(u32::from(irq & !3));
    let shift = u32::from(irq % 4).wrapping_mul(8);
    let byte = bus.read(addr).wrapping_shr(shift) & 0xFF;
    #[allow(clippy::cast_possible_truncation)] // masked to 4 bits
    Ok((byte >> (8 - PRIORITY_BITS)) as u8)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    #[test]
    fn enable_hits_the_right_bank() {
        let bus = SimBus::new();
        enable(&bus, 47).unwrap();
        assert_eq!(bus.peek(ISER + 4), 1 << 15);
        assert!(is_enabled(&bus, 47).unwrap());
        assert!(!is_enabled(&bus, 46).unwrap());
    }

    #[test]
    fn priority_uses_upper_nibble() {
        let bus = SimBus::new();
        set_priority(&bus, 65, 3).unwrap();
        assert_eq!(bus.peek(IPR + 64), 0x30 << 8);
        assert_eq!(priority(&bus, 65).unwrap(), 3);
        set_priority(&bus, 64, PRIORITY_HIGHEST).unwrap();
        assert_eq!(priority(&bus, 65).unwrap(), 3);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let bus = SimBus::new();
        assert!(enable(&bus, IRQ_COUNT).is_err());
        assert!(set_priority(&bus, 10, 16).is_err());
        assert!(bus.writes().is_empty());
    }
}
