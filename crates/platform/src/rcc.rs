//! Reset and clock control.
//!
//! Only the enable/reset bits the drivers in this crate need are described
//! here. Each peripheral carries a [`Clock`] naming its enable and reset
//! registers and bit position.

use crate::mmio::Mmio;

/// RCC register block base.
pub const RCC_BASE: u32 = 0x5802_4400;

/// Register offsets within the RCC block.
#[allow(missing_docs)]
pub mod regs {
    /// Backup domain control (LSE, RTC clock).
    pub const BDCR: u32 = 0x070;
    pub const AHB1RSTR: u32 = 0x080;
    pub const APB1LRSTR: u32 = 0x090;
    pub const APB2RSTR: u32 = 0x098;
    pub const APB4RSTR: u32 = 0x09C;
    /// D3 autonomous mode register.
    pub const D3AMR: u32 = 0x0A8;
    pub const AHB1ENR: u32 = 0x0D8;
    pub const AHB4ENR: u32 = 0x0E0;
    pub const APB1LENR: u32 = 0x0E8;
    pub const APB2ENR: u32 = 0x0F0;
    pub const APB4ENR: u32 = 0x0F4;
}

/// Power control block (backup-domain write protection lives here).
pub const PWR_BASE: u32 = 0x5802_4800;
/// `PWR_CR1` offset.
pub const PWR_CR1: u32 = 0x00;
/// `PWR_CR1.DBP`: disable backup-domain write protection.
pub const PWR_CR1_DBP: u32 = 1 << 8;

/// Enable/reset bit pair for one peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    /// Offset of the enable register.
    pub enr: u32,
    /// Offset of the reset register, if the block has one.
    pub rstr: Option<u32>,
    /// Bit position shared by both registers.
    pub bit: u32,
}

impl Clock {
    /// Clock bit with both an enable and a reset register.
    pub const fn new(enr: u32, rstr: u32, bit: u32) -> Self {
        Self {
            enr,
            rstr: Some(rstr),
            bit,
        }
    }

    /// Clock bit without a software reset.
    pub const fn enable_only(enr: u32, bit: u32) -> Self {
        Self {
            enr,
            rstr: None,
            bit,
        }
    }

    const fn mask(self) -> u32 {
        1u32.wrapping_shl(self.bit)
    }

    /// Turn the peripheral clock on.
    pub fn enable(self, bus: &impl Mmio) {
        bus.set_bits(RCC_BASE.wrapping_add(self.enr), self.mask());
    }

    /// Turn the peripheral clock off.
    pub fn disable(self, bus: &impl Mmio) {
        bus.clear_bits(RCC_BASE.wrapping_add(self.enr), self.mask());
    }

    /// `true` when the clock is on.
    pub fn is_enabled(self, bus: &impl Mmio) -> bool {
        bus.bits_set(RCC_BASE.wrapping_add(self.enr), self.mask())
    }

    /// Pulse the software reset: set then clear the reset bit.
    pub fn reset(self, bus: &impl Mmio) {
        if let Some(rstr) = self.rstr {
            let addr = RCC_BASE.wrapping_add(rstr);
            bus.set_bits(addr, self.mask());
            bus.clear_bits(addr, self.mask());
        }
    }

    /// Enable, then pulse reset.
    pub fn enable_and_reset(self, bus: &impl Mmio) {
        self.enable(bus);
        self.reset(bus);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    #[test]
    fn reset_is_a_pulse() {
        let bus = SimBus::new();
        let clock = Clock::new(regs::AHB1ENR, regs::AHB1RSTR, 1);
        clock.enable_and_reset(&bus);
        assert!(clock.is_enabled(&bus));
        assert_eq!(bus.writes_to(RCC_BASE + regs::AHB1RSTR), vec![0b10, 0]);
    }

    #[test]
    fn enable_only_never_touches_reset() {
        let bus = SimBus::new();
        Clock::enable_only(regs::AHB4ENR, 3).enable_and_reset(&bus);
        assert_eq!(bus.writes().len(), 1);
    }
}
