//! Independent watchdog (IWDG1).
//!
//! Once started the watchdog cannot be stopped; the application must
//! [`Watchdog::feed`] it within the configured period or the device resets.
//! It is the recovery of last resort for a core stuck in an inter-core call.

use crate::dma::SPIN_LIMIT;
use crate::error::{Error, Result};
use crate::mmio::Mmio;

/// IWDG1 register block base.
pub const IWDG_BASE: u32 = 0x5800_4800;

/// Register map.
#[allow(missing_docs)]
pub mod regs {
    pub const KR: u32 = 0x00;
    pub const PR: u32 = 0x04;
    pub const RLR: u32 = 0x08;
    pub const SR: u32 = 0x0C;

    pub const KEY_START: u32 = 0xCCCC;
    pub const KEY_ACCESS: u32 = 0x5555;
    pub const KEY_RELOAD: u32 = 0xAAAA;

    pub const SR_PVU: u32 = 1 << 0;
    pub const SR_RVU: u32 = 1 << 1;
}

/// LSI frequency clocking the counter.
pub const LSI_HZ: u32 = 32_000;
/// Largest reload value (12 bits).
pub const RELOAD_MAX: u16 = 0xFFF;

/// Counter clock divider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Prescaler {
    /// ÷4
    Div4 = 0,
    /// ÷8
    Div8 = 1,
    /// ÷16
    Div16 = 2,
    /// ÷32
    Div32 = 3,
    /// ÷64
    Div64 = 4,
    /// ÷128
    Div128 = 5,
    /// ÷256
    Div256 = 6,
}

impl Prescaler {
    /// Division ratio.
    pub const fn divisor(self) -> u32 {
        4u32.wrapping_shl(self as u32)
    }
}

/// Watchdog period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WatchdogConfig {
    /// Counter clock divider.
    pub prescaler: Prescaler,
    /// Counter reload value (0..=0xFFF).
    pub reload: u16,
}

impl WatchdogConfig {
    /// Nominal period in milliseconds at the LSI frequency.
    pub fn timeout_ms(&self) -> u32 {
        let ticks = u32::from(self.reload).wrapping_add(1);
        ticks
            .wrapping_mul(self.prescaler.divisor())
            .wrapping_mul(1000)
            / LSI_HZ
    }
}

/// IWDG driver.
pub struct Watchdog<B: Mmio> {
    bus: B,
}

impl<B: Mmio> Watchdog<B> {
    /// Driver over `bus`.
    pub const fn new(bus: B) -> Self {
        Self { bus }
    }

    fn reg(offset: u32) -> u32 {
        IWDG_BASE.wrapping_add(offset)
    }

    /// Start the watchdog with `config`.
    pub fn start(&self, config: WatchdogConfig) -> Result<()> {
        if config.reload > RELOAD_MAX {
            return Err(Error::InvalidConfig("watchdog reload exceeds 12 bits"));
        }
        self.bus.write(Self::reg(regs::KR), regs::KEY_START);
        self.bus.write(Self::reg(regs::KR), regs::KEY_ACCESS);
        self.bus.write(Self::reg(regs::PR), config.prescaler as u32);
        self.bus.write(Self::reg(regs::RLR), u32::from(config.reload));

        let sr = Self::reg(regs::SR);
        let mut updated = false;
        for _ in 0..SPIN_LIMIT {
            if self.bus.read(sr) & (regs::SR_PVU | regs::SR_RVU) == 0 {
                updated = true;
                break;
            }
            core::hint::spin_loop();
        }
        if !updated {
            warn!("watchdog: prescaler/reload update never completed");
            return Err(Error::Timeout);
        }
        self.feed();
        info!("watchdog: started, {} ms", config.timeout_ms());
        Ok(())
    }

    /// Reload the counter.
    pub fn feed(&self) {
        self.bus.write(Self::reg(regs::KR), regs::KEY_RELOAD);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    const CONFIG: WatchdogConfig = WatchdogConfig {
        prescaler: Prescaler::Div32,
        reload: 999,
    };

    #[test]
    fn start_writes_keys_in_order() {
        let dog = Watchdog::new(SimBus::new());
        dog.start(CONFIG).unwrap();
        assert_eq!(
            dog.bus.writes(),
            vec![
                (IWDG_BASE, 0xCCCC),
                (IWDG_BASE, 0x5555),
                (IWDG_BASE + regs::PR, 3),
                (IWDG_BASE + regs::RLR, 999),
                (IWDG_BASE, 0xAAAA),
            ]
        );
    }

    #[test]
    fn reload_is_twelve_bits() {
        let dog = Watchdog::new(SimBus::new());
        let config = WatchdogConfig { reload: 0x1000, ..CONFIG };
        assert!(matches!(dog.start(config), Err(Error::InvalidConfig(_))));
        assert!(dog.bus.writes().is_empty());
    }

    #[test]
    fn stuck_update_times_out() {
        let dog = Watchdog::new(SimBus::new());
        dog.bus.hold_set(IWDG_BASE + regs::SR, regs::SR_RVU);
        assert_eq!(dog.start(CONFIG), Err(Error::Timeout));
    }

    #[test]
    fn timeout_math() {
        assert_eq!(CONFIG.timeout_ms(), 1000);
        let longest = WatchdogConfig { prescaler: Prescaler::Div256, reload: RELOAD_MAX };
        assert_eq!(longest.timeout_ms(), 32_768);
    }
}
