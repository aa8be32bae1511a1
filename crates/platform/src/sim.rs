//! Host-side register file.
//!
//! `SimBus` is a sparse word-addressed model of the STM32H745 address space.
//! Unwritten words read as zero. A handful of hardware side effects that the
//! drivers depend on are modelled:
//!
//! - DMA `LIFCR`/`HIFCR` are write-one-to-clear views of `LISR`/`HISR`.
//! - GPIO `BSRR` writes set and reset bits of the port's `ODR`.
//! - Setting RTC `ISR.INIT` raises `ISR.INITF`; clearing it drops `INITF`.
//! - Setting SPI `CR1.CSTART` finishes the frames on the wire at once and
//!   raises `SR.EOT`; SPI `IFCR` is a write-one-to-clear view of `SR`.
//! - Setting I2C `CR2.START` runs the transaction to its automatic STOP and
//!   raises `ISR.STOPF`; I2C `ICR` is a write-one-to-clear view of `ISR`.
//!
//! Tests raise hardware flags with [`SimBus::raise`] and can pin bits high or
//! low with [`SimBus::hold_set`] / [`SimBus::hold_clear`] to simulate a stuck
//! peripheral. Every bus write is recorded in order.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::vec::Vec;

use crate::mmio::Mmio;
use crate::{dma, gpio, i2c, rtc, spi};

#[derive(Default)]
struct State {
    words: HashMap<u32, u32>,
    held_set: HashMap<u32, u32>,
    held_clear: HashMap<u32, u32>,
    log: Vec<(u32, u32)>,
}

impl State {
    fn load(&self, addr: u32) -> u32 {
        let raw = self.words.get(&addr).copied().unwrap_or(0);
        let set = self.held_set.get(&addr).copied().unwrap_or(0);
        let clear = self.held_clear.get(&addr).copied().unwrap_or(0);
        (raw | set) & !clear
    }

    fn store(&mut self, addr: u32, value: u32) {
        self.words.insert(addr, value);
    }
}

/// Simulated register bus.
#[derive(Default)]
pub struct SimBus {
    state: Mutex<State>,
}

impl SimBus {
    /// Empty register file.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current value at `addr` (including held bits), without logging.
    pub fn peek(&self, addr: u32) -> u32 {
        self.lock().load(addr)
    }

    /// Overwrite `addr` without side effects or logging.
    pub fn poke(&self, addr: u32, value: u32) {
        self.lock().store(addr, value);
    }

    /// OR `mask` into `addr`, as hardware setting a status flag would.
    pub fn raise(&self, addr: u32, mask: u32) {
        let mut state = self.lock();
        let value = state.words.get(&addr).copied().unwrap_or(0) | mask;
        state.store(addr, value);
    }

    /// Force `mask` to read as one at `addr` until released.
    pub fn hold_set(&self, addr: u32, mask: u32) {
        *self.lock().held_set.entry(addr).or_insert(0) |= mask;
    }

    /// Force `mask` to read as zero at `addr` until released.
    pub fn hold_clear(&self, addr: u32, mask: u32) {
        *self.lock().held_clear.entry(addr).or_insert(0) |= mask;
    }

    /// Drop every held bit at `addr`.
    pub fn release(&self, addr: u32) {
        let mut state = self.lock();
        state.held_set.remove(&addr);
        state.held_clear.remove(&addr);
    }

    /// Fill consecutive words starting at `addr`.
    pub fn load_words(&self, addr: u32, words: &[u32]) {
        let mut state = self.lock();
        for (i, word) in (0u32..).zip(words) {
            state.store(addr.wrapping_add(i.wrapping_mul(4)), *word);
        }
    }

    /// Read `count` consecutive words starting at `addr`.
    pub fn words(&self, addr: u32, count: usize) -> Vec<u32> {
        let state = self.lock();
        (0u32..)
            .take(count)
            .map(|i| state.load(addr.wrapping_add(i.wrapping_mul(4))))
            .collect()
    }

    /// Every write so far, oldest first.
    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.lock().log.clone()
    }

    /// Values written to `addr`, oldest first.
    pub fn writes_to(&self, addr: u32) -> Vec<u32> {
        self.lock()
            .log
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Position of the first write to `addr` matching `pred` in the write log.
    pub fn position(&self, addr: u32, pred: impl Fn(u32) -> bool) -> Option<usize> {
        self.lock()
            .log
            .iter()
            .position(|(a, v)| *a == addr && pred(*v))
    }

    /// Forget the write log.
    pub fn clear_log(&self) {
        self.lock().log.clear();
    }
}

fn dma_flag_clear_target(addr: u32) -> Option<u32> {
    [dma::regs::DMA1_BASE, dma::regs::DMA2_BASE]
        .into_iter()
        .find_map(|base| match addr.wrapping_sub(base) {
            dma::regs::LIFCR => Some(base.wrapping_add(dma::regs::LISR)),
            dma::regs::HIFCR => Some(base.wrapping_add(dma::regs::HISR)),
            _ => None,
        })
}

fn gpio_odr_for_bsrr(addr: u32) -> Option<u32> {
    let offset = addr.checked_sub(gpio::GPIO_BASE)?;
    let ports = u32::from(gpio::PORT_COUNT);
    if offset >= gpio::PORT_STRIDE.wrapping_mul(ports) {
        return None;
    }
    (offset % gpio::PORT_STRIDE == gpio::regs::BSRR)
        .then(|| addr.wrapping_sub(gpio::regs::BSRR).wrapping_add(gpio::regs::ODR))
}

const SPI_BASES: [u32; 6] = [
    spi::regs::SPI1_BASE,
    spi::regs::SPI2_BASE,
    spi::regs::SPI3_BASE,
    spi::regs::SPI4_BASE,
    spi::regs::SPI5_BASE,
    spi::regs::SPI6_BASE,
];

fn spi_block(addr: u32) -> Option<(u32, u32)> {
    SPI_BASES.into_iter().find_map(|base| {
        let offset = addr.wrapping_sub(base);
        (offset == spi::regs::CR1 || offset == spi::regs::IFCR).then_some((base, offset))
    })
}

const I2C_BASES: [u32; 3] = [i2c::regs::I2C1_BASE, i2c::regs::I2C2_BASE, i2c::regs::I2C3_BASE];

fn i2c_block(addr: u32) -> Option<(u32, u32)> {
    I2C_BASES.into_iter().find_map(|base| {
        let offset = addr.wrapping_sub(base);
        (offset == i2c::regs::CR2 || offset == i2c::regs::ICR).then_some((base, offset))
    })
}

impl Mmio for SimBus {
    fn read(&self, addr: u32) -> u32 {
        self.lock().load(addr)
    }

    fn write(&self, addr: u32, value: u32) {
        let mut state = self.lock();
        state.log.push((addr, value));

        if let Some(isr) = dma_flag_clear_target(addr) {
            let flags = state.words.get(&isr).copied().unwrap_or(0) & !value;
            state.store(isr, flags);
            return;
        }

        if let Some(odr) = gpio_odr_for_bsrr(addr) {
            let current = state.words.get(&odr).copied().unwrap_or(0);
            let set = value & 0xFFFF;
            let reset = value >> 16;
            state.store(odr, (current | set) & !reset & 0xFFFF);
            return;
        }

        if addr == rtc::RTC_BASE.wrapping_add(rtc::regs::ISR) {
            let value = if value & rtc::regs::ISR_INIT != 0 {
                value | rtc::regs::ISR_INITF
            } else {
                value & !rtc::regs::ISR_INITF
            };
            state.store(addr, value);
            return;
        }

        if let Some((base, offset)) = spi_block(addr) {
            let sr = base.wrapping_add(spi::regs::SR);
            let status = state.words.get(&sr).copied().unwrap_or(0);
            if offset == spi::regs::IFCR {
                state.store(sr, status & !value);
                return;
            }
            if value & spi::regs::CR1_CSTART != 0 {
                state.store(sr, status | spi::regs::SR_EOT);
            }
        }

        if let Some((base, offset)) = i2c_block(addr) {
            let isr = base.wrapping_add(i2c::regs::ISR);
            let status = state.words.get(&isr).copied().unwrap_or(0);
            if offset == i2c::regs::ICR {
                state.store(isr, status & !value);
                return;
            }
            if value & i2c::regs::CR2_START != 0 {
                state.store(isr, status | i2c::regs::ISR_STOPF);
            }
        }

        state.store(addr, value);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_words_read_zero() {
        let bus = SimBus::new();
        assert_eq!(bus.read(0x4000_0000), 0);
    }

    #[test]
    fn dma_flag_clear_is_write_one_to_clear() {
        let bus = SimBus::new();
        let lisr = dma::regs::DMA1_BASE + dma::regs::LISR;
        bus.raise(lisr, 0b11_1101);
        bus.write(dma::regs::DMA1_BASE + dma::regs::LIFCR, 0b10_0000);
        assert_eq!(bus.peek(lisr), 0b01_1101);
    }

    #[test]
    fn bsrr_updates_odr() {
        let bus = SimBus::new();
        let port_b = gpio::GPIO_BASE + gpio::PORT_STRIDE;
        bus.write(port_b + gpio::regs::BSRR, 1 << 3);
        assert_eq!(bus.peek(port_b + gpio::regs::ODR), 1 << 3);
        bus.write(port_b + gpio::regs::BSRR, 1 << (3 + 16));
        assert_eq!(bus.peek(port_b + gpio::regs::ODR), 0);
    }

    #[test]
    fn held_bits_override_writes() {
        let bus = SimBus::new();
        bus.hold_set(0x10, 1);
        bus.write(0x10, 0);
        assert_eq!(bus.read(0x10), 1);
        bus.release(0x10);
        assert_eq!(bus.read(0x10), 0);
    }

    #[test]
    fn spi_cstart_raises_eot_and_ifcr_clears_it() {
        let bus = SimBus::new();
        let base = spi::regs::SPI2_BASE;
        bus.write(base + spi::regs::CR1, spi::regs::CR1_SPE | spi::regs::CR1_CSTART);
        assert_eq!(bus.read(base + spi::regs::SR) & spi::regs::SR_EOT, spi::regs::SR_EOT);
        bus.write(base + spi::regs::IFCR, spi::regs::IFCR_EOTC);
        assert_eq!(bus.read(base + spi::regs::SR), 0);
    }

    #[test]
    fn i2c_start_raises_stop_and_icr_clears_it() {
        let bus = SimBus::new();
        let base = i2c::regs::I2C3_BASE;
        bus.write(base + i2c::regs::CR2, i2c::regs::CR2_START);
        assert_eq!(bus.read(base + i2c::regs::ISR), i2c::regs::ISR_STOPF);
        bus.write(base + i2c::regs::ICR, i2c::regs::ICR_STOPCF);
        assert_eq!(bus.read(base + i2c::regs::ISR), 0);
    }

    #[test]
    fn write_log_is_ordered() {
        let bus = SimBus::new();
        bus.write(0x20, 1);
        bus.write(0x24, 2);
        bus.write(0x20, 3);
        assert_eq!(bus.writes(), vec![(0x20, 1), (0x24, 2), (0x20, 3)]);
        assert_eq!(bus.writes_to(0x20), vec![1, 3]);
        assert_eq!(bus.position(0x20, |v| v == 3), Some(2));
    }
}
