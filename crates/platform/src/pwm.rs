//! PWM outputs on the low-power timers LPTIM1..LPTIM5.
//!
//! Each timer drives one output pin. Frequency is set by the prescaler and
//! ARR; duty (0..=255) maps onto CMP = ARR * duty / 255. LPTIM only accepts
//! ARR/CMP writes while enabled and PRESC changes while disabled, so every
//! reprogramming goes disable, prescaler, enable, ARR, CMP.

use core::cell::Cell;

use critical_section::Mutex;

use crate::error::{Error, Result};
use crate::gpio::{self, PinId, Port};
use crate::mmio::Mmio;
use crate::peripheral::KERNEL_CLOCK_HZ;
use crate::rcc::{self, Clock};

/// Register map.
#[allow(missing_docs)]
pub mod regs {
    use crate::mmio::Field;

    pub const ISR: u32 = 0x00;
    pub const ICR: u32 = 0x04;
    pub const IER: u32 = 0x08;
    pub const CFGR: u32 = 0x0C;
    pub const CR: u32 = 0x10;
    pub const CMP: u32 = 0x14;
    pub const ARR: u32 = 0x18;
    pub const CNT: u32 = 0x1C;

    pub const CFGR_PRESC: Field = Field::new(9, 3);

    pub const CR_ENABLE: u32 = 1 << 0;
    pub const CR_CNTSTRT: u32 = 1 << 2;

    pub const ICR_CMPOKCF: u32 = 1 << 3;
    pub const ICR_ARROKCF: u32 = 1 << 4;
}

/// Largest ARR.
pub const ARR_MAX: u32 = 0xFFFF;

/// Low-power timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Lptim {
    /// LPTIM1.
    Lptim1,
    /// LPTIM2.
    Lptim2,
    /// LPTIM3.
    Lptim3,
    /// LPTIM4.
    Lptim4,
    /// LPTIM5.
    Lptim5,
}

impl Lptim {
    /// Register block base.
    pub const fn base(self) -> u32 {
        match self {
            Self::Lptim1 => 0x4000_2400,
            Self::Lptim2 => 0x5800_2400,
            Self::Lptim3 => 0x5800_2800,
            Self::Lptim4 => 0x5800_2C00,
            Self::Lptim5 => 0x5800_3000,
        }
    }

    /// Kernel clock enable/reset bit.
    pub const fn clock(self) -> Clock {
        use rcc::regs::{APB1LENR, APB1LRSTR, APB4ENR, APB4RSTR};
        match self {
            Self::Lptim1 => Clock::new(APB1LENR, APB1LRSTR, 9),
            Self::Lptim2 => Clock::new(APB4ENR, APB4RSTR, 9),
            Self::Lptim3 => Clock::new(APB4ENR, APB4RSTR, 10),
            Self::Lptim4 => Clock::new(APB4ENR, APB4RSTR, 11),
            Self::Lptim5 => Clock::new(APB4ENR, APB4RSTR, 12),
        }
    }

    const fn slot(self) -> usize {
        self as usize
    }

    const fn register(self, offset: u32) -> u32 {
        self.base().wrapping_add(offset)
    }
}

/// `(port, pin, timer, alternate function)` of every LPTIM output.
const OUTPUTS: [(Port, u8, Lptim, u8); 6] = [
    (Port::D, 13, Lptim::Lptim1, 1),
    (Port::G, 13, Lptim::Lptim1, 1),
    (Port::B, 13, Lptim::Lptim2, 3),
    (Port::A, 1, Lptim::Lptim3, 3),
    (Port::A, 2, Lptim::Lptim4, 3),
    (Port::A, 3, Lptim::Lptim5, 3),
];

/// Timer and alternate function driving `pin`.
pub fn output_for(pin: PinId) -> Result<(Lptim, u8)> {
    OUTPUTS
        .iter()
        .find(|(port, index, _, _)| *port == pin.port() && *index == pin.index())
        .map(|&(_, _, timer, af)| (timer, af))
        .ok_or(Error::InvalidConfig("pin has no pwm output"))
}

/// `(prescaler code, ARR)` for `frequency` using the smallest prescaler that
/// fits ARR in 16 bits.
pub fn timing(frequency: u32) -> Result<(u32, u32)> {
    for code in 0..8u32 {
        let divider = 1u32.wrapping_shl(code);
        let Some(ticks) = frequency
            .checked_mul(divider)
            .and_then(|step| KERNEL_CLOCK_HZ.checked_div(step))
        else {
            break;
        };
        if ticks < 2 {
            break;
        }
        let arr = ticks.wrapping_sub(1);
        if arr <= ARR_MAX {
            return Ok((code, arr));
        }
    }
    Err(Error::InvalidConfig("pwm frequency out of range"))
}

/// CMP for `duty` out of 255.
pub fn compare(arr: u32, duty: u8) -> u32 {
    arr.saturating_mul(u32::from(duty)) / 255
}

#[derive(Debug, Clone, Copy, Default)]
struct Channel {
    frequency: u32,
    duty: u8,
}

/// PWM driver over all five timers.
pub struct Pwm<B: Mmio> {
    bus: B,
    channels: Mutex<Cell<[Option<Channel>; 5]>>,
}

impl<B: Mmio> Pwm<B> {
    /// Driver over `bus`, no channel configured.
    pub const fn new(bus: B) -> Self {
        Self {
            bus,
            channels: Mutex::new(Cell::new([None; 5])),
        }
    }

    fn channel(&self, timer: Lptim) -> Result<Channel> {
        critical_section::with(|cs| self.channels.borrow(cs).get())
            .get(timer.slot())
            .copied()
            .flatten()
            .ok_or(Error::InvalidConfig("pwm channel not initialised"))
    }

    fn store(&self, timer: Lptim, channel: Channel) {
        critical_section::with(|cs| {
            let cell = self.channels.borrow(cs);
            let mut all = cell.get();
            if let Some(slot) = all.get_mut(timer.slot()) {
                *slot = Some(channel);
            }
            cell.set(all);
        });
    }

    fn program(&self, timer: Lptim, channel: Channel, run: bool) -> Result<()> {
        let (presc, arr) = timing(channel.frequency)?;
        let cr = timer.register(regs::CR);
        self.bus.write(cr, 0);
        self.bus
            .write_field(timer.register(regs::CFGR), regs::CFGR_PRESC, presc);
        self.bus.write(cr, regs::CR_ENABLE);
        self.bus.write(timer.register(regs::ARR), arr);
        self.bus
            .write(timer.register(regs::CMP), compare(arr, channel.duty));
        self.bus.write(
            timer.register(regs::ICR),
            regs::ICR_ARROKCF | regs::ICR_CMPOKCF,
        );
        if run {
            self.bus.set_bits(cr, regs::CR_CNTSTRT);
        }
        Ok(())
    }

    /// Route `pin` to its timer and program `frequency` and `duty`. The
    /// output starts disabled.
    pub fn init(&self, pin: PinId, frequency: u32, duty: u8) -> Result<()> {
        let (timer, af) = output_for(pin)?;
        timing(frequency)?;
        timer.clock().enable_and_reset(&self.bus);
        gpio::enable_port_clock(&self.bus, pin.port());
        gpio::set_alternate(&self.bus, pin, af)?;
        let channel = Channel { frequency, duty };
        self.program(timer, channel, false)?;
        self.bus.clear_bits(timer.register(regs::CR), regs::CR_ENABLE);
        self.store(timer, channel);
        debug!("pwm: {} at {} Hz", timer, frequency);
        Ok(())
    }

    /// Change the frequency, keeping the duty ratio.
    pub fn set_frequency(&self, pin: PinId, frequency: u32) -> Result<()> {
        let (timer, _) = output_for(pin)?;
        let channel = Channel { frequency, ..self.channel(timer)? };
        let running = self.is_running(pin)?;
        self.program(timer, channel, running)?;
        if !running {
            self.bus.clear_bits(timer.register(regs::CR), regs::CR_ENABLE);
        }
        self.store(timer, channel);
        Ok(())
    }

    /// Change the duty cycle (0..=255).
    pub fn set_duty_cycle(&self, pin: PinId, duty: u8) -> Result<()> {
        let (timer, _) = output_for(pin)?;
        let channel = Channel { duty, ..self.channel(timer)? };
        let arr = self.bus.read(timer.register(regs::ARR));
        let cr = timer.register(regs::CR);
        let running = self.bus.bits_set(cr, regs::CR_ENABLE);
        if !running {
            self.bus.set_bits(cr, regs::CR_ENABLE);
        }
        self.bus.write(timer.register(regs::CMP), compare(arr, duty));
        if !running {
            self.bus.clear_bits(cr, regs::CR_ENABLE);
        }
        self.store(timer, channel);
        Ok(())
    }

    /// Start the output.
    pub fn enable(&self, pin: PinId) -> Result<()> {
        let (timer, _) = output_for(pin)?;
        let channel = self.channel(timer)?;
        self.program(timer, channel, true)
    }

    /// Stop the output.
    pub fn disable(&self, pin: PinId) -> Result<()> {
        let (timer, _) = output_for(pin)?;
        self.channel(timer)?;
        self.bus.clear_bits(timer.register(regs::CR), regs::CR_ENABLE);
        Ok(())
    }

    /// `true` while the output is running.
    pub fn is_running(&self, pin: PinId) -> Result<bool> {
        let (timer, _) = output_for(pin)?;
        self.channel(timer)?;
        Ok(self.bus.bits_set(timer.register(regs::CR), regs::CR_ENABLE))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    fn pin() -> PinId {
        PinId::new(Port::A, 1).unwrap()
    }

    #[test]
    fn timing_picks_smallest_prescaler() {
        assert_eq!(timing(1_000).unwrap(), (0, 63_999));
        assert_eq!(timing(500).unwrap(), (1, 63_999));
        assert_eq!(timing(100).unwrap(), (4, 39_999));
        assert!(timing(0).is_err());
        assert!(timing(1).is_err());
        assert!(timing(40_000_000).is_err());
    }

    #[test]
    fn duty_maps_onto_compare() {
        assert_eq!(compare(63_999, 0), 0);
        assert_eq!(compare(63_999, 255), 63_999);
        assert_eq!(compare(255, 128), 128);
    }

    #[test]
    fn unknown_pins_are_rejected() {
        let pwm = Pwm::new(SimBus::new());
        assert!(pwm.init(PinId::new(Port::C, 0).unwrap(), 1_000, 10).is_err());
        assert!(pwm.enable(pin()).is_err());
    }

    #[test]
    fn lifecycle() {
        let pwm = Pwm::new(SimBus::new());
        let base = Lptim::Lptim3.base();
        pwm.init(pin(), 1_000, 128).unwrap();
        assert!(!pwm.is_running(pin()).unwrap());
        assert_eq!(pwm.bus.peek(base + regs::ARR), 63_999);
        assert_eq!(pwm.bus.peek(base + regs::CMP), 32_124);

        pwm.enable(pin()).unwrap();
        assert!(pwm.is_running(pin()).unwrap());
        assert!(pwm.bus.bits_set(base + regs::CR, regs::CR_CNTSTRT));

        pwm.set_frequency(pin(), 100).unwrap();
        assert!(pwm.is_running(pin()).unwrap());
        assert_eq!(regs::CFGR_PRESC.decode(pwm.bus.peek(base + regs::CFGR)), 4);
        assert_eq!(pwm.bus.peek(base + regs::CMP), 20_077);

        pwm.set_duty_cycle(pin(), 255).unwrap();
        assert_eq!(pwm.bus.peek(base + regs::CMP), 39_999);

        pwm.disable(pin()).unwrap();
        assert!(!pwm.is_running(pin()).unwrap());
    }
}
