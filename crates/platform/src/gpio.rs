//! GPIO ports and the package-pin map.
//!
//! Board wiring refers to pins by their LQFP144 package number; [`PinId::from_package`]
//! resolves that to a port and bit using the bonding table below. Register
//! access goes through the [`Mmio`] bus, and [`Output`]/[`Input`] expose a
//! resolved pin through the `embedded-hal` digital traits.

use core::convert::Infallible;

use embedded_hal::digital;

use crate::error::{Error, Result};
use crate::mmio::{Field, Mmio};
use crate::rcc::{self, Clock};

/// GPIOA register block; the other ports follow at [`PORT_STRIDE`].
pub const GPIO_BASE: u32 = 0x5802_0000;
/// Distance between port register blocks.
pub const PORT_STRIDE: u32 = 0x400;
/// Ports with bonded pins (A..=H).
pub const PORT_COUNT: u8 = 8;
/// Pins per port.
pub const PINS_PER_PORT: u8 = 16;

/// Register offsets within a port block.
#[allow(missing_docs)]
pub mod regs {
    pub const MODER: u32 = 0x00;
    pub const OTYPER: u32 = 0x04;
    pub const OSPEEDR: u32 = 0x08;
    pub const PUPDR: u32 = 0x0C;
    pub const IDR: u32 = 0x10;
    pub const ODR: u32 = 0x14;
    pub const BSRR: u32 = 0x18;
    pub const AFRL: u32 = 0x20;
    pub const AFRH: u32 = 0x24;
}

const NC: u16 = u16::MAX;

/// Package pin number to `port * 100 + bit`, `NC` where nothing is bonded.
#[rustfmt::skip]
const PACKAGE_PINS: [u16; 140] = [
     NC, 402, 403, 404, 405, 406,  NC,  NC,  NC, 213,
    214, 215,  NC,  NC,  NC,  NC,  NC,  NC,  NC,  NC,
    506, 507, 508, 509, 510, 700, 701,  NC, 200, 201,
     NC,  NC,  NC,  NC,  NC,  NC,  NC,   0,   1,   2,
      3,  NC,  NC,   4,   5,   6,   7, 204, 205, 100,
    101, 102, 511, 514, 515,  NC,  NC, 407, 408, 409,
    410, 411, 412, 413, 414, 415, 110, 111,  NC,  NC,
     NC,  NC, 112, 113, 114, 115, 308, 309, 310,  NC,
     NC, 311, 312, 313, 314, 315, 606, 607, 608,  NC,
     NC,  NC,  NC, 206, 207, 208, 209,   8,   9,  10,
     11,  12,  13,  NC,  NC,  NC,  NC,  14,  15, 210,
    211, 212, 300, 301, 302, 303, 304, 305,  NC,  NC,
    306, 307, 609, 610, 611, 612, 613, 614,  NC,  NC,
    103, 104, 105, 106, 107,  NC, 108, 109, 400, 401,
];

/// GPIO port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Port {
    /// GPIOA.
    A,
    /// GPIOB.
    B,
    /// GPIOC.
    C,
    /// GPIOD.
    D,
    /// GPIOE.
    E,
    /// GPIOF.
    F,
    /// GPIOG.
    G,
    /// GPIOH.
    H,
}

impl Port {
    const ALL: [Self; PORT_COUNT as usize] = [
        Self::A,
        Self::B,
        Self::C,
        Self::D,
        Self::E,
        Self::F,
        Self::G,
        Self::H,
    ];

    /// Zero-based port number (A = 0).
    pub const fn number(self) -> u8 {
        self as u8
    }

    /// Register block base.
    pub const fn base(self) -> u32 {
        GPIO_BASE.wrapping_add(PORT_STRIDE.wrapping_mul(self as u32))
    }

    /// AHB4 clock enable bit.
    pub const fn clock(self) -> Clock {
        Clock::enable_only(rcc::regs::AHB4ENR, self as u32)
    }

    fn from_number(n: u16) -> Option<Self> {
        Self::ALL.get(usize::from(n)).copied()
    }
}

/// A resolved pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinId {
    port: Port,
    index: u8,
}

impl PinId {
    /// Pin `index` of `port`.
    pub const fn new(port: Port, index: u8) -> Result<Self> {
        if index >= PINS_PER_PORT {
            return Err(Error::InvalidConfig("gpio pin index out of range"));
        }
        Ok(Self { port, index })
    }

    /// Resolve an LQFP144 package pin number.
    pub fn from_package(pin: u8) -> Result<Self> {
        let code = PACKAGE_PINS
            .get(usize::from(pin))
            .copied()
            .filter(|&code| code != NC)
            .ok_or(Error::InvalidConfig("package pin has no gpio"))?;
        let port = Port::from_number(code / 100)
            .ok_or(Error::InvalidConfig("package pin has no gpio"))?;
        let index = u8::try_from(code % 100)
            .map_err(|_| Error::InvalidConfig("package pin has no gpio"))?;
        Self::new(port, index)
    }

    /// Port.
    pub const fn port(self) -> Port {
        self.port
    }

    /// Bit within the port.
    pub const fn index(self) -> u8 {
        self.index
    }

    const fn mask(self) -> u32 {
        1u32.wrapping_shl(self.index as u32)
    }

    const fn register(self, offset: u32) -> u32 {
        self.port.base().wrapping_add(offset)
    }

    const fn two_bit_field(self) -> Field {
        Field::new((self.index as u32).wrapping_mul(2), 2)
    }
}

/// Pin mode (MODER).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Digital input.
    Input = 0,
    /// General-purpose output.
    Output = 1,
    /// Alternate function.
    Alternate = 2,
    /// Analog.
    Analog = 3,
}

/// Pull resistor (PUPDR).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pull {
    /// Floating.
    None = 0,
    /// Pull-up.
    Up = 1,
    /// Pull-down.
    Down = 2,
}

/// Output slew rate (OSPEEDR).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Speed {
    /// Low.
    Low = 0,
    /// Medium.
    Medium = 1,
    /// High.
    High = 2,
    /// Very high.
    VeryHigh = 3,
}

/// Output driver (OTYPER).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputType {
    /// Push-pull.
    PushPull,
    /// Open-drain.
    OpenDrain,
}

/// Enable the clock of `port`.
pub fn enable_port_clock(bus: &impl Mmio, port: Port) {
    port.clock().enable(bus);
}

/// Program the mode of `pin`.
pub fn set_mode(bus: &impl Mmio, pin: PinId, mode: Mode) {
    bus.write_field(pin.register(regs::MODER), pin.two_bit_field(), mode as u32);
}

/// Program the pull resistor of `pin`.
pub fn set_pull(bus: &impl Mmio, pin: PinId, pull: Pull) {
    bus.write_field(pin.register(regs::PUPDR), pin.two_bit_field(), pull as u32);
}

/// Program the slew rate of `pin`.
pub fn set_speed(bus: &impl Mmio, pin: PinId, speed: Speed) {
    bus.write_field(pin.register(regs::OSPEEDR), pin.two_bit_field(), speed as u32);
}

/// Program the output driver of `pin`.
pub fn set_output_type(bus: &impl Mmio, pin: PinId, kind: OutputType) {
    let addr = pin.register(regs::OTYPER);
    match kind {
        OutputType::PushPull => bus.clear_bits(addr, pin.mask()),
        OutputType::OpenDrain => bus.set_bits(addr, pin.mask()),
    }
}

/// Route `pin` to alternate function `af` (0..=15).
pub fn set_alternate(bus: &impl Mmio, pin: PinId, af: u8) -> Result<()> {
    if af > 15 {
        return Err(Error::InvalidConfig("alternate function out of range"));
    }
    let (reg, slot) = if pin.index < 8 {
        (regs::AFRL, pin.index)
    } else {
        (regs::AFRH, pin.index.wrapping_sub(8))
    };
    let field = Field::new(u32::from(slot).wrapping_mul(4), 4);
    bus.write_field(pin.register(reg), field, u32::from(af));
    set_mode(bus, pin, Mode::Alternate);
    Ok(())
}

/// Drive `pin` high or low through BSRR.
pub fn write(bus: &impl Mmio, pin: PinId, high: bool) {
    let value = if high {
        pin.mask()
    } else {
        pin.mask().wrapping_shl(16)
    };
    bus.write(pin.register(regs::BSRR), value);
}

/// Sampled input level of `pin`.
pub fn read(bus: &impl Mmio, pin: PinId) -> bool {
    bus.read(pin.register(regs::IDR)) & pin.mask() != 0
}

/// Level currently driven on `pin`.
pub fn output_level(bus: &impl Mmio, pin: PinId) -> bool {
    bus.read(pin.register(regs::ODR)) & pin.mask() != 0
}

/// Make `pin` a push-pull output starting at `initial_high`.
///
/// The level is latched before the mode switch so the pin never glitches.
pub fn configure_output(bus: &impl Mmio, pin: PinId, initial_high: bool) {
    enable_port_clock(bus, pin.port);
    write(bus, pin, initial_high);
    set_output_type(bus, pin, OutputType::PushPull);
    set_mode(bus, pin, Mode::Output);
}

/// Make `pin` an input with `pull`.
pub fn configure_input(bus: &impl Mmio, pin: PinId, pull: Pull) {
    enable_port_clock(bus, pin.port);
    set_pull(bus, pin, pull);
    set_mode(bus, pin, Mode::Input);
}

/// Output pin bound to a bus.
pub struct Output<B: Mmio> {
    bus: B,
    pin: PinId,
}

impl<B: Mmio> Output<B> {
    /// Configure `pin` as an output and wrap it.
    pub fn new(bus: B, pin: PinId, initial_high: bool) -> Self {
        configure_output(&bus, pin, initial_high);
        Self { bus, pin }
    }

    /// The wrapped pin.
    pub fn pin(&self) -> PinId {
        self.pin
    }
}

impl<B: Mmio> digital::ErrorType for Output<B> {
    type Error = Infallible;
}

impl<B: Mmio> digital::OutputPin for Output<B> {
    fn set_low(&mut self) -> core::result::Result<(), Infallible> {
        write(&self.bus, self.pin, false);
        Ok(())
    }

    fn set_high(&mut self) -> core::result::Result<(), Infallible> {
        write(&self.bus, self.pin, true);
        Ok(())
    }
}

impl<B: Mmio> digital::StatefulOutputPin for Output<B> {
    fn is_set_high(&mut self) -> core::result::Result<bool, Infallible> {
        Ok(output_level(&self.bus, self.pin))
    }

    fn is_set_low(&mut self) -> core::result::Result<bool, Infallible> {
        Ok(!output_level(&self.bus, self.pin))
    }
}

/// Input pin bound to a bus.
pub struct Input<B: Mmio> {
    bus: B,
    pin: PinId,
}

impl<B: Mmio> Input<B> {
    /// Configure `pin` as an input and wrap it.
    pub fn new(bus: B, pin: PinId, pull: Pull) -> Self {
        configure_input(&bus, pin, pull);
        Self { bus, pin }
    }
}

impl<B: Mmio> digital::ErrorType for Input<B> {
    type Error = Infallible;
}

impl<B: Mmio> digital::InputPin for Input<B> {
    fn is_high(&mut self) -> core::result::Result<bool, Infallible> {
        Ok(read(&self.bus, self.pin))
    }

    fn is_low(&mut self) -> core::result::Result<bool, Infallible> {
        Ok(!read(&self.bus, self.pin))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sim::SimBus;
    use embedded_hal::digital::{InputPin, OutputPin, StatefulOutputPin};

    #[test]
    fn package_pins_resolve() {
        assert_eq!(PinId::from_package(5).unwrap(), PinId::new(Port::E, 6).unwrap());
        assert_eq!(PinId::from_package(37).unwrap(), PinId::new(Port::A, 0).unwrap());
        assert_eq!(PinId::from_package(139).unwrap(), PinId::new(Port::E, 1).unwrap());
        assert!(PinId::from_package(0).is_err());
        assert!(PinId::from_package(140).is_err());
    }

    #[test]
    fn every_bonded_pin_is_unique() {
        let mut seen = std::collections::HashSet::new();
        for pin in 0..140u8 {
            if let Ok(id) = PinId::from_package(pin) {
                assert!(seen.insert((id.port().number(), id.index())), "pin {pin}");
            }
        }
        assert_eq!(seen.len(), 97);
    }

    #[test]
    fn output_configuration_latches_level_first() {
        let bus = SimBus::new();
        let pin = PinId::from_package(5).unwrap();
        configure_output(&bus, pin, true);
        let port = Port::E.base();
        let bsrr = bus.position(port + regs::BSRR, |_| true).unwrap();
        let moder = bus.position(port + regs::MODER, |_| true).unwrap();
        assert!(bsrr < moder);
        assert_eq!(bus.peek(port + regs::MODER), 1 << 12);
        assert!(output_level(&bus, pin));
        assert_ne!(bus.peek(rcc::RCC_BASE + rcc::regs::AHB4ENR) & (1 << 4), 0);
    }

    #[test]
    fn alternate_function_uses_high_register() {
        let bus = SimBus::new();
        let pin = PinId::new(Port::B, 10).unwrap();
        set_alternate(&bus, pin, 7).unwrap();
        assert_eq!(bus.peek(Port::B.base() + regs::AFRH), 7 << 8);
        assert_eq!(bus.peek(Port::B.base() + regs::MODER), 2 << 20);
        assert!(set_alternate(&bus, pin, 16).is_err());
    }

    #[test]
    fn embedded_hal_pins() {
        let bus = SimBus::new();
        let pin = PinId::new(Port::C, 13).unwrap();
        let mut out = Output::new(&bus, pin, false);
        assert!(out.is_set_low().unwrap());
        out.set_high().unwrap();
        assert!(out.is_set_high().unwrap());

        let mut input = Input::new(&bus, PinId::new(Port::D, 2).unwrap(), Pull::Up);
        assert!(input.is_low().unwrap());
        bus.raise(Port::D.base() + regs::IDR, 1 << 2);
        assert!(input.is_high().unwrap());
        assert_eq!(bus.peek(Port::D.base() + regs::PUPDR), 1 << 4);
    }
}
