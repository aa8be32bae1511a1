//! I2C1..I2C3 controller driver over DMA.
//!
//! Same shape as the SPI driver: one TX and one RX stream per instance, a
//! single transfer in flight, callback/blocking/`async` completion. Each
//! transfer is one hardware transaction of at most 255 bytes ended by an
//! automatic STOP.
//!
//! A transfer succeeds once its stream has completed and the block reports
//! the STOP. A NACK or a bus fault, reported through the instance's event
//! and error IRQs ([`I2c::on_interrupt`]), aborts the stream and fails the
//! transfer.

use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::Mutex;

use crate::buffer::Region;
use crate::dma::{Context, DmaEngine, StreamId};
use crate::error::{Error, Result};
use crate::gpio::{self, OutputType, PinId, Pull, Speed};
use crate::mmio::Mmio;
use crate::nvic;
use crate::peripheral::{self, AddressMode, Completion, PeriphDmaConfig};
use crate::rcc::{self, Clock};
use crate::transfer::TransferState;

/// Register map.
#[allow(missing_docs)]
pub mod regs {
    use crate::mmio::Field;

    pub const I2C1_BASE: u32 = 0x4000_5400;
    pub const I2C2_BASE: u32 = 0x4000_5800;
    pub const I2C3_BASE: u32 = 0x4000_5C00;

    pub const CR1: u32 = 0x00;
    pub const CR2: u32 = 0x04;
    pub const TIMINGR: u32 = 0x10;
    pub const ISR: u32 = 0x18;
    pub const ICR: u32 = 0x1C;
    pub const RXDR: u32 = 0x24;
    pub const TXDR: u32 = 0x28;

    pub const CR1_PE: u32 = 1 << 0;
    pub const CR1_NACKIE: u32 = 1 << 4;
    pub const CR1_STOPIE: u32 = 1 << 5;
    pub const CR1_ERRIE: u32 = 1 << 7;
    pub const CR1_DNF: Field = Field::new(8, 4);
    pub const CR1_ANFOFF: u32 = 1 << 12;
    pub const CR1_TXDMAEN: u32 = 1 << 14;
    pub const CR1_RXDMAEN: u32 = 1 << 15;

    pub const CR2_SADD: Field = Field::new(0, 10);
    pub const CR2_RD_WRN: u32 = 1 << 10;
    pub const CR2_ADD10: u32 = 1 << 11;
    pub const CR2_START: u32 = 1 << 13;
    pub const CR2_NBYTES: Field = Field::new(16, 8);
    pub const CR2_AUTOEND: u32 = 1 << 25;

    pub const ISR_NACKF: u32 = 1 << 4;
    pub const ISR_STOPF: u32 = 1 << 5;
    pub const ISR_BERR: u32 = 1 << 8;
    pub const ISR_ARLO: u32 = 1 << 9;
    pub const ISR_OVR: u32 = 1 << 10;
    pub const ISR_FAULTS: u32 = ISR_NACKF | ISR_BERR | ISR_ARLO | ISR_OVR;

    pub const ICR_NACKCF: u32 = 1 << 4;
    pub const ICR_STOPCF: u32 = 1 << 5;
    pub const ICR_BERRCF: u32 = 1 << 8;
    pub const ICR_ARLOCF: u32 = 1 << 9;
    pub const ICR_OVRCF: u32 = 1 << 10;
    pub const ICR_ALL: u32 = ICR_NACKCF | ICR_STOPCF | ICR_BERRCF | ICR_ARLOCF | ICR_OVRCF;
}

/// Largest single transaction (NBYTES).
pub const MAX_TRANSFER: u32 = 255;

/// Alternate function of the SCL/SDA pins.
const PIN_AF: u8 = 4;

/// I2C block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cInstance {
    /// I2C1.
    I2c1,
    /// I2C2.
    I2c2,
    /// I2C3.
    I2c3,
}

impl I2cInstance {
    /// Register block base.
    pub const fn base(self) -> u32 {
        match self {
            Self::I2c1 => regs::I2C1_BASE,
            Self::I2c2 => regs::I2C2_BASE,
            Self::I2c3 => regs::I2C3_BASE,
        }
    }

    /// Kernel clock enable/reset bit.
    pub const fn clock(self) -> Clock {
        use rcc::regs::{APB1LENR, APB1LRSTR};
        match self {
            Self::I2c1 => Clock::new(APB1LENR, APB1LRSTR, 21),
            Self::I2c2 => Clock::new(APB1LENR, APB1LRSTR, 22),
            Self::I2c3 => Clock::new(APB1LENR, APB1LRSTR, 23),
        }
    }

    /// DMAMUX1 `(rx, tx)` request lines.
    pub const fn requests(self) -> (u8, u8) {
        match self {
            Self::I2c1 => (33, 34),
            Self::I2c2 => (35, 36),
            Self::I2c3 => (73, 74),
        }
    }

    /// `(event, error)` interrupt lines.
    pub const fn irqs(self) -> (u16, u16) {
        match self {
            Self::I2c1 => (31, 32),
            Self::I2c2 => (33, 34),
            Self::I2c3 => (72, 73),
        }
    }

    const fn register(self, offset: u32) -> u32 {
        self.base().wrapping_add(offset)
    }
}

/// Bus pins, routed to the block as open-drain with pull-ups.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2cPins {
    /// Clock line.
    pub scl: PinId,
    /// Data line.
    pub sda: PinId,
}

/// Instance configuration.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2cConfig {
    /// Raw TIMINGR value for the wanted bus speed.
    pub timing: u32,
    /// 7- or 10-bit target addresses.
    pub address_mode: AddressMode,
    /// Keep the analog noise filter on.
    pub analog_filter: bool,
    /// Digital filter length in kernel clocks (0..=15).
    pub digital_filter: u8,
    /// Pins to route, if the board has not done it already.
    pub pins: Option<I2cPins>,
    /// Poll budget of the blocking variants (at least 10 000).
    pub blocking_retries: u32,
}

/// A target on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2cDevice {
    address: u16,
}

impl I2cDevice {
    /// Target address.
    pub fn address(&self) -> u16 {
        self.address
    }
}

#[derive(Debug, Clone, Copy)]
struct Setup {
    tx: StreamId,
    rx: StreamId,
    address_mode: AddressMode,
    retries: u32,
}

struct Inflight {
    stream: StreamId,
    _buf: Region,
}

/// One I2C instance bound to the DMA engine.
pub struct I2c<'a, B: Mmio> {
    dma: &'a DmaEngine<B>,
    instance: I2cInstance,
    setup: Mutex<Cell<Option<Setup>>>,
    inflight: Mutex<RefCell<Option<Inflight>>>,
    // Stream done; waiting for STOP.
    draining: AtomicBool,
    state: TransferState,
}

impl<'a, B: Mmio> I2c<'a, B> {
    /// Uninitialised driver for `instance`.
    pub const fn new(dma: &'a DmaEngine<B>, instance: I2cInstance) -> Self {
        Self {
            dma,
            instance,
            setup: Mutex::new(Cell::new(None)),
            inflight: Mutex::new(RefCell::new(None)),
            draining: AtomicBool::new(false),
            state: TransferState::new(),
        }
    }

    /// `true` while a transfer is in flight.
    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    fn setup(&self) -> Result<Setup> {
        critical_section::with(|cs| self.setup.borrow(cs).get())
            .ok_or(Error::InvalidConfig("i2c not initialised"))
    }

    /// Handle for the target at `address`.
    pub fn device(&self, address: u16) -> Result<I2cDevice> {
        let limit = match self.setup()?.address_mode {
            AddressMode::SevenBit => 0x7F,
            AddressMode::TenBit => 0x3FF,
        };
        if address > limit {
            return Err(Error::InvalidConfig("i2c address out of range"));
        }
        Ok(I2cDevice { address })
    }

    fn end(&self, ok: bool) {
        let Some(inflight) = critical_section::with(|cs| self.inflight.borrow_ref_mut(cs).take())
        else {
            return;
        };
        self.draining.store(false, Ordering::Release);
        let bus = self.dma.bus();
        bus.clear_bits(
            self.instance.register(regs::CR1),
            regs::CR1_TXDMAEN | regs::CR1_RXDMAEN,
        );
        bus.write(self.instance.register(regs::ICR), regs::ICR_ALL);
        drop(inflight);
        if !ok {
            error!("i2c: transfer failed");
        }
        self.state.finish(ok);
    }

    fn on_stream_complete(&self, ok: bool) {
        match self.state.complete_one(ok) {
            None => {}
            Some(false) => self.end(false),
            Some(true) => {
                self.draining.store(true, Ordering::Release);
                self.on_interrupt();
            }
        }
    }

    /// Event and error interrupt body.
    ///
    /// A NACK, bus error, arbitration loss or overrun aborts the stream and
    /// fails the transfer; a STOP after the stream has completed finishes it.
    pub fn on_interrupt(&self) {
        let bus = self.dma.bus();
        let isr = bus.read(self.instance.register(regs::ISR));
        if isr & regs::ISR_FAULTS != 0 {
            bus.write(self.instance.register(regs::ICR), isr & regs::ICR_ALL);
            let stream = critical_section::with(|cs| {
                self.inflight.borrow_ref(cs).as_ref().map(|inflight| inflight.stream)
            });
            if let Some(stream) = stream {
                if isr & regs::ISR_NACKF != 0 {
                    warn!("i2c: {} target did not acknowledge", self.instance);
                }
                if let Err(error) = self.dma.abort_transfer(stream) {
                    warn!("i2c: stream abort failed: {}", error);
                }
                self.end(false);
            }
            return;
        }
        if isr & regs::ISR_STOPF != 0
            && self
                .draining
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.end(true);
        }
    }
}

fn on_dma<B: Mmio + 'static>(ok: bool, context: Context) {
    // SAFETY: every transfer of this driver passes `Context::from_ref` of a
    // `&'static I2c<'static, B>`.
    let i2c = unsafe { context.as_ref::<I2c<'static, B>>() };
    i2c.on_stream_complete(ok);
}

impl<B: Mmio + 'static> I2c<'static, B> {
    /// Bring up the block and claim its DMA streams.
    pub fn init(
        &'static self,
        config: I2cConfig,
        tx: PeriphDmaConfig,
        rx: PeriphDmaConfig,
        callback: Option<Completion>,
    ) -> Result<()> {
        peripheral::check_retries(config.blocking_retries)?;
        PeriphDmaConfig::check_pair(&tx, &rx)?;
        if config.digital_filter > 15 {
            return Err(Error::InvalidConfig("i2c digital filter out of range"));
        }
        if self.setup().is_ok() {
            return Err(Error::InvalidConfig("i2c already initialised"));
        }

        let bus = self.dma.bus();
        self.instance.clock().enable_and_reset(bus);
        if let Some(pins) = config.pins {
            for pin in [pins.scl, pins.sda] {
                gpio::enable_port_clock(bus, pin.port());
                gpio::set_output_type(bus, pin, OutputType::OpenDrain);
                gpio::set_speed(bus, pin, Speed::VeryHigh);
                gpio::set_pull(bus, pin, Pull::Up);
                gpio::set_alternate(bus, pin, PIN_AF)?;
            }
        }

        let cr1 = self.instance.register(regs::CR1);
        bus.clear_bits(cr1, regs::CR1_PE);
        let mut value = regs::CR1_DNF.encode(u32::from(config.digital_filter))
            | regs::CR1_NACKIE
            | regs::CR1_STOPIE
            | regs::CR1_ERRIE;
        if !config.analog_filter {
            value |= regs::CR1_ANFOFF;
        }
        bus.write(cr1, value);
        bus.write(self.instance.register(regs::TIMINGR), config.timing);

        let (rx_request, tx_request) = self.instance.requests();
        self.dma.configure_stream(&tx.complete(tx_request, on_dma::<B>))?;
        if let Err(error) = self.dma.configure_stream(&rx.complete(rx_request, on_dma::<B>)) {
            self.dma.release_stream(tx.stream)?;
            return Err(error);
        }
        let (event_irq, error_irq) = self.instance.irqs();
        nvic::enable(bus, event_irq)?;
        nvic::enable(bus, error_irq)?;

        bus.set_bits(cr1, regs::CR1_PE);
        self.state.set_callback(callback);
        critical_section::with(|cs| {
            self.setup.borrow(cs).set(Some(Setup {
                tx: tx.stream,
                rx: rx.stream,
                address_mode: config.address_mode,
                retries: config.blocking_retries,
            }));
        });
        info!("i2c: {} initialised", self.instance);
        Ok(())
    }

    fn start(&'static self, device: &I2cDevice, buf: Region, read: bool) -> Result<()> {
        let setup = self.setup()?;
        let len = buf.len();
        if len > MAX_TRANSFER {
            return Err(Error::InvalidConfig("i2c transfer exceeds 255 bytes"));
        }
        let addr = buf.address();
        self.state.begin(1)?;
        let stream = if read { setup.rx } else { setup.tx };
        critical_section::with(|cs| {
            *self.inflight.borrow_ref_mut(cs) = Some(Inflight { stream, _buf: buf });
        });

        let bus = self.dma.bus();
        bus.write(self.instance.register(regs::ICR), regs::ICR_ALL);
        let sadd = match setup.address_mode {
            AddressMode::SevenBit => u32::from(device.address).wrapping_shl(1),
            AddressMode::TenBit => u32::from(device.address),
        };
        let mut cr2 = regs::CR2_SADD.encode(sadd)
            | regs::CR2_NBYTES.encode(len)
            | regs::CR2_AUTOEND;
        if setup.address_mode == AddressMode::TenBit {
            cr2 |= regs::CR2_ADD10;
        }
        if read {
            cr2 |= regs::CR2_RD_WRN;
        }
        let cr2_addr = self.instance.register(regs::CR2);
        bus.write(cr2_addr, cr2);

        let context = Context::from_ref(self);
        let cr1 = self.instance.register(regs::CR1);
        let started = if read {
            bus.set_bits(cr1, regs::CR1_RXDMAEN);
            let src = self.instance.register(regs::RXDR);
            self.dma.start_transfer(setup.rx, src, addr, len, context)
        } else {
            bus.set_bits(cr1, regs::CR1_TXDMAEN);
            let dst = self.instance.register(regs::TXDR);
            self.dma.start_transfer(setup.tx, addr, dst, len, context)
        };
        if let Err(error) = started {
            bus.clear_bits(cr1, regs::CR1_TXDMAEN | regs::CR1_RXDMAEN);
            critical_section::with(|cs| self.inflight.borrow_ref_mut(cs).take());
            self.state.abort();
            return Err(error);
        }
        bus.set_bits(cr2_addr, regs::CR2_START);
        Ok(())
    }

    /// Start writing `buf` to `device`.
    pub fn write_async(&'static self, device: &I2cDevice, buf: Region) -> Result<()> {
        self.start(device, buf, false)
    }

    /// Start reading `buf.len()` bytes from `device`.
    pub fn read_async(&'static self, device: &I2cDevice, buf: Region) -> Result<()> {
        self.start(device, buf, true)
    }

    fn block(&self) -> Result<()> {
        let retries = self.setup()?.retries;
        self.state.wait_blocking(retries)
    }

    /// Write and spin until done.
    pub fn write_blocking(&'static self, device: &I2cDevice, buf: Region) -> Result<()> {
        self.write_async(device, buf)?;
        self.block()
    }

    /// Read and spin until done.
    pub fn read_blocking(&'static self, device: &I2cDevice, buf: Region) -> Result<()> {
        self.read_async(device, buf)?;
        self.block()
    }

    /// Write and await completion.
    pub async fn write(&'static self, device: &I2cDevice, buf: Region) -> Result<()> {
        self.write_async(device, buf)?;
        self.state.wait().await
    }

    /// Read and await completion.
    pub async fn read(&'static self, device: &I2cDevice, buf: Region) -> Result<()> {
        self.read_async(device, buf)?;
        self.state.wait().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::buffer::DmaBuffer;
    use crate::dma::{self, regs as dma_regs, Controller, Priority};
    use crate::gpio::{regs as gpio_regs, Port};
    use crate::sim::SimBus;
    use std::boxed::Box;

    fn stream(index: u8) -> StreamId {
        StreamId::new(Controller::Dma2, index).unwrap()
    }

    fn config() -> I2cConfig {
        I2cConfig {
            timing: 0x1090_9CEC,
            address_mode: AddressMode::SevenBit,
            analog_filter: true,
            digital_filter: 0,
            pins: Some(I2cPins {
                scl: PinId::new(Port::B, 8).unwrap(),
                sda: PinId::new(Port::B, 9).unwrap(),
            }),
            blocking_retries: 10_000,
        }
    }

    fn i2c() -> &'static I2c<'static, SimBus> {
        let dma: &'static DmaEngine<SimBus> = Box::leak(Box::new(DmaEngine::new(SimBus::new())));
        dma.init();
        let i2c = Box::leak(Box::new(I2c::new(dma, I2cInstance::I2c1)));
        i2c.init(
            config(),
            PeriphDmaConfig::tx(stream(4), Priority::Medium),
            PeriphDmaConfig::rx(stream(5), Priority::Medium),
            None,
        )
        .unwrap();
        i2c
    }

    fn region(len: usize) -> Region {
        let buf: &'static DmaBuffer<300> = Box::leak(Box::new(DmaBuffer::new()));
        buf.region(len).unwrap()
    }

    #[test]
    fn init_routes_pins_and_enables() {
        let i2c = i2c();
        let bus = i2c.dma.bus();
        assert_eq!(bus.peek(regs::I2C1_BASE + regs::TIMINGR), 0x1090_9CEC);
        assert!(bus.bits_set(regs::I2C1_BASE + regs::CR1, regs::CR1_PE));
        assert_eq!(bus.peek(Port::B.base() + gpio_regs::AFRH), 0x44);
        assert_eq!(bus.peek(Port::B.base() + gpio_regs::OTYPER), 0x300);
        assert_eq!(bus.peek(dma_regs::DMAMUX1_BASE + 4 * 12), 34);
        assert_eq!(bus.peek(dma_regs::DMAMUX1_BASE + 4 * 13), 33);
    }

    #[test]
    fn addresses_are_checked_against_mode() {
        let i2c = i2c();
        assert_eq!(i2c.device(0x48).unwrap().address(), 0x48);
        assert!(i2c.device(0x80).is_err());
    }

    #[test]
    fn read_programs_transaction_and_completes() {
        let i2c = i2c();
        let bus = i2c.dma.bus();
        let device = i2c.device(0x48).unwrap();
        i2c.read_async(&device, region(6)).unwrap();
        let cr2 = bus.peek(regs::I2C1_BASE + regs::CR2);
        assert_eq!(regs::CR2_SADD.decode(cr2), 0x90);
        assert_eq!(regs::CR2_NBYTES.decode(cr2), 6);
        assert!(cr2 & regs::CR2_RD_WRN != 0 && cr2 & regs::CR2_START != 0);
        assert_eq!(bus.peek(stream(5).register(dma_regs::PAR)), regs::I2C1_BASE + regs::RXDR);
        assert_eq!(i2c.read_async(&device, region(1)), Err(Error::Busy));

        dma::raise_flags(bus, stream(5), dma_regs::FLAG_TC);
        i2c.dma.on_interrupt(stream(5));
        assert!(!i2c.is_busy());
        assert_eq!(bus.peek(regs::I2C1_BASE + regs::CR1) & regs::CR1_RXDMAEN, 0);
    }

    #[test]
    fn init_enables_fault_interrupts() {
        let i2c = i2c();
        let bus = i2c.dma.bus();
        let cr1 = bus.peek(regs::I2C1_BASE + regs::CR1);
        assert_eq!(
            cr1 & (regs::CR1_NACKIE | regs::CR1_STOPIE | regs::CR1_ERRIE),
            regs::CR1_NACKIE | regs::CR1_STOPIE | regs::CR1_ERRIE
        );
        assert!(crate::nvic::is_enabled(bus, 31).unwrap());
        assert!(crate::nvic::is_enabled(bus, 32).unwrap());
    }

    #[test]
    fn nack_fails_transfer_and_frees_instance() {
        let i2c = i2c();
        let bus = i2c.dma.bus();
        let device = i2c.device(0x21).unwrap();
        i2c.write_async(&device, region(4)).unwrap();
        assert_eq!(i2c.dma.state(stream(4)), dma::StreamState::Running);

        // Nobody answers the address phase.
        bus.raise(regs::I2C1_BASE + regs::ISR, regs::ISR_NACKF);
        i2c.on_interrupt();

        assert!(!i2c.is_busy());
        assert_eq!(i2c.dma.state(stream(4)), dma::StreamState::Idle);
        assert_eq!(bus.peek(stream(4).register(dma_regs::CR)) & dma_regs::CR_EN, 0);
        assert_eq!(bus.peek(regs::I2C1_BASE + regs::ISR) & regs::ISR_NACKF, 0);
        assert_eq!(bus.peek(regs::I2C1_BASE + regs::CR1) & regs::CR1_TXDMAEN, 0);
        assert_eq!(i2c.state.wait_blocking(1), Err(Error::Transfer));

        // The instance is usable again.
        i2c.write_async(&device, region(1)).unwrap();
        dma::raise_flags(bus, stream(4), dma_regs::FLAG_TC);
        i2c.dma.on_interrupt(stream(4));
        assert!(!i2c.is_busy());
        assert_eq!(i2c.state.wait_blocking(1), Ok(()));
    }

    #[test]
    fn success_waits_for_stop() {
        let i2c = i2c();
        let bus = i2c.dma.bus();
        let isr = regs::I2C1_BASE + regs::ISR;
        let device = i2c.device(0x21).unwrap();
        i2c.write_async(&device, region(2)).unwrap();
        bus.hold_clear(isr, regs::ISR_STOPF);
        dma::raise_flags(bus, stream(4), dma_regs::FLAG_TC);
        i2c.dma.on_interrupt(stream(4));
        assert!(i2c.is_busy());

        // The last byte is NACKed after the stream drained.
        bus.raise(isr, regs::ISR_NACKF);
        i2c.on_interrupt();
        assert!(!i2c.is_busy());
        assert_eq!(i2c.state.wait_blocking(1), Err(Error::Transfer));

        bus.release(isr);
        i2c.write_async(&device, region(2)).unwrap();
        dma::raise_flags(bus, stream(4), dma_regs::FLAG_TC);
        i2c.dma.on_interrupt(stream(4));
        assert!(!i2c.is_busy());
    }

    #[test]
    fn bus_error_without_transfer_only_clears_flags() {
        let i2c = i2c();
        let bus = i2c.dma.bus();
        bus.raise(regs::I2C1_BASE + regs::ISR, regs::ISR_BERR);
        i2c.on_interrupt();
        assert_eq!(bus.peek(regs::I2C1_BASE + regs::ISR), 0);
        assert!(!i2c.is_busy());
    }

    #[test]
    fn oversized_transfer_is_rejected() {
        let i2c = i2c();
        let device = i2c.device(0x10).unwrap();
        assert!(matches!(
            i2c.write_async(&device, region(256)),
            Err(Error::InvalidConfig(_))
        ));
        assert!(!i2c.is_busy());
    }

    #[test]
    fn blocking_write_reports_transfer_error() {
        let i2c = i2c();
        let device = i2c.device(0x10).unwrap();
        let bus = i2c.dma.bus();
        // The stream interrupt fires from a second thread once the stream
        // is enabled.
        let handle = std::thread::spawn(move || {
            while !bus.bits_set(stream(4).register(dma_regs::CR), dma_regs::CR_EN) {
                std::thread::yield_now();
            }
            dma::raise_flags(bus, stream(4), dma_regs::FLAG_TE);
            i2c.dma.on_interrupt(stream(4));
        });
        let result = i2c.write_async(&device, region(2)).and_then(|()| {
            i2c.state.wait_blocking(u32::MAX)
        });
        handle.join().unwrap();
        assert_eq!(result, Err(Error::Transfer));
    }
}
