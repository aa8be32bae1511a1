//! SPI1..SPI6 master driver over DMA.
//!
//! An instance owns a TX and an RX DMA stream and up to [`MAX_DEVICES`]
//! chip-select lines. Every transfer asserts the device's chip select,
//! programs the block, starts the streams and returns; the streams'
//! completion interrupts count down to the last stream. The DMA finishing
//! only means the FIFO has been fed, so the transfer then waits for the
//! block's end-of-transfer flag (`SR.EOT`, via the instance IRQ and
//! [`Spi::on_interrupt`]) before it releases chip select and the instance
//! and runs the user callback. Blocking and `async` variants wait on the
//! same completion.

use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use critical_section::Mutex;

use crate::buffer::Region;
use crate::dma::{Context, DmaEngine, StreamId, Width};
use crate::error::{Error, Result};
use crate::gpio::{self, PinId};
use crate::mmio::Mmio;
use crate::peripheral::{self, BitOrder, Completion, PeriphDmaConfig, SpiMode};
use crate::nvic;
use crate::rcc::{self, Clock};
use crate::transfer::TransferState;

/// Register map.
#[allow(missing_docs)]
pub mod regs {
    use crate::mmio::Field;

    pub const SPI1_BASE: u32 = 0x4001_3000;
    pub const SPI2_BASE: u32 = 0x4000_3800;
    pub const SPI3_BASE: u32 = 0x4000_3C00;
    pub const SPI4_BASE: u32 = 0x4001_3400;
    pub const SPI5_BASE: u32 = 0x4001_5000;
    pub const SPI6_BASE: u32 = 0x5800_1400;

    pub const CR1: u32 = 0x00;
    pub const CR2: u32 = 0x04;
    pub const CFG1: u32 = 0x08;
    pub const CFG2: u32 = 0x0C;
    pub const IER: u32 = 0x10;
    pub const SR: u32 = 0x14;
    pub const IFCR: u32 = 0x18;
    pub const TXDR: u32 = 0x20;
    pub const RXDR: u32 = 0x30;

    pub const CR1_SPE: u32 = 1 << 0;
    pub const CR1_CSTART: u32 = 1 << 9;
    pub const CR1_SSI: u32 = 1 << 12;

    pub const CR2_TSIZE: Field = Field::new(0, 16);

    pub const CFG1_DSIZE: Field = Field::new(0, 5);
    pub const CFG1_RXDMAEN: u32 = 1 << 14;
    pub const CFG1_TXDMAEN: u32 = 1 << 15;
    pub const CFG1_MBR: Field = Field::new(28, 3);

    pub const CFG2_COMM: Field = Field::new(17, 2);
    pub const CFG2_MASTER: u32 = 1 << 22;
    pub const CFG2_LSBFRST: u32 = 1 << 23;
    pub const CFG2_CPHA: u32 = 1 << 24;
    pub const CFG2_CPOL: u32 = 1 << 25;
    pub const CFG2_SSM: u32 = 1 << 26;

    pub const IER_EOTIE: u32 = 1 << 3;

    pub const SR_EOT: u32 = 1 << 3;
    pub const IFCR_EOTC: u32 = 1 << 3;
    pub const IFCR_TXTFC: u32 = 1 << 4;
}

/// Chip-select lines per instance.
pub const MAX_DEVICES: u8 = 5;

const TSIZE_MAX: u32 = 0xFFFF;

/// SPI block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiInstance {
    /// SPI1.
    Spi1,
    /// SPI2.
    Spi2,
    /// SPI3.
    Spi3,
    /// SPI4.
    Spi4,
    /// SPI5.
    Spi5,
    /// SPI6 (D3 domain, no DMAMUX1 request line).
    Spi6,
}

impl SpiInstance {
    /// Register block base.
    pub const fn base(self) -> u32 {
        match self {
            Self::Spi1 => regs::SPI1_BASE,
            Self::Spi2 => regs::SPI2_BASE,
            Self::Spi3 => regs::SPI3_BASE,
            Self::Spi4 => regs::SPI4_BASE,
            Self::Spi5 => regs::SPI5_BASE,
            Self::Spi6 => regs::SPI6_BASE,
        }
    }

    /// Kernel clock enable/reset bit.
    pub const fn clock(self) -> Clock {
        use rcc::regs::{APB1LENR, APB1LRSTR, APB2ENR, APB2RSTR, APB4ENR, APB4RSTR};
        match self {
            Self::Spi1 => Clock::new(APB2ENR, APB2RSTR, 12),
            Self::Spi2 => Clock::new(APB1LENR, APB1LRSTR, 14),
            Self::Spi3 => Clock::new(APB1LENR, APB1LRSTR, 15),
            Self::Spi4 => Clock::new(APB2ENR, APB2RSTR, 13),
            Self::Spi5 => Clock::new(APB2ENR, APB2RSTR, 20),
            Self::Spi6 => Clock::new(APB4ENR, APB4RSTR, 5),
        }
    }

    /// DMAMUX1 `(rx, tx)` request lines.
    pub const fn requests(self) -> Option<(u8, u8)> {
        match self {
            Self::Spi1 => Some((37, 38)),
            Self::Spi2 => Some((39, 40)),
            Self::Spi3 => Some((61, 62)),
            Self::Spi4 => Some((83, 84)),
            Self::Spi5 => Some((85, 86)),
            Self::Spi6 => None,
        }
    }

    /// Global interrupt line.
    pub const fn irq(self) -> u16 {
        match self {
            Self::Spi1 => 35,
            Self::Spi2 => 36,
            Self::Spi3 => 51,
            Self::Spi4 => 84,
            Self::Spi5 => 85,
            Self::Spi6 => 86,
        }
    }

    const fn register(self, offset: u32) -> u32 {
        self.base().wrapping_add(offset)
    }
}

/// Frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataSize {
    /// 8-bit frames.
    Eight,
    /// 16-bit frames.
    Sixteen,
}

impl DataSize {
    const fn dsize(self) -> u32 {
        match self {
            Self::Eight => 7,
            Self::Sixteen => 15,
        }
    }

    /// DMA item width matching the frame.
    pub const fn width(self) -> Width {
        match self {
            Self::Eight => Width::Byte,
            Self::Sixteen => Width::HalfWord,
        }
    }
}

/// Master clock divider (MBR).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BaudPrescaler {
    /// ÷2
    Div2 = 0,
    /// ÷4
    Div4 = 1,
    /// ÷8
    Div8 = 2,
    /// ÷16
    Div16 = 3,
    /// ÷32
    Div32 = 4,
    /// ÷64
    Div64 = 5,
    /// ÷128
    Div128 = 6,
    /// ÷256
    Div256 = 7,
}

/// Instance configuration.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiConfig {
    /// Clock polarity and phase.
    pub mode: SpiMode,
    /// Frame size.
    pub data_size: DataSize,
    /// Clock divider.
    pub prescaler: BaudPrescaler,
    /// Bit order.
    pub bit_order: BitOrder,
    /// Poll budget of the blocking variants (at least 10 000).
    pub blocking_retries: u32,
}

/// Handle to a device on an instance's bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiDevice {
    cs: PinId,
}

impl SpiDevice {
    /// Chip-select pin.
    pub fn cs(&self) -> PinId {
        self.cs
    }
}

#[derive(Debug, Clone, Copy)]
struct Setup {
    tx: StreamId,
    rx: StreamId,
    width: Width,
    retries: u32,
}

#[derive(Debug, Clone, Copy)]
enum Comm {
    FullDuplex = 0,
    Transmit = 1,
    Receive = 2,
}

struct Active {
    cs: PinId,
    _regions: [Option<Region>; 2],
}

/// One SPI instance bound to the DMA engine.
pub struct Spi<'a, B: Mmio> {
    dma: &'a DmaEngine<B>,
    instance: SpiInstance,
    setup: Mutex<Cell<Option<Setup>>>,
    devices: AtomicU8,
    active: Mutex<RefCell<Option<Active>>>,
    // Every stream is done; waiting for EOT.
    draining: AtomicBool,
    state: TransferState,
}

impl<'a, B: Mmio> Spi<'a, B> {
    /// Uninitialised driver for `instance`.
    pub const fn new(dma: &'a DmaEngine<B>, instance: SpiInstance) -> Self {
        Self {
            dma,
            instance,
            setup: Mutex::new(Cell::new(None)),
            devices: AtomicU8::new(0),
            active: Mutex::new(RefCell::new(None)),
            draining: AtomicBool::new(false),
            state: TransferState::new(),
        }
    }

    /// Which block this driver runs.
    pub fn instance(&self) -> SpiInstance {
        self.instance
    }

    /// `true` while a transfer is in flight.
    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    fn setup(&self) -> Result<Setup> {
        critical_section::with(|cs| self.setup.borrow(cs).get())
            .ok_or(Error::InvalidConfig("spi not initialised"))
    }

    /// Configure `cs` as an inactive-high output and hand out a device.
    pub fn device_init(&self, cs: PinId) -> Result<SpiDevice> {
        self.devices
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < MAX_DEVICES).then(|| n.wrapping_add(1))
            })
            .map_err(|_| Error::InvalidConfig("too many devices on spi instance"))?;
        gpio::configure_output(self.dma.bus(), cs, true);
        Ok(SpiDevice { cs })
    }

    fn end(&self, ok: bool) {
        let bus = self.dma.bus();
        self.draining.store(false, Ordering::Release);
        bus.clear_bits(self.instance.register(regs::IER), regs::IER_EOTIE);
        bus.clear_bits(self.instance.register(regs::CR1), regs::CR1_SPE);
        bus.clear_bits(
            self.instance.register(regs::CFG1),
            regs::CFG1_RXDMAEN | regs::CFG1_TXDMAEN,
        );
        bus.write(
            self.instance.register(regs::IFCR),
            regs::IFCR_EOTC | regs::IFCR_TXTFC,
        );
        let active = critical_section::with(|cs| self.active.borrow_ref_mut(cs).take());
        if let Some(active) = active {
            gpio::write(bus, active.cs, true);
        }
        if !ok {
            error!("spi: transfer failed");
        }
        self.state.finish(ok);
    }

    fn on_stream_complete(&self, ok: bool) {
        match self.state.complete_one(ok) {
            None => {}
            Some(false) => self.end(false),
            Some(true) => {
                let bus = self.dma.bus();
                self.draining.store(true, Ordering::Release);
                bus.set_bits(self.instance.register(regs::IER), regs::IER_EOTIE);
                // EOT may already be up; the IRQ would fire at once on
                // hardware, so finish here instead of waiting for it.
                self.on_interrupt();
            }
        }
    }

    /// SPI global interrupt body: finishes a drained transfer once the
    /// shifter reports end of transfer.
    pub fn on_interrupt(&self) {
        let sr = self.dma.bus().read(self.instance.register(regs::SR));
        if sr & regs::SR_EOT == 0 {
            return;
        }
        if self
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
    // `&'static Spi<'static, B>`.
    let spi = unsafe { context.as_ref::<Spi<'static, B>>() };
    spi.on_stream_complete(ok);
}

impl<B: Mmio + 'static> Spi<'static, B> {
    /// Bring up the block and claim its DMA streams.
    pub fn init(
        &'static self,
        config: SpiConfig,
        tx: PeriphDmaConfig,
        rx: PeriphDmaConfig,
        callback: Option<Completion>,
    ) -> Result<()> {
        let (rx_request, tx_request) = self
            .instance
            .requests()
            .ok_or(Error::InvalidConfig("spi instance has no dma request line"))?;
        peripheral::check_retries(config.blocking_retries)?;
        PeriphDmaConfig::check_pair(&tx, &rx)?;
        let width = config.data_size.width();
        if tx.dst_width != width || rx.src_width != width {
            return Err(Error::InvalidConfig("dma width does not match spi data size"));
        }
        if self.setup().is_ok() {
            return Err(Error::InvalidConfig("spi already initialised"));
        }

        let bus = self.dma.bus();
        self.instance.clock().enable_and_reset(bus);
        bus.write(self.instance.register(regs::CR1), regs::CR1_SSI);
        bus.write(
            self.instance.register(regs::CFG1),
            regs::CFG1_DSIZE.encode(config.data_size.dsize())
                | regs::CFG1_MBR.encode(config.prescaler as u32),
        );
        let mut cfg2 = regs::CFG2_MASTER | regs::CFG2_SSM;
        if config.mode.cpol() {
            cfg2 |= regs::CFG2_CPOL;
        }
        if config.mode.cpha() {
            cfg2 |= regs::CFG2_CPHA;
        }
        if config.bit_order == BitOrder::LsbFirst {
            cfg2 |= regs::CFG2_LSBFRST;
        }
        bus.write(self.instance.register(regs::CFG2), cfg2);

        self.dma.configure_stream(&tx.complete(tx_request, on_dma::<B>))?;
        if let Err(error) = self.dma.configure_stream(&rx.complete(rx_request, on_dma::<B>)) {
            self.dma.release_stream(tx.stream)?;
            return Err(error);
        }
        nvic::enable(bus, self.instance.irq())?;

        self.state.set_callback(callback);
        critical_section::with(|cs| {
            self.setup.borrow(cs).set(Some(Setup {
                tx: tx.stream,
                rx: rx.stream,
                width,
                retries: config.blocking_retries,
            }));
        });
        info!("spi: {} initialised", self.instance);
        Ok(())
    }

    fn start(&'static self, device: &SpiDevice, tx: Option<Region>, rx: Option<Region>) -> Result<()> {
        let setup = self.setup()?;
        let len = match (&tx, &rx) {
            (Some(t), Some(r)) if t.len() != r.len() => {
                return Err(Error::InvalidConfig("tx and rx lengths differ"));
            }
            (Some(t), _) => t.len(),
            (None, Some(r)) => r.len(),
            (None, None) => return Err(Error::InvalidConfig("zero-length transfer")),
        };
        let frames = len / setup.width.bytes();
        if len % setup.width.bytes() != 0 || frames > TSIZE_MAX {
            return Err(Error::InvalidConfig("length does not fit the frame size"));
        }
        let comm = match (&tx, &rx) {
            (Some(_), Some(_)) => Comm::FullDuplex,
            (Some(_), None) => Comm::Transmit,
            _ => Comm::Receive,
        };
        let tx_addr = tx.as_ref().map(Region::address);
        let rx_addr = rx.as_ref().map(Region::address);
        let streams = u8::from(tx.is_some()).wrapping_add(u8::from(rx.is_some()));

        self.state.begin(streams)?;
        critical_section::with(|cs| {
            *self.active.borrow_ref_mut(cs) = Some(Active {
                cs: device.cs,
                _regions: [tx, rx],
            });
        });

        let bus = self.dma.bus();
        let context = Context::from_ref(self);
        let cr1 = self.instance.register(regs::CR1);
        let cfg1 = self.instance.register(regs::CFG1);

        gpio::write(bus, device.cs, false);
        bus.clear_bits(cr1, regs::CR1_SPE);
        bus.write(self.instance.register(regs::IFCR), regs::IFCR_EOTC | regs::IFCR_TXTFC);
        bus.write_field(self.instance.register(regs::CR2), regs::CR2_TSIZE, frames);
        bus.write_field(self.instance.register(regs::CFG2), regs::CFG2_COMM, comm as u32);

        let mut rx_started = false;
        let result = (|| -> Result<()> {
            if let Some(dst) = rx_addr {
                bus.set_bits(cfg1, regs::CFG1_RXDMAEN);
                let src = self.instance.register(regs::RXDR);
                self.dma.start_transfer(setup.rx, src, dst, len, context)?;
                rx_started = true;
            }
            if let Some(src) = tx_addr {
                let dst = self.instance.register(regs::TXDR);
                self.dma.start_transfer(setup.tx, src, dst, len, context)?;
                bus.set_bits(cfg1, regs::CFG1_TXDMAEN);
            }
            Ok(())
        })();

        let Err(error) = result else {
            bus.set_bits(cr1, regs::CR1_SPE);
            bus.set_bits(cr1, regs::CR1_CSTART);
            return Ok(());
        };

        // SPE and CSTART were never set, so a running RX stream can never
        // complete: stop it before giving the instance back.
        bus.clear_bits(cfg1, regs::CFG1_RXDMAEN | regs::CFG1_TXDMAEN);
        if rx_started {
            if let Err(abort) = self.dma.abort_transfer(setup.rx) {
                warn!("spi: rx stream abort failed: {}", abort);
            }
        }
        critical_section::with(|cs| self.active.borrow_ref_mut(cs).take());
        gpio::write(bus, device.cs, true);
        self.state.abort();
        Err(error)
    }

    /// Start sending `buf` to `device`.
    pub fn write_async(&'static self, device: &SpiDevice, buf: Region) -> Result<()> {
        self.start(device, Some(buf), None)
    }

    /// Start receiving into `buf` from `device`.
    pub fn read_async(&'static self, device: &SpiDevice, buf: Region) -> Result<()> {
        self.start(device, None, Some(buf))
    }

    /// Start a full-duplex exchange of equal-length buffers.
    pub fn transfer_async(&'static self, device: &SpiDevice, tx: Region, rx: Region) -> Result<()> {
        self.start(device, Some(tx), Some(rx))
    }

    fn block(&self) -> Result<()> {
        let retries = self.setup()?.retries;
        self.state.wait_blocking(retries)
    }

    /// Send `buf` and spin until done.
    pub fn write_blocking(&'static self, device: &SpiDevice, buf: Region) -> Result<()> {
        self.write_async(device, buf)?;
        self.block()
    }

    /// Receive into `buf` and spin until done.
    pub fn read_blocking(&'static self, device: &SpiDevice, buf: Region) -> Result<()> {
        self.read_async(device, buf)?;
        self.block()
    }

    /// Full-duplex exchange, spinning until done.
    pub fn transfer_blocking(&'static self, device: &SpiDevice, tx: Region, rx: Region) -> Result<()> {
        self.transfer_async(device, tx, rx)?;
        self.block()
    }

    /// Send `buf` and await completion.
    pub async fn write(&'static self, device: &SpiDevice, buf: Region) -> Result<()> {
        self.write_async(device, buf)?;
        self.state.wait().await
    }

    /// Receive into `buf` and await completion.
    pub async fn read(&'static self, device: &SpiDevice, buf: Region) -> Result<()> {
        self.read_async(device, buf)?;
        self.state.wait().await
    }

    /// Full-duplex exchange, awaiting completion.
    pub async fn transfer(&'static self, device: &SpiDevice, tx: Region, rx: Region) -> Result<()> {
        self.transfer_async(device, tx, rx)?;
        self.state.wait().await
    }
}
