//! USART/UART driver over DMA.
//!
//! The instance is the endpoint: there are no device handles. TX and RX
//! each own a DMA stream; a transfer may use one or both, and finishes when
//! every stream it started has completed.

use core::cell::{Cell, RefCell};

use critical_section::Mutex;

use crate::buffer::Region;
use crate::dma::{Context, DmaEngine, StreamId};
use crate::error::{Error, Result};
use crate::gpio::{self, PinId};
use crate::mmio::Mmio;
use crate::peripheral::{
    self, Completion, DataBits, Parity, PeriphDmaConfig, StopBits, KERNEL_CLOCK_HZ,
};
use crate::rcc::{self, Clock};
use crate::transfer::TransferState;

/// Register map.
#[allow(missing_docs)]
pub mod regs {
    use crate::mmio::Field;

    pub const CR1: u32 = 0x00;
    pub const CR2: u32 = 0x04;
    pub const CR3: u32 = 0x08;
    pub const BRR: u32 = 0x0C;
    pub const ISR: u32 = 0x1C;
    pub const ICR: u32 = 0x20;
    pub const RDR: u32 = 0x24;
    pub const TDR: u32 = 0x28;

    pub const CR1_UE: u32 = 1 << 0;
    pub const CR1_RE: u32 = 1 << 2;
    pub const CR1_TE: u32 = 1 << 3;
    pub const CR1_PS: u32 = 1 << 9;
    pub const CR1_PCE: u32 = 1 << 10;
    pub const CR1_M0: u32 = 1 << 12;
    pub const CR1_M1: u32 = 1 << 28;
    pub const CR1_FIFOEN: u32 = 1 << 29;

    pub const CR2_STOP: Field = Field::new(12, 2);

    pub const CR3_DMAR: u32 = 1 << 6;
    pub const CR3_DMAT: u32 = 1 << 7;

    pub const ICR_TCCF: u32 = 1 << 6;
}

/// Smallest BRR the block accepts with 16x oversampling.
pub const BRR_MIN: u32 = 16;

/// USART or UART block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsartInstance {
    /// USART1.
    Usart1,
    /// USART2.
    Usart2,
    /// USART3.
    Usart3,
    /// UART4.
    Uart4,
    /// UART5.
    Uart5,
    /// USART6.
    Usart6,
    /// UART7.
    Uart7,
    /// UART8.
    Uart8,
}

impl UsartInstance {
    /// Register block base.
    pub const fn base(self) -> u32 {
        match self {
            Self::Usart1 => 0x4001_1000,
            Self::Usart2 => 0x4000_4400,
            Self::Usart3 => 0x4000_4800,
            Self::Uart4 => 0x4000_4C00,
            Self::Uart5 => 0x4000_5000,
            Self::Usart6 => 0x4001_1400,
            Self::Uart7 => 0x4000_7800,
            Self::Uart8 => 0x4000_7C00,
        }
    }

    /// Kernel clock enable/reset bit.
    pub const fn clock(self) -> Clock {
        use rcc::regs::{APB1LENR, APB1LRSTR, APB2ENR, APB2RSTR};
        match self {
            Self::Usart1 => Clock::new(APB2ENR, APB2RSTR, 4),
            Self::Usart6 => Clock::new(APB2ENR, APB2RSTR, 5),
            Self::Usart2 => Clock::new(APB1LENR, APB1LRSTR, 17),
            Self::Usart3 => Clock::new(APB1LENR, APB1LRSTR, 18),
            Self::Uart4 => Clock::new(APB1LENR, APB1LRSTR, 19),
            Self::Uart5 => Clock::new(APB1LENR, APB1LRSTR, 20),
            Self::Uart7 => Clock::new(APB1LENR, APB1LRSTR, 30),
            Self::Uart8 => Clock::new(APB1LENR, APB1LRSTR, 31),
        }
    }

    /// DMAMUX1 `(rx, tx)` request lines.
    pub const fn requests(self) -> (u8, u8) {
        match self {
            Self::Usart1 => (41, 42),
            Self::Usart2 => (43, 44),
            Self::Usart3 => (45, 46),
            Self::Uart4 => (63, 64),
            Self::Uart5 => (65, 66),
            Self::Usart6 => (71, 72),
            Self::Uart7 => (79, 80),
            Self::Uart8 => (81, 82),
        }
    }

    /// Alternate function of the TX/RX pins.
    pub const fn pin_af(self) -> u8 {
        match self {
            Self::Uart4 | Self::Uart5 | Self::Uart8 => 8,
            _ => 7,
        }
    }

    const fn register(self, offset: u32) -> u32 {
        self.base().wrapping_add(offset)
    }
}

/// Instance configuration.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UsartConfig {
    /// Bits per second.
    pub baud: u32,
    /// Data bits, parity excluded.
    pub data_bits: DataBits,
    /// Parity.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// `(tx, rx)` pins to route, if the board has not done it already.
    pub pins: Option<(PinId, PinId)>,
    /// Poll budget of the blocking variants (at least 10 000).
    pub blocking_retries: u32,
}

impl UsartConfig {
    /// BRR for the configured baud rate.
    pub fn brr(&self) -> Result<u32> {
        KERNEL_CLOCK_HZ
            .checked_div(self.baud)
            .filter(|&brr| brr >= BRR_MIN && brr <= 0xFFFF)
            .ok_or(Error::InvalidConfig("baud rate out of range"))
    }

    /// M1/M0 and parity bits of CR1.
    fn frame_bits(&self) -> Result<u32> {
        let parity_bits = u8::from(self.parity != Parity::None);
        let frame = match self.data_bits.count().wrapping_add(parity_bits) {
            7 => regs::CR1_M1,
            8 => 0,
            9 => regs::CR1_M0,
            _ => return Err(Error::InvalidConfig("frame length must be 7, 8 or 9 bits")),
        };
        let parity = match self.parity {
            Parity::None => 0,
            Parity::Even => regs::CR1_PCE,
            Parity::Odd => regs::CR1_PCE | regs::CR1_PS,
        };
        Ok(frame | parity)
    }
}

#[derive(Debug, Clone, Copy)]
struct Setup {
    tx: StreamId,
    rx: StreamId,
    retries: u32,
}

/// One USART instance bound to the DMA engine.
pub struct Usart<'a, B: Mmio> {
    dma: &'a DmaEngine<B>,
    instance: UsartInstance,
    setup: Mutex<Cell<Option<Setup>>>,
    lent: Mutex<RefCell<[Option<Region>; 2]>>,
    state: TransferState,
}

impl<'a, B: Mmio> Usart<'a, B> {
    /// Uninitialised driver for `instance`.
    pub const fn new(dma: &'a DmaEngine<B>, instance: UsartInstance) -> Self {
        Self {
            dma,
            instance,
            setup: Mutex::new(Cell::new(None)),
            lent: Mutex::new(RefCell::new([None, None])),
            state: TransferState::new(),
        }
    }

    /// `true` while a transfer is in flight.
    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    fn setup(&self) -> Result<Setup> {
        critical_section::with(|cs| self.setup.borrow(cs).get())
            .ok_or(Error::InvalidConfig("usart not initialised"))
    }

    fn release(&self) {
        let bus = self.dma.bus();
        bus.clear_bits(
            self.instance.register(regs::CR3),
            regs::CR3_DMAT | regs::CR3_DMAR,
        );
        bus.write(self.instance.register(regs::ICR), regs::ICR_TCCF);
        critical_section::with(|cs| *self.lent.borrow_ref_mut(cs) = [None, None]);
    }

    fn on_stream_complete(&self, ok: bool) {
        if let Some(ok) = self.state.complete_one(ok) {
            self.release();
            if !ok {
                error!("usart: transfer failed");
            }
            self.state.finish(ok);
        }
    }
}

fn on_dma<B: Mmio + 'static>(ok: bool, context: Context) {
    // SAFETY: every transfer of this driver passes `Context::from_ref` of a
    // `&'static Usart<'static, B>`.
    let usart = unsafe { context.as_ref::<Usart<'static, B>>() };
    usart.on_stream_complete(ok);
}

impl<B: Mmio + 'static> Usart<'static, B> {
    /// Bring up the block and claim its DMA streams.
    pub fn init(
        &'static self,
        config: UsartConfig,
        tx: PeriphDmaConfig,
        rx: PeriphDmaConfig,
        callback: Option<Completion>,
    ) -> Result<()> {
        peripheral::check_retries(config.blocking_retries)?;
        PeriphDmaConfig::check_pair(&tx, &rx)?;
        let brr = config.brr()?;
        let frame = config.frame_bits()?;
        if self.setup().is_ok() {
            return Err(Error::InvalidConfig("usart already initialised"));
        }

        let bus = self.dma.bus();
        self.instance.clock().enable_and_reset(bus);
        if let Some((tx_pin, rx_pin)) = config.pins {
            for pin in [tx_pin, rx_pin] {
                gpio::enable_port_clock(bus, pin.port());
                gpio::set_alternate(bus, pin, self.instance.pin_af())?;
            }
        }

        let cr1 = self.instance.register(regs::CR1);
        bus.write(cr1, 0);
        bus.write(self.instance.register(regs::BRR), brr);
        bus.write_field(
            self.instance.register(regs::CR2),
            regs::CR2_STOP,
            config.stop_bits as u32,
        );
        bus.write(cr1, frame | regs::CR1_FIFOEN);

        let (rx_request, tx_request) = self.instance.requests();
        self.dma.configure_stream(&tx.complete(tx_request, on_dma::<B>))?;
        if let Err(error) = self.dma.configure_stream(&rx.complete(rx_request, on_dma::<B>)) {
            self.dma.release_stream(tx.stream)?;
            return Err(error);
        }

        bus.set_bits(cr1, regs::CR1_UE | regs::CR1_TE | regs::CR1_RE);
        self.state.set_callback(callback);
        critical_section::with(|cs| {
            self.setup.borrow(cs).set(Some(Setup {
                tx: tx.stream,
                rx: rx.stream,
                retries: config.blocking_retries,
            }));
        });
        info!("usart: {} initialised at {} baud", self.instance, config.baud);
        Ok(())
    }

    fn start(&'static self, tx: Option<Region>, rx: Option<Region>) -> Result<()> {
        let setup = self.setup()?;
        let tx_span = tx.as_ref().map(|r| (r.address(), r.len()));
        let rx_span = rx.as_ref().map(|r| (r.address(), r.len()));
        let streams = u8::from(tx_span.is_some()).wrapping_add(u8::from(rx_span.is_some()));
        if streams == 0 {
            return Err(Error::InvalidConfig("zero-length transfer"));
        }

        self.state.begin(streams)?;
        critical_section::with(|cs| *self.lent.borrow_ref_mut(cs) = [tx, rx]);

        let bus = self.dma.bus();
        let cr3 = self.instance.register(regs::CR3);
        let context = Context::from_ref(self);
        let mut started = 0u8;
        let result = (|| -> Result<()> {
            if let Some((dst, len)) = rx_span {
                bus.set_bits(cr3, regs::CR3_DMAR);
                let src = self.instance.register(regs::RDR);
                self.dma.start_transfer(setup.rx, src, dst, len, context)?;
                started = started.wrapping_add(1);
            }
            if let Some((src, len)) = tx_span {
                bus.write(self.instance.register(regs::ICR), regs::ICR_TCCF);
                bus.set_bits(cr3, regs::CR3_DMAT);
                let dst = self.instance.register(regs::TDR);
                self.dma.start_transfer(setup.tx, src, dst, len, context)?;
                started = started.wrapping_add(1);
            }
            Ok(())
        })();

        match result {
            Ok(()) => Ok(()),
            Err(error) if started == 0 => {
                self.release();
                self.state.abort();
                Err(error)
            }
            Err(error) => {
                // The RX stream is already running; its completion ends the
                // transfer as failed.
                for _ in started..streams {
                    self.on_stream_complete(false);
                }
                Err(error)
            }
        }
    }

    /// Start sending `buf`.
    pub fn write_async(&'static self, buf: Region) -> Result<()> {
        self.start(Some(buf), None)
    }

    /// Start receiving exactly `buf.len()` bytes.
    pub fn read_async(&'static self, buf: Region) -> Result<()> {
        self.start(None, Some(buf))
    }

    /// Start sending `tx` while receiving into `rx`.
    pub fn transfer_async(&'static self, tx: Region, rx: Region) -> Result<()> {
        self.start(Some(tx), Some(rx))
    }

    fn block(&self) -> Result<()> {
        let retries = self.setup()?.retries;
        self.state.wait_blocking(retries)
    }

    /// Send and spin until done.
    pub fn write_blocking(&'static self, buf: Region) -> Result<()> {
        self.write_async(buf)?;
        self.block()
    }

    /// Receive and spin until done.
    pub fn read_blocking(&'static self, buf: Region) -> Result<()> {
        self.read_async(buf)?;
        self.block()
    }

    /// Send and receive, spinning until both finish.
    pub fn transfer_blocking(&'static self, tx: Region, rx: Region) -> Result<()> {
        self.transfer_async(tx, rx)?;
        self.block()
    }

    /// Send and await completion.
    pub async fn write(&'static self, buf: Region) -> Result<()> {
        self.write_async(buf)?;
        self.state.wait().await
    }

    /// Receive and await completion.
    pub async fn read(&'static self, buf: Region) -> Result<()> {
        self.read_async(buf)?;
        self.state.wait().await
    }

    /// Send and receive, awaiting both.
    pub async fn transfer(&'static self, tx: Region, rx: Region) -> Result<()> {
        self.transfer_async(tx, rx)?;
        self.state.wait().await
    }
}
