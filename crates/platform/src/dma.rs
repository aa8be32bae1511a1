//! DMA1/DMA2 stream engine.
//!
//! Each of the sixteen streams (two controllers, eight streams each) moves
//! through a small state machine:
//!
//! ```text
//! Unconfigured --configure_stream--> Idle --start_transfer--> Running
//!      ^                              |  ^                       |
//!      +-------release_stream---------+  +----IRQ (TC or TE)-----+
//! ```
//!
//! A stream has at most one transfer in flight, and its callback runs exactly
//! once per started transfer, from the stream's IRQ, with the context the
//! caller supplied. Peripheral request lines are routed to streams through
//! DMAMUX1 at configuration time.
//!
//! Per-stream bookkeeping lives inside the engine behind a
//! `critical_section::Mutex`, so a `static DmaEngine` can be shared between
//! thread mode and the stream interrupt handlers.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::error::{Error, Result};
use crate::mmio::Mmio;
use crate::nvic;
use crate::rcc::{self, Clock};

/// Register map.
#[allow(missing_docs)]
pub mod regs {
    use crate::mmio::Field;

    pub const DMA1_BASE: u32 = 0x4002_0000;
    pub const DMA2_BASE: u32 = 0x4002_0400;

    pub const LISR: u32 = 0x00;
    pub const HISR: u32 = 0x04;
    pub const LIFCR: u32 = 0x08;
    pub const HIFCR: u32 = 0x0C;

    /// First stream register block and stride between blocks.
    pub const STREAM_BASE: u32 = 0x10;
    pub const STREAM_STRIDE: u32 = 0x18;

    // Offsets inside a stream block.
    pub const CR: u32 = 0x00;
    pub const NDTR: u32 = 0x04;
    pub const PAR: u32 = 0x08;
    pub const M0AR: u32 = 0x0C;
    pub const M1AR: u32 = 0x10;
    pub const FCR: u32 = 0x14;

    pub const CR_EN: u32 = 1 << 0;
    pub const CR_DMEIE: u32 = 1 << 1;
    pub const CR_TEIE: u32 = 1 << 2;
    pub const CR_HTIE: u32 = 1 << 3;
    pub const CR_TCIE: u32 = 1 << 4;
    pub const CR_DIR: Field = Field::new(6, 2);
    pub const CR_CIRC: u32 = 1 << 8;
    pub const CR_PINC: u32 = 1 << 9;
    pub const CR_MINC: u32 = 1 << 10;
    pub const CR_PSIZE: Field = Field::new(11, 2);
    pub const CR_MSIZE: Field = Field::new(13, 2);
    pub const CR_PL: Field = Field::new(16, 2);

    pub const FCR_FTH: Field = Field::new(0, 2);
    pub const FCR_DMDIS: u32 = 1 << 2;

    // Per-stream flags, before shifting into the stream's ISR position.
    pub const FLAG_FE: u32 = 1 << 0;
    pub const FLAG_DME: u32 = 1 << 2;
    pub const FLAG_TE: u32 = 1 << 3;
    pub const FLAG_HT: u32 = 1 << 4;
    pub const FLAG_TC: u32 = 1 << 5;
    pub const FLAGS_ALL: u32 = FLAG_FE | FLAG_DME | FLAG_TE | FLAG_HT | FLAG_TC;

    /// Bit position of each stream's flag group inside `LISR`/`HISR`.
    pub const FLAG_SHIFT: [u32; 4] = [0, 6, 16, 22];

    pub const DMAMUX1_BASE: u32 = 0x4002_0800;
    pub const DMAMUX_CCR_STRIDE: u32 = 4;
    pub const DMAMUX_DMAREQ_ID: Field = Field::new(0, 8);

    /// `NDTR` is a 16-bit counter.
    pub const NDTR_MAX: u32 = 0xFFFF;
}

/// Streams per controller.
pub const STREAMS_PER_CONTROLLER: u8 = 8;

/// Iterations allowed for the stream-disable acknowledgement.
pub const SPIN_LIMIT: u32 = 10_000;

const IRQS: [[u16; 8]; 2] = [
    [11, 12, 13, 14, 15, 16, 17, 47],
    [56, 57, 58, 59, 60, 68, 69, 70],
];

/// Convert a buffer pointer to a 32-bit bus address.
#[allow(clippy::cast_possible_truncation)] // the DMA bus is 32 bits wide
pub fn address_of<T: ?Sized>(ptr: *const T) -> u32 {
    ptr.cast::<()>() as usize as u32
}

/// DMA controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Controller {
    /// DMA1.
    Dma1,
    /// DMA2.
    Dma2,
}

impl Controller {
    /// Both controllers, in order.
    pub const ALL: [Self; 2] = [Self::Dma1, Self::Dma2];

    /// Register block base.
    pub const fn base(self) -> u32 {
        match self {
            Self::Dma1 => regs::DMA1_BASE,
            Self::Dma2 => regs::DMA2_BASE,
        }
    }

    const fn slot(self) -> usize {
        match self {
            Self::Dma1 => 0,
            Self::Dma2 => 1,
        }
    }

    /// AHB1 enable/reset bit.
    pub const fn clock(self) -> Clock {
        match self {
            Self::Dma1 => Clock::new(rcc::regs::AHB1ENR, rcc::regs::AHB1RSTR, 0),
            Self::Dma2 => Clock::new(rcc::regs::AHB1ENR, rcc::regs::AHB1RSTR, 1),
        }
    }
}

impl TryFrom<u8> for Controller {
    type Error = Error;

    /// Controllers are numbered from 1, as in the reference manual.
    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Dma1),
            2 => Ok(Self::Dma2),
            _ => Err(Error::InvalidConfig("dma controller out of range")),
        }
    }
}

/// One physical stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamId {
    controller: Controller,
    index: u8,
}

impl StreamId {
    /// Validate a controller/stream pair.
    pub const fn new(controller: Controller, index: u8) -> Result<Self> {
        if index >= STREAMS_PER_CONTROLLER {
            return Err(Error::InvalidConfig("dma stream out of range"));
        }
        Ok(Self { controller, index })
    }

    /// Owning controller.
    pub const fn controller(self) -> Controller {
        self.controller
    }

    /// Stream index, 0..=7.
    pub const fn index(self) -> u8 {
        self.index
    }

    /// Address of a register inside this stream's block.
    pub const fn register(self, offset: u32) -> u32 {
        let block = regs::STREAM_STRIDE.wrapping_mul(self.index as u32);
        self.controller
            .base()
            .wrapping_add(regs::STREAM_BASE)
            .wrapping_add(block)
            .wrapping_add(offset)
    }

    /// Status and flag-clear register addresses for this stream.
    pub const fn status_registers(self) -> (u32, u32) {
        let base = self.controller.base();
        if self.index < 4 {
            (base.wrapping_add(regs::LISR), base.wrapping_add(regs::LIFCR))
        } else {
            (base.wrapping_add(regs::HISR), base.wrapping_add(regs::HIFCR))
        }
    }

    /// Bit position of this stream's flags inside its status register.
    #[allow(clippy::indexing_slicing)] // index % 4 is always in range
    pub const fn flag_shift(self) -> u32 {
        regs::FLAG_SHIFT[(self.index % 4) as usize]
    }

    /// DMAMUX1 channel wired to this stream.
    pub const fn mux_channel(self) -> u32 {
        (self.controller.slot() as u32)
            .wrapping_mul(STREAMS_PER_CONTROLLER as u32)
            .wrapping_add(self.index as u32)
    }

    /// NVIC line of this stream.
    #[allow(clippy::indexing_slicing)] // validated by StreamId::new
    pub const fn irq(self) -> u16 {
        IRQS[self.controller.slot()][self.index as usize]
    }

    /// Reverse of [`StreamId::irq`].
    pub fn from_irq(irq: u16) -> Option<Self> {
        Controller::ALL.into_iter().find_map(|controller| {
            IRQS.get(controller.slot())?
                .iter()
                .position(|&line| line == irq)
                .and_then(|i| u8::try_from(i).ok())
                .map(|index| Self { controller, index })
        })
    }
}

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Peripheral to memory.
    PeriphToMem,
    /// Memory to peripheral.
    MemToPeriph,
    /// Memory to memory.
    MemToMem,
}

impl Direction {
    const fn bits(self) -> u32 {
        match self {
            Self::PeriphToMem => 0,
            Self::MemToPeriph => 1,
            Self::MemToMem => 2,
        }
    }
}

impl TryFrom<u8> for Direction {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::PeriphToMem),
            1 => Ok(Self::MemToPeriph),
            2 => Ok(Self::MemToMem),
            _ => Err(Error::InvalidConfig("dma direction out of range")),
        }
    }
}

/// Data item width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Width {
    /// 8 bits.
    Byte,
    /// 16 bits.
    HalfWord,
    /// 32 bits.
    Word,
}

impl Width {
    /// Size of one item in bytes.
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::HalfWord => 2,
            Self::Word => 4,
        }
    }

    const fn bits(self) -> u32 {
        match self {
            Self::Byte => 0,
            Self::HalfWord => 1,
            Self::Word => 2,
        }
    }
}

impl TryFrom<u8> for Width {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Byte),
            1 => Ok(Self::HalfWord),
            2 => Ok(Self::Word),
            _ => Err(Error::InvalidConfig("dma data width out of range")),
        }
    }
}

/// Stream arbitration priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Priority {
    /// PL = 0.
    Low,
    /// PL = 1.
    Medium,
    /// PL = 2.
    High,
    /// PL = 3.
    VeryHigh,
}

impl TryFrom<u8> for Priority {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Low),
            1 => Ok(Self::Medium),
            2 => Ok(Self::High),
            3 => Ok(Self::VeryHigh),
            _ => Err(Error::InvalidConfig("dma priority out of range")),
        }
    }
}

/// FIFO threshold level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FifoThreshold {
    /// 1/4 full.
    Quarter,
    /// 1/2 full.
    Half,
    /// 3/4 full.
    ThreeQuarters,
    /// Full.
    Full,
}

impl TryFrom<u8> for FifoThreshold {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Quarter),
            1 => Ok(Self::Half),
            2 => Ok(Self::ThreeQuarters),
            3 => Ok(Self::Full),
            _ => Err(Error::InvalidConfig("dma fifo threshold out of range")),
        }
    }
}

/// Opaque value handed back to a stream's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context(*const ());

// SAFETY: the engine never dereferences a context; it only stores it and
// passes it back. Whoever builds one from a reference is responsible for the
// referent being usable from interrupt context.
unsafe impl Send for Context {}
// SAFETY: see above.
unsafe impl Sync for Context {}

impl Context {
    /// Context carrying nothing.
    pub const NONE: Self = Self(core::ptr::null());

    /// Wrap a raw pointer.
    pub const fn from_ptr(ptr: *const ()) -> Self {
        Self(ptr)
    }

    /// Wrap a reference that outlives every transfer using it.
    pub fn from_ref<T>(value: &'static T) -> Self {
        Self((value as *const T).cast())
    }

    /// The wrapped pointer.
    pub const fn as_ptr(self) -> *const () {
        self.0
    }

    /// Recover a reference stored with [`Context::from_ref`].
    ///
    /// # Safety
    ///
    /// The context must have been created from a `&'static T` of exactly this
    /// `T`.
    pub unsafe fn as_ref<T>(self) -> &'static T {
        // SAFETY: upheld by the caller.
        unsafe { &*self.0.cast::<T>() }
    }
}

/// Completion callback: `(success, context)`.
pub type Callback = fn(bool, Context);

/// Full stream configuration.
#[derive(Debug, Clone, Copy)]
pub struct DmaConfig {
    /// Stream to program.
    pub stream: StreamId,
    /// DMAMUX1 request line (peripheral request source).
    pub request: u8,
    /// Transfer direction.
    pub direction: Direction,
    /// Source item width.
    pub src_width: Width,
    /// Destination item width.
    pub dst_width: Width,
    /// Increment the source address after each item.
    pub src_increment: bool,
    /// Increment the destination address after each item.
    pub dst_increment: bool,
    /// Arbitration priority.
    pub priority: Priority,
    /// FIFO threshold, or `None` for direct mode.
    pub fifo: Option<FifoThreshold>,
    /// Completion callback.
    pub callback: Callback,
}

impl DmaConfig {
    /// Largest DMAMUX1 request identifier.
    pub const MAX_REQUEST: u8 = 127;

    fn validate(&self) -> Result<()> {
        if self.request == 0 || self.request > Self::MAX_REQUEST {
            return Err(Error::InvalidConfig("dma request id out of range"));
        }
        if self.direction == Direction::MemToMem {
            return Err(Error::InvalidConfig("memory-to-memory streams are not supported"));
        }
        if self.fifo.is_none() && self.src_width != self.dst_width {
            return Err(Error::InvalidConfig("direct mode requires equal widths"));
        }
        Ok(())
    }

    /// `(memory width, peripheral width, memory increment, peripheral increment)`.
    fn sides(&self) -> (Width, Width, bool, bool) {
        match self.direction {
            Direction::MemToPeriph => (
                self.src_width,
                self.dst_width,
                self.src_increment,
                self.dst_increment,
            ),
            Direction::PeriphToMem | Direction::MemToMem => (
                self.dst_width,
                self.src_width,
                self.dst_increment,
                self.src_increment,
            ),
        }
    }
}

/// Lifecycle of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamState {
    /// Not configured; may be claimed by a driver.
    Unconfigured,
    /// Configured, no transfer in flight.
    Idle,
    /// Transfer in flight.
    Running,
}

#[derive(Clone, Copy)]
struct Slot {
    state: StreamState,
    direction: Direction,
    src_width: Width,
    callback: Option<Callback>,
    context: Context,
}

impl Slot {
    const EMPTY: Self = Self {
        state: StreamState::Unconfigured,
        direction: Direction::PeriphToMem,
        src_width: Width::Byte,
        callback: None,
        context: Context::NONE,
    };
}

type Slots = [[Slot; STREAMS_PER_CONTROLLER as usize]; 2];

/// The DMA engine.
pub struct DmaEngine<B> {
    bus: B,
    slots: Mutex<RefCell<Slots>>,
}

impl<B: Mmio> DmaEngine<B> {
    /// Engine over `bus`, every stream unconfigured.
    pub const fn new(bus: B) -> Self {
        Self {
            bus,
            slots: Mutex::new(RefCell::new(
                [[Slot::EMPTY; STREAMS_PER_CONTROLLER as usize]; 2],
            )),
        }
    }

    /// Register bus shared with the peripheral drivers built on this engine.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    fn with_slot<R>(&self, stream: StreamId, f: impl FnOnce(&mut Slot) -> R) -> R {
        critical_section::with(|cs| {
            let mut slots = self.slots.borrow_ref_mut(cs);
            // StreamId guarantees both indices are in range.
            #[allow(clippy::indexing_slicing)]
            f(&mut slots[stream.controller.slot()][usize::from(stream.index)])
        })
    }

    /// Clock, reset and quiesce both controllers.
    ///
    /// DMAMUX1 shares the DMA1 clock. Every stream returns to
    /// [`StreamState::Unconfigured`].
    pub fn init(&self) {
        for controller in Controller::ALL {
            controller.clock().enable_and_reset(&self.bus);
        }
        // DMAMUX2/BDMA kernel clock stays on in D3 autonomous mode.
        self.bus
            .set_bits(rcc::RCC_BASE.wrapping_add(rcc::regs::D3AMR), 1);

        let all_flags = regs::FLAG_SHIFT
            .iter()
            .fold(0u32, |acc, shift| acc | regs::FLAGS_ALL.wrapping_shl(*shift));
        for controller in Controller::ALL {
            let base = controller.base();
            self.bus.write(base.wrapping_add(regs::LIFCR), all_flags);
            self.bus.write(base.wrapping_add(regs::HIFCR), all_flags);
        }

        critical_section::with(|cs| {
            *self.slots.borrow_ref_mut(cs) = [[Slot::EMPTY; STREAMS_PER_CONTROLLER as usize]; 2];
        });
        info!("dma: controllers initialised");
    }

    /// Current state of `stream`.
    pub fn state(&self, stream: StreamId) -> StreamState {
        self.with_slot(stream, |slot| slot.state)
    }

    /// First unconfigured stream on `controller`, if any.
    pub fn free_stream(&self, controller: Controller) -> Option<StreamId> {
        (0..STREAMS_PER_CONTROLLER)
            .filter_map(|index| StreamId::new(controller, index).ok())
            .find(|&stream| self.state(stream) == StreamState::Unconfigured)
    }

    fn disable(&self, stream: StreamId) -> Result<()> {
        let cr = stream.register(regs::CR);
        self.bus.clear_bits(cr, regs::CR_EN);
        for _ in 0..SPIN_LIMIT {
            if self.bus.read(cr) & regs::CR_EN == 0 {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        warn!("dma: stream {} did not acknowledge disable", stream.index);
        Err(Error::Timeout)
    }

    /// Program a stream and route its request line.
    ///
    /// The stream must be unconfigured.
    pub fn configure_stream(&self, config: &DmaConfig) -> Result<()> {
        config.validate()?;
        let stream = config.stream;
        if self.state(stream) != StreamState::Unconfigured {
            return Err(Error::InvalidConfig("dma stream already configured"));
        }

        self.disable(stream)?;

        let cr = stream.register(regs::CR);
        self.bus.write(cr, 0);

        let (mem_width, periph_width, mem_inc, periph_inc) = config.sides();
        let mut value = regs::CR_TCIE | regs::CR_TEIE;
        if mem_inc {
            value |= regs::CR_MINC;
        }
        if periph_inc {
            value |= regs::CR_PINC;
        }
        value |= regs::CR_MSIZE.encode(mem_width.bits());
        value |= regs::CR_PSIZE.encode(periph_width.bits());
        value |= regs::CR_PL.encode(config.priority as u32);
        value |= regs::CR_DIR.encode(config.direction.bits());
        self.bus.write(cr, value);

        let fcr = match config.fifo {
            Some(threshold) => regs::FCR_DMDIS | regs::FCR_FTH.encode(threshold as u32),
            None => 0,
        };
        self.bus.write(stream.register(regs::FCR), fcr);

        let mux = regs::DMAMUX1_BASE
            .wrapping_add(regs::DMAMUX_CCR_STRIDE.wrapping_mul(stream.mux_channel()));
        self.bus
            .write_field(mux, regs::DMAMUX_DMAREQ_ID, u32::from(config.request));

        nvic::enable(&self.bus, stream.irq())?;

        self.with_slot(stream, |slot| {
            *slot = Slot {
                state: StreamState::Idle,
                direction: config.direction,
                src_width: config.src_width,
                callback: Some(config.callback),
                context: Context::NONE,
            };
        });
        debug!(
            "dma: stream {}:{} configured for request {}",
            stream.controller.slot(),
            stream.index,
            config.request
        );
        Ok(())
    }

    /// Return an idle stream to the unconfigured pool.
    pub fn release_stream(&self, stream: StreamId) -> Result<()> {
        let released = self.with_slot(stream, |slot| match slot.state {
            StreamState::Running => Err(Error::Busy),
            StreamState::Unconfigured => Ok(false),
            StreamState::Idle => {
                *slot = Slot::EMPTY;
                Ok(true)
            }
        })?;
        if released {
            nvic::disable(&self.bus, stream.irq())?;
            let mux = regs::DMAMUX1_BASE
                .wrapping_add(regs::DMAMUX_CCR_STRIDE.wrapping_mul(stream.mux_channel()));
            self.bus.write(mux, 0);
        }
        Ok(())
    }

    /// Start a transfer of `size` bytes from `src` to `dst`.
    ///
    /// Nothing is written to hardware unless every check passes.
    pub fn start_transfer(
        &self,
        stream: StreamId,
        src: u32,
        dst: u32,
        size: u32,
        context: Context,
    ) -> Result<()> {
        if src == 0 || dst == 0 {
            return Err(Error::InvalidConfig("null transfer address"));
        }
        let (direction, width) = self.with_slot(stream, |slot| match slot.state {
            StreamState::Unconfigured => Err(Error::InvalidConfig("dma stream not configured")),
            StreamState::Running => Err(Error::Busy),
            StreamState::Idle => Ok((slot.direction, slot.src_width)),
        })?;

        let bytes = width.bytes();
        if size % bytes != 0 {
            return Err(Error::InvalidConfig("size not multiple of source width"));
        }
        let items = size / bytes;
        if items == 0 {
            return Err(Error::InvalidConfig("zero-length transfer"));
        }
        if items > regs::NDTR_MAX {
            return Err(Error::InvalidConfig("transfer exceeds 65535 items"));
        }

        // Claim the stream; a concurrent start on the same stream loses here.
        self.with_slot(stream, |slot| {
            if slot.state == StreamState::Idle {
                slot.state = StreamState::Running;
                slot.context = context;
                Ok(())
            } else {
                Err(Error::Busy)
            }
        })?;

        let (_, ifcr) = stream.status_registers();
        self.bus
            .write(ifcr, regs::FLAGS_ALL.wrapping_shl(stream.flag_shift()));

        if let Err(error) = self.disable(stream) {
            self.with_slot(stream, |slot| slot.state = StreamState::Idle);
            return Err(error);
        }

        self.bus.write(stream.register(regs::NDTR), items);
        let (par, m0ar) = match direction {
            Direction::MemToPeriph => (dst, src),
            Direction::PeriphToMem | Direction::MemToMem => (src, dst),
        };
        self.bus.write(stream.register(regs::PAR), par);
        self.bus.write(stream.register(regs::M0AR), m0ar);
        self.bus.set_bits(stream.register(regs::CR), regs::CR_EN);
        trace!("dma: stream {} started, {} items", stream.index, items);
        Ok(())
    }

    /// Stop a running transfer without running its callback.
    ///
    /// The stream returns to [`StreamState::Idle`] even when the disable is
    /// not acknowledged; the error is still reported.
    pub fn abort_transfer(&self, stream: StreamId) -> Result<()> {
        let was_running = self.with_slot(stream, |slot| {
            let running = slot.state == StreamState::Running;
            if running {
                slot.state = StreamState::Idle;
                slot.context = Context::NONE;
            }
            running
        });
        if !was_running {
            return Ok(());
        }
        let disabled = self.disable(stream);
        let (_, ifcr) = stream.status_registers();
        self.bus
            .write(ifcr, regs::FLAGS_ALL.wrapping_shl(stream.flag_shift()));
        self.bus.write(stream.register(regs::M0AR), 0);
        self.bus.write(stream.register(regs::PAR), 0);
        self.bus.write(stream.register(regs::NDTR), 0);
        debug!("dma: stream {} aborted", stream.index);
        disabled
    }

    /// Stream interrupt body.
    ///
    /// Reads and clears the stream's flags, returns the stream to
    /// [`StreamState::Idle`] and then runs its callback with
    /// `(success, context)`. The stream is idle before the callback runs, so
    /// the callback may start the next transfer.
    pub fn on_interrupt(&self, stream: StreamId) {
        let (isr, ifcr) = stream.status_registers();
        let shift = stream.flag_shift();
        let flags = self.bus.read(isr).wrapping_shr(shift) & regs::FLAGS_ALL;
        self.bus.write(ifcr, flags.wrapping_shl(shift));

        let failed = flags & (regs::FLAG_TE | regs::FLAG_DME) != 0;
        let complete = flags & regs::FLAG_TC != 0;
        if !failed && !complete {
            return;
        }

        let finished = self.with_slot(stream, |slot| {
            if slot.state == StreamState::Running {
                slot.state = StreamState::Idle;
                Some((slot.callback, slot.context))
            } else {
                None
            }
        });
        let Some((callback, context)) = finished else {
            return;
        };

        self.bus.write(stream.register(regs::M0AR), 0);
        self.bus.write(stream.register(regs::PAR), 0);
        self.bus.write(stream.register(regs::NDTR), 0);

        if failed {
            error!("dma: transfer error on stream {}", stream.index);
        }
        if let Some(callback) = callback {
            callback(!failed, context);
        }
    }

    /// Dispatch an NVIC line to its stream.
    pub fn on_irq(&self, irq: u16) {
        if let Some(stream) = StreamId::from_irq(irq) {
            self.on_interrupt(stream);
        }
    }
}

/// Helper for tests and simulations: raise a stream's flags on the bus.
#[cfg(any(test, feature = "simulator"))]
pub fn raise_flags(bus: &crate::sim::SimBus, stream: StreamId, flags: u32) {
    let (isr, _) = stream.status_registers();
    bus.raise(isr, flags.wrapping_shl(stream.flag_shift()));
}
