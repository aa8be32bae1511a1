//! DMA engine and SPI integration tests
//!
//! End-to-end transfers on the simulated bus: stream setup, item counts,
//! completion callbacks and the SPI chip-select sequence the temperature
//! sensor depends on.
//!
//! Run with: cargo test -p flight-computer --test dma_scenarios

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use flight_computer::config;
use platform::dma::regs::{FLAG_TC, M0AR, NDTR, PAR};
use platform::dma::{
    self, Context, Controller, Direction, DmaConfig, DmaEngine, FifoThreshold, Priority,
    StreamState, Width,
};
use platform::sim::SimBus;
use platform::spi::{self, Spi};
use platform::{gpio, DmaBuffer, Error, PinId, StreamId};

fn engine() -> &'static DmaEngine<SimBus> {
    let dma = Box::leak(Box::new(DmaEngine::new(SimBus::new())));
    dma.init();
    dma
}

fn stream0() -> StreamId {
    StreamId::new(Controller::Dma1, 0).unwrap()
}

fn rx_config(src_width: Width, callback: dma::Callback) -> DmaConfig {
    DmaConfig {
        stream: stream0(),
        request: 42,
        direction: Direction::PeriphToMem,
        src_width,
        dst_width: src_width,
        src_increment: false,
        dst_increment: true,
        priority: Priority::High,
        fifo: Some(FifoThreshold::Full),
        callback,
    }
}

// ─── DMA ─────────────────────────────────────────────────────────────────────

static BYTE_CALLS: AtomicU32 = AtomicU32::new(0);
static BYTE_OK: AtomicBool = AtomicBool::new(false);
static BYTE_CONTEXT: AtomicUsize = AtomicUsize::new(0);

fn on_byte_transfer(ok: bool, context: Context) {
    BYTE_CALLS.fetch_add(1, Ordering::SeqCst);
    BYTE_OK.store(ok, Ordering::SeqCst);
    BYTE_CONTEXT.store(context.as_ptr() as usize, Ordering::SeqCst);
}

/// Peripheral-to-memory byte transfer of 64 bytes completes once.
#[test]
fn test_p2m_byte_transfer() {
    let dma = engine();
    let stream = stream0();
    dma.configure_stream(&rx_config(Width::Byte, on_byte_transfer)).unwrap();
    assert_eq!(dma.state(stream), StreamState::Idle);

    static TAG: u32 = 7;
    let context = Context::from_ref(&TAG);
    dma.start_transfer(stream, 0x4000_A000, 0x2000_2000, 64, context).unwrap();
    assert_eq!(dma.state(stream), StreamState::Running);
    assert_eq!(dma.bus().peek(stream.register(NDTR)), 64);
    assert_eq!(dma.bus().peek(stream.register(PAR)), 0x4000_A000);
    assert_eq!(dma.bus().peek(stream.register(M0AR)), 0x2000_2000);
    assert_eq!(
        dma.start_transfer(stream, 0x4000_A000, 0x2000_2000, 64, context),
        Err(Error::Busy)
    );

    dma::raise_flags(dma.bus(), stream, FLAG_TC);
    dma.on_irq(stream.irq());
    assert_eq!(BYTE_CALLS.load(Ordering::SeqCst), 1);
    assert!(BYTE_OK.load(Ordering::SeqCst));
    assert_eq!(BYTE_CONTEXT.load(Ordering::SeqCst), context.as_ptr() as usize);
    assert_eq!(dma.state(stream), StreamState::Idle);

    // A stale interrupt after completion does not call back again.
    dma.on_irq(stream.irq());
    assert_eq!(BYTE_CALLS.load(Ordering::SeqCst), 1);
}

fn never_called(_: bool, _: Context) {
    unreachable!("rejected transfers have no completion");
}

/// A size that is not a whole number of source items fails up front.
#[test]
fn test_misaligned_transfer_is_rejected() {
    let dma = engine();
    let stream = stream0();
    dma.configure_stream(&rx_config(Width::Word, never_called)).unwrap();
    let writes = dma.bus().writes().len();

    let result = dma.start_transfer(stream, 0x4000_A000, 0x2000_2000, 7, Context::NONE);
    assert_eq!(
        result,
        Err(Error::InvalidConfig("size not multiple of source width"))
    );
    assert_eq!(dma.bus().writes().len(), writes, "hardware untouched");
    assert_eq!(dma.state(stream), StreamState::Idle);
}

// ─── SPI ─────────────────────────────────────────────────────────────────────

static SPI_DONE: AtomicU32 = AtomicU32::new(0);

fn on_spi_done(ok: bool) {
    if ok {
        SPI_DONE.fetch_add(1, Ordering::SeqCst);
    }
}

/// Asynchronous write: chip select low, TX stream pointed at TXDR, and on
/// completion chip select high, instance free, callback run.
#[test]
fn test_spi_async_write() {
    let dma = engine();
    let spi = Box::leak(Box::new(Spi::new(dma, config::TEMP_SENSOR_SPI)));
    spi.init(
        config::temp_sensor_spi(),
        config::temp_sensor_tx_dma().unwrap(),
        config::temp_sensor_rx_dma().unwrap(),
        Some(on_spi_done),
    )
    .unwrap();
    let cs = PinId::from_package(config::TEMP_SENSOR_CS_PIN).unwrap();
    let device = spi.device_init(cs).unwrap();
    assert!(gpio::output_level(dma.bus(), cs));

    let buf: &'static DmaBuffer<16> = Box::leak(Box::new(DmaBuffer::new()));
    buf.with(|data| data.fill(0xA5)).unwrap();
    let region = buf.region(16).unwrap();
    let src = region.address();
    spi.write_async(&device, region).unwrap();

    let tx = config::temp_sensor_tx_dma().unwrap().stream;
    assert!(!gpio::output_level(dma.bus(), cs));
    assert!(spi.is_busy());
    assert_eq!(dma.bus().peek(tx.register(NDTR)), 16);
    assert_eq!(dma.bus().peek(tx.register(M0AR)), src);
    assert_eq!(
        dma.bus().peek(tx.register(PAR)),
        spi::regs::SPI1_BASE + spi::regs::TXDR
    );
    assert_eq!(buf.with(|_| ()), Err(Error::Busy));

    dma::raise_flags(dma.bus(), tx, FLAG_TC);
    dma.on_irq(tx.irq());
    assert!(gpio::output_level(dma.bus(), cs));
    assert!(!spi.is_busy());
    assert_eq!(SPI_DONE.load(Ordering::SeqCst), 1);
    assert!(buf.with(|_| ()).is_ok());
}
