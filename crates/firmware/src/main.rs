//! Titan flight computer, core A (Cortex-M7) image.
//!
//! Owns every peripheral: brings up the inter-core mailbox, the DMA engine,
//! error reporting, the launch sequencer and the system manager, then runs
//! the sensor loop with the watchdog fed once per pass.

#![no_std]
#![no_main]

use defmt_rtt as _;
use panic_probe as _;

use flight_computer::app::{BoardErrors, LaunchSequence, Phase, Readiness, Resources, SystemManager};
use flight_computer::config::{
    self, ARM_INDICATOR_PIN, TELEMETRY_FRAME_MAX, TELEMETRY_USART, TEMP_SENSOR_FRAME,
    TEMP_SENSOR_SPI,
};
use platform::rpc::CoreId;
use platform::rtc::Rtc;
use platform::watchdog::Watchdog;
use platform::{DmaBuffer, DmaEngine, Error, Output, PinId, Spi, Usart, VolatileMmio};
use static_cell::StaticCell;

flight_computer::core_entry!(Cm7, main);

// SAFETY: every address the drivers pass to the bus is a register of the
// STM32H745 or a DMA buffer they own.
static DMA: DmaEngine<VolatileMmio> = DmaEngine::new(unsafe { VolatileMmio::new() });
static SPI: Spi<'static, VolatileMmio> = Spi::new(&DMA, TEMP_SENSOR_SPI);
static USART: Usart<'static, VolatileMmio> = Usart::new(&DMA, TELEMETRY_USART);

static SENSOR_TX: DmaBuffer<TEMP_SENSOR_FRAME> = DmaBuffer::new();
static SENSOR_RX: DmaBuffer<TEMP_SENSOR_FRAME> = DmaBuffer::new();
static FRAME: DmaBuffer<TELEMETRY_FRAME_MAX> = DmaBuffer::new();

static ERRORS: BoardErrors = BoardErrors::new();
static SENSOR_READY: Readiness = Readiness::new();
static MANAGER: StaticCell<SystemManager<VolatileMmio>> = StaticCell::new();

fn sensor_done(ok: bool) {
    SENSOR_READY.signal(ok);
}

fn telemetry_done(ok: bool) {
    if !ok {
        ERRORS.log_critical(&Error::Transfer);
    }
}

macro_rules! dma_handlers {
    ($($name:ident => $irq:literal),* $(,)?) => {
        $(
            #[no_mangle]
            #[allow(non_snake_case)]
            extern "C" fn $name() {
                DMA.on_irq($irq);
            }
        )*
    };
}

dma_handlers! {
    DMA1_STR0 => 11, DMA1_STR1 => 12, DMA1_STR2 => 13, DMA1_STR3 => 14,
    DMA1_STR4 => 15, DMA1_STR5 => 16, DMA1_STR6 => 17, DMA1_STR7 => 47,
    DMA2_STR0 => 56, DMA2_STR1 => 57, DMA2_STR2 => 58, DMA2_STR3 => 59,
    DMA2_STR4 => 60, DMA2_STR5 => 68, DMA2_STR6 => 69, DMA2_STR7 => 70,
}

// Temperature sensor bus: end of transfer.
#[no_mangle]
#[allow(non_snake_case)]
extern "C" fn SPI1() {
    SPI.on_interrupt();
}

fn main() -> i32 {
    defmt::info!("Titan flight computer v{=str}", env!("CARGO_PKG_VERSION"));
    // SAFETY: as for `DMA`.
    let bus = unsafe { VolatileMmio::new() };

    if let Err(error) = flight_computer::ipc::init(&bus, CoreId::Cm7) {
        defmt::error!("rpc init failed: {}", error);
    }
    DMA.init();
    ERRORS.init();
    ERRORS.log_successful("dma and error handler up");

    let rtc = Rtc::new(bus);
    if let Err(error) = rtc.init() {
        ERRORS.log_critical(&error);
    }

    let mut launch = match PinId::from_package(ARM_INDICATOR_PIN) {
        Ok(pin) => Some(LaunchSequence::new(Output::new(bus, pin, false))),
        Err(error) => {
            ERRORS.log_critical(&error);
            None
        }
    };
    if let Some(Err(error)) = launch.as_mut().map(LaunchSequence::start) {
        ERRORS.log_critical(&error);
    }

    let manager = MANAGER.init_with(|| {
        SystemManager::init(
            Resources {
                spi: &SPI,
                usart: &USART,
                sensor_tx: &SENSOR_TX,
                sensor_rx: &SENSOR_RX,
                frame: &FRAME,
                sensor_done,
                telemetry_done: Some(telemetry_done),
            },
            &SENSOR_READY,
            &ERRORS,
        )
    });
    ERRORS.log_successful("system manager up");

    let watchdog = Watchdog::new(bus);
    if let Err(error) = watchdog.start(config::WATCHDOG) {
        ERRORS.log_critical(&error);
    }

    // SAFETY: all shared state is initialised.
    unsafe { cortex_m::interrupt::enable() };

    manager.run(|reading| {
        watchdog.feed();
        let (Some(sequence), Some(reading)) = (launch.as_mut(), reading) else {
            return;
        };
        match sequence.update(reading) {
            Ok(Phase::Landed) => defmt::info!("landed at {}", rtc.read()),
            Ok(_) => {}
            Err(error) => ERRORS.log_critical(&error),
        }
    })
}
