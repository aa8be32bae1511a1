//! Application pipeline integration tests
//!
//! Boots the core-A application on the simulated board: sensor reads flow
//! through the collector into the flash log and the radio, and the launch
//! sequence follows the readings.
//!
//! Run with: cargo test -p flight-computer --test app_pipeline

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use flight_computer::app::telemetry::{checksum, SYNC};
use flight_computer::app::{
    BoardErrors, LaunchSequence, Phase, Readiness, Resources, Severity, SystemManager,
};
use flight_computer::config::{self, FLUSH_READINGS, TELEMETRY_FRAME_MAX, TEMP_SENSOR_FRAME};
use platform::dma::regs::{FLAG_TC, M0AR, NDTR};
use platform::dma::{self, Controller};
use platform::sim::SimBus;
use platform::{DmaBuffer, DmaEngine, Output, PinId, Spi, StreamId, Usart};

struct Board {
    dma: &'static DmaEngine<SimBus>,
    sensor_rx: &'static DmaBuffer<TEMP_SENSOR_FRAME>,
    frame: &'static DmaBuffer<TELEMETRY_FRAME_MAX>,
}

fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

fn board() -> (Board, Resources<SimBus>) {
    let dma = leak(DmaEngine::new(SimBus::new()));
    dma.init();
    let sensor_rx = leak(DmaBuffer::new());
    let frame = leak(DmaBuffer::new());
    let resources = Resources {
        spi: leak(Spi::new(dma, config::TEMP_SENSOR_SPI)),
        usart: leak(Usart::new(dma, config::TELEMETRY_USART)),
        sensor_tx: leak(DmaBuffer::new()),
        sensor_rx,
        frame,
        sensor_done,
        telemetry_done: None,
    };
    (Board { dma, sensor_rx, frame }, resources)
}

static READY: Readiness = Readiness::new();
static ERRORS: BoardErrors = BoardErrors::new();

fn sensor_done(ok: bool) {
    READY.signal(ok);
}

fn finish(dma: &DmaEngine<SimBus>, index: u8) {
    let stream = StreamId::new(Controller::Dma1, index).unwrap();
    dma::raise_flags(dma.bus(), stream, FLAG_TC);
    dma.on_irq(stream.irq());
}

/// Complete the sensor exchange in flight with `centi` hundredths of a
/// degree on the wire.
fn answer(board: &Board, centi: i32) {
    finish(board.dma, 1);
    finish(board.dma, 0);
    let raw = ((centi * 16 / 100) << 3) as u16;
    board
        .sensor_rx
        .with(|frame| frame[1..].copy_from_slice(&raw.to_be_bytes()))
        .unwrap();
}

#[test]
fn test_flight_profile_reaches_logger_radio_and_sequencer() {
    ERRORS.init();
    let (board, resources) = board();
    let mut manager = SystemManager::init(resources, &READY, &ERRORS);
    assert!(manager.has_sensor() && manager.has_telemetry());
    ERRORS.log_successful("system manager up");

    let indicator_pin = PinId::from_package(config::ARM_INDICATOR_PIN).unwrap();
    let mut launch = LaunchSequence::new(Output::new(board.dma.bus(), indicator_pin, false));
    launch.start().unwrap();
    assert!(platform::gpio::output_level(board.dma.bus(), indicator_pin));

    let profile = [2_500, 4_500, 4_500, 4_500, 5_000, 2_000, 2_000, 2_000];
    assert_eq!(profile.len(), FLUSH_READINGS);
    let mut phases = Vec::new();
    for centi in profile {
        answer(&board, centi);
        let reading = manager.run_once().unwrap();
        assert_eq!(reading, centi);
        phases.push(launch.update(reading).unwrap());
    }
    assert_eq!(phases[3], Phase::Launched);
    assert_eq!(phases.last(), Some(&Phase::Landed));
    assert!(!platform::gpio::output_level(board.dma.bus(), indicator_pin));

    // One batch went to the flash log ...
    let logged: Vec<i32> = manager.logger().iter().collect();
    assert_eq!(logged, profile);

    // ... and one frame onto the radio stream.
    let tx = StreamId::new(Controller::Dma1, 2).unwrap();
    let frame_len = 3 + 4 * FLUSH_READINGS;
    assert_eq!(board.dma.bus().peek(tx.register(NDTR)) as usize, frame_len);
    assert_ne!(board.dma.bus().peek(tx.register(M0AR)), 0);
    finish(board.dma, 2);
    let bytes = board.frame.with(|buf| buf[..frame_len].to_vec()).unwrap();
    assert_eq!(bytes[0], SYNC);
    assert_eq!(usize::from(bytes[1]), 4 * FLUSH_READINGS);
    assert_eq!(bytes[2..6], 2_500i32.to_le_bytes());
    assert_eq!(bytes[frame_len - 1], checksum(bytes[1], &bytes[2..frame_len - 1]));

    let record = ERRORS.pop().unwrap();
    assert_eq!(record.severity, Severity::Success);
    assert!(ERRORS.is_empty());
}
