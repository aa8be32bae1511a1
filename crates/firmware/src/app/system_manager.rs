//! Wiring between the sensor, the collector and the two sinks.
//!
//! Driver completions are plain `fn(bool)` callbacks that run in interrupt
//! context, so they only flip a [`Readiness`] static. [`SystemManager::run_once`]
//! picks the result up in thread context, feeds the collector and, once a
//! batch has built up, hands it to the flash logger and the radio.

use core::sync::atomic::{AtomicBool, Ordering};

use platform::buffer::DmaBuffer;
use platform::peripheral::Completion;
use platform::spi::Spi;
use platform::usart::Usart;
use platform::{Error, ErrorFlag, Mmio, Result};

use super::data_collector::{DataCollector, SensorSlot};
use super::data_logger::DataLogger;
use super::error_handler::ErrorHandler;
use super::telemetry::Telemetry;
use crate::config::{
    COLLECTION_CAPACITY, ERROR_RECORDS, FLUSH_READINGS, LOG_CAPACITY, TELEMETRY_FRAME_MAX,
    TEMP_SENSOR_FRAME,
};
use crate::sensors::TempSensor;

/// Error handler sized for the board.
pub type BoardErrors = ErrorHandler<ERROR_RECORDS>;

/// One-shot completion signal set from interrupt context.
pub struct Readiness {
    pending: AtomicBool,
    ok: AtomicBool,
}

impl Readiness {
    /// Nothing pending.
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            ok: AtomicBool::new(false),
        }
    }

    /// Record a completion.
    pub fn signal(&self, ok: bool) {
        self.ok.store(ok, Ordering::Relaxed);
        self.pending.store(true, Ordering::Release);
    }

    /// Consume the pending completion, if any.
    pub fn take(&self) -> Option<bool> {
        self.pending
            .swap(false, Ordering::Acquire)
            .then(|| self.ok.load(Ordering::Relaxed))
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

/// Static peripherals and buffers the manager is built from.
pub struct Resources<B: Mmio + 'static> {
    /// Sensor bus.
    pub spi: &'static Spi<'static, B>,
    /// Radio link.
    pub usart: &'static Usart<'static, B>,
    /// Sensor command buffer.
    pub sensor_tx: &'static DmaBuffer<TEMP_SENSOR_FRAME>,
    /// Sensor response buffer.
    pub sensor_rx: &'static DmaBuffer<TEMP_SENSOR_FRAME>,
    /// Telemetry frame buffer.
    pub frame: &'static DmaBuffer<TELEMETRY_FRAME_MAX>,
    /// Must signal the [`Readiness`] handed to [`SystemManager::init`].
    pub sensor_done: Completion,
    /// Radio frame completion.
    pub telemetry_done: Option<Completion>,
}

/// Application state of core A.
pub struct SystemManager<B: Mmio + 'static> {
    sensor: Option<(TempSensor<B>, SensorSlot)>,
    collector: DataCollector<COLLECTION_CAPACITY>,
    logger: DataLogger<LOG_CAPACITY>,
    telemetry: Option<Telemetry<B>>,
    errors: &'static BoardErrors,
    ready: &'static Readiness,
    latest: Option<i32>,
}

impl<B: Mmio + 'static> SystemManager<B> {
    /// Bring up the collector, sinks and sensor. Failures are non-critical:
    /// they are reported together and the manager runs with what came up.
    pub fn init(
        resources: Resources<B>,
        ready: &'static Readiness,
        errors: &'static BoardErrors,
    ) -> Self {
        let mut flag = ErrorFlag::new();
        let mut collector = DataCollector::new();

        let telemetry = flag.check(Telemetry::init(
            resources.usart,
            resources.frame,
            resources.telemetry_done,
        ));
        let sensor = flag
            .check(collector.register())
            .and_then(|slot| {
                let sensor = TempSensor::init(
                    resources.spi,
                    resources.sensor_tx,
                    resources.sensor_rx,
                    Some(resources.sensor_done),
                );
                flag.check(sensor).map(|sensor| (sensor, slot))
            })
            .and_then(|(sensor, slot)| {
                flag.check(sensor.read_temperature())?;
                Some((sensor, slot))
            });

        if flag.is_raised() {
            errors.log_non_critical(&flag);
        }
        #[cfg(feature = "defmt")]
        defmt::info!(
            "system: sensor {}, telemetry {}",
            sensor.is_some(),
            telemetry.is_some()
        );

        Self {
            sensor,
            collector,
            logger: DataLogger::new(),
            telemetry,
            errors,
            ready,
            latest: None,
        }
    }

    /// `true` when the sensor came up.
    pub fn has_sensor(&self) -> bool {
        self.sensor.is_some()
    }

    /// `true` when the radio came up.
    pub fn has_telemetry(&self) -> bool {
        self.telemetry.is_some()
    }

    /// Last successful reading, in centi-degrees.
    pub fn latest_reading(&self) -> Option<i32> {
        self.latest
    }

    /// Flash staging log.
    pub fn logger(&self) -> &DataLogger<LOG_CAPACITY> {
        &self.logger
    }

    /// Readings waiting for the next batch.
    pub fn pending(&self) -> &[i32] {
        self.collector.readings()
    }

    /// Service one completed read, if there is one, and start the next.
    /// Returns the reading the pass produced.
    pub fn run_once(&mut self) -> Option<i32> {
        let ok = self.ready.take()?;
        let (sensor, slot) = self.sensor.as_ref()?;
        let slot = *slot;
        let reading = if ok { sensor.latest() } else { Err(Error::Transfer) };
        let value = reading.ok();
        if value.is_some() {
            self.latest = value;
        }

        match self.collector.report(slot, reading) {
            Some(Ok(size)) if size >= FLUSH_READINGS => self.flush(),
            Some(Ok(_)) | None => {}
            Some(Err(Error::Busy)) => {
                self.errors.log_critical(&Error::Busy);
                self.flush();
            }
            Some(Err(error)) => {
                let mut flag = ErrorFlag::new();
                flag.raise(error);
                self.errors.log_non_critical(&flag);
            }
        }

        if let Some((sensor, _)) = &self.sensor {
            if let Err(error) = sensor.read_temperature() {
                self.errors.log_critical(&error);
            }
        }
        value
    }

    fn flush(&mut self) {
        let readings = self.collector.readings();
        if let Err(error) = self.logger.start(readings) {
            self.errors.log_critical(&error);
        }
        if let Some(telemetry) = &self.telemetry {
            if let Err(error) = telemetry.start(readings) {
                let mut flag = ErrorFlag::new();
                flag.raise(error);
                self.errors.log_non_critical(&flag);
            }
        }
        self.collector.clear();
    }

    /// Service reads forever, handing each reading to `on_reading`.
    pub fn run(&mut self, mut on_reading: impl FnMut(Option<i32>)) -> ! {
        loop {
            let reading = self.run_once();
            on_reading(reading);
        }
    }
}
