//! Board wiring and compile-time tuning.
//!
//! Everything here is pure data so the host tests and both core images agree
//! on one set of numbers.

use platform::dma::{Controller, FifoThreshold, Priority, StreamId};
use platform::peripheral::{BitOrder, DataBits, Parity, PeriphDmaConfig, SpiMode, StopBits};
use platform::rtc::{PREDIV_A, PREDIV_S};
use platform::spi::{BaudPrescaler, DataSize, SpiConfig, SpiInstance};
use platform::usart::{UsartConfig, UsartInstance};
use platform::watchdog::{Prescaler, WatchdogConfig};
use platform::{PinId, Result};

// ── Temperature sensor ─────────────────────────────────────────────────────

/// SPI block wired to the temperature sensor.
pub const TEMP_SENSOR_SPI: SpiInstance = SpiInstance::Spi1;

/// Package pin of the sensor's chip select (PE6).
pub const TEMP_SENSOR_CS_PIN: u8 = 5;

/// Bytes per sensor exchange: one command byte, two data bytes.
pub const TEMP_SENSOR_FRAME: usize = 3;

/// Poll budget of the blocking SPI variants.
pub const SPI_BLOCKING_RETRIES: u32 = 100_000;

/// Sensor bus settings: mode 0, 8-bit frames, MSB first, 64 MHz / 16.
pub const fn temp_sensor_spi() -> SpiConfig {
    SpiConfig {
        mode: SpiMode::Mode0,
        data_size: DataSize::Eight,
        prescaler: BaudPrescaler::Div16,
        bit_order: BitOrder::MsbFirst,
        blocking_retries: SPI_BLOCKING_RETRIES,
    }
}

/// Sensor chip select.
pub fn temp_sensor_cs() -> Result<PinId> {
    PinId::from_package(TEMP_SENSOR_CS_PIN)
}

/// DMA1 stream 0 transmits to the sensor.
pub fn temp_sensor_tx_dma() -> Result<PeriphDmaConfig> {
    let stream = StreamId::new(Controller::Dma1, 0)?;
    Ok(PeriphDmaConfig::tx(stream, Priority::High))
}

/// DMA1 stream 1 receives from the sensor.
pub fn temp_sensor_rx_dma() -> Result<PeriphDmaConfig> {
    let stream = StreamId::new(Controller::Dma1, 1)?;
    Ok(PeriphDmaConfig {
        fifo: Some(FifoThreshold::Full),
        ..PeriphDmaConfig::rx(stream, Priority::High)
    })
}

// ── Telemetry radio ────────────────────────────────────────────────────────

/// USART wired to the radio modem.
pub const TELEMETRY_USART: UsartInstance = UsartInstance::Usart1;

/// Radio link rate.
pub const TELEMETRY_BAUD: u32 = 115_200;

/// Largest telemetry frame: sync, length, 255 payload bytes, checksum.
pub const TELEMETRY_FRAME_MAX: usize = 258;

/// Radio link settings, 8N1.
pub const fn telemetry_usart() -> UsartConfig {
    UsartConfig {
        baud: TELEMETRY_BAUD,
        data_bits: DataBits::Eight,
        parity: Parity::None,
        stop_bits: StopBits::One,
        pins: None,
        blocking_retries: SPI_BLOCKING_RETRIES,
    }
}

/// DMA1 stream 2 transmits to the radio.
pub fn telemetry_tx_dma() -> Result<PeriphDmaConfig> {
    Ok(PeriphDmaConfig::tx(StreamId::new(Controller::Dma1, 2)?, Priority::Medium))
}

/// DMA1 stream 3 receives from the radio.
pub fn telemetry_rx_dma() -> Result<PeriphDmaConfig> {
    Ok(PeriphDmaConfig::rx(StreamId::new(Controller::Dma1, 3)?, Priority::Medium))
}

// ── Data path ──────────────────────────────────────────────────────────────

/// Readings the collector holds before they are handed to the sinks.
pub const COLLECTION_CAPACITY: usize = 32;

/// Readings per batch handed to the logger and telemetry.
pub const FLUSH_READINGS: usize = 8;

/// Bytes of the in-RAM flash staging log.
pub const LOG_CAPACITY: usize = 4096;

/// Records the error handler keeps for the sinks.
pub const ERROR_RECORDS: usize = 16;

// ── Housekeeping ───────────────────────────────────────────────────────────

/// IWDG: 32 kHz / 64 with reload 999, about 2 s.
pub const WATCHDOG: WatchdogConfig = WatchdogConfig {
    prescaler: Prescaler::Div64,
    reload: 999,
};

/// RTC asynchronous prescaler (register value).
pub const RTC_PREDIV_A: u32 = PREDIV_A;

/// RTC synchronous prescaler (register value).
pub const RTC_PREDIV_S: u32 = PREDIV_S;

/// Package pin of the arming indicator LED (PA0).
pub const ARM_INDICATOR_PIN: u8 = 37;

/// Launch is declared above this reading (centi-units).
pub const LAUNCH_THRESHOLD: i32 = 4_000;

/// Landing is declared once the reading falls back below this.
pub const LANDING_THRESHOLD: i32 = 3_000;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use platform::Port;

    #[test]
    fn sensor_streams_are_distinct() {
        let tx = temp_sensor_tx_dma().unwrap();
        let rx = temp_sensor_rx_dma().unwrap();
        assert_ne!(tx.stream, rx.stream);
        assert_eq!(rx.fifo, Some(FifoThreshold::Full));
        assert_ne!(telemetry_tx_dma().unwrap().stream, tx.stream);
    }

    #[test]
    fn pins_map_to_bonded_pads() {
        let cs = temp_sensor_cs().unwrap();
        assert_eq!((cs.port(), cs.index()), (Port::E, 6));
        let led = PinId::from_package(ARM_INDICATOR_PIN).unwrap();
        assert_eq!((led.port(), led.index()), (Port::A, 0));
    }

    #[test]
    fn watchdog_period_is_two_seconds() {
        assert_eq!(WATCHDOG.timeout_ms(), 2_000);
        assert!(telemetry_usart().brr().is_ok());
        assert!(LANDING_THRESHOLD < LAUNCH_THRESHOLD);
        assert!(FLUSH_READINGS <= COLLECTION_CAPACITY);
    }
}
