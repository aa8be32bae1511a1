//! SPI temperature sensor.
//!
//! The sensor answers a one-byte read command with a 16-bit big-endian
//! result: a 13-bit two's complement temperature in bits 15..3 at
//! 0.0625 °C per LSB. Each read is a single full-duplex DMA exchange of
//! [`TEMP_SENSOR_FRAME`] bytes; completion is reported through the SPI
//! driver's callback, configured once in [`TempSensor::init`].

use platform::buffer::DmaBuffer;
use platform::peripheral::Completion;
use platform::spi::{Spi, SpiDevice};
use platform::{Error, Mmio, Result};

use crate::config::{self, TEMP_SENSOR_FRAME};

/// Read-temperature-register command.
pub const CMD_READ_TEMPERATURE: u8 = 0x50;

/// Convert a raw reading to hundredths of a degree Celsius.
pub fn decode(raw: u16) -> i32 {
    // Reinterpret as signed, then drop the three flag bits.
    #[allow(clippy::cast_possible_wrap)]
    let counts = i32::from((raw as i16) >> 3);
    // 0.0625 °C = 6.25 centi-degrees
    counts.wrapping_mul(625) / 100
}

/// Handle to the sensor on its SPI bus.
pub struct TempSensor<B: Mmio + 'static> {
    spi: &'static Spi<'static, B>,
    device: SpiDevice,
    tx: &'static DmaBuffer<TEMP_SENSOR_FRAME>,
    rx: &'static DmaBuffer<TEMP_SENSOR_FRAME>,
}

impl<B: Mmio + 'static> TempSensor<B> {
    /// Bring up the sensor's SPI instance and DMA streams from the board
    /// configuration. `callback` fires from interrupt context when a read
    /// completes.
    pub fn init(
        spi: &'static Spi<'static, B>,
        tx: &'static DmaBuffer<TEMP_SENSOR_FRAME>,
        rx: &'static DmaBuffer<TEMP_SENSOR_FRAME>,
        callback: Option<Completion>,
    ) -> Result<Self> {
        if spi.instance() != config::TEMP_SENSOR_SPI {
            return Err(Error::InvalidConfig("temperature sensor is wired to spi1"));
        }
        spi.init(
            config::temp_sensor_spi(),
            config::temp_sensor_tx_dma()?,
            config::temp_sensor_rx_dma()?,
            callback,
        )?;
        let device = spi.device_init(config::temp_sensor_cs()?)?;
        tx.with(|frame| *frame = [CMD_READ_TEMPERATURE, 0, 0])?;
        Ok(Self { spi, device, tx, rx })
    }

    /// `true` while a read is in flight.
    pub fn is_busy(&self) -> bool {
        self.spi.is_busy()
    }

    /// Start a read. The result is available from [`Self::latest`] once the
    /// SPI callback reports success.
    pub fn read_temperature(&self) -> Result<()> {
        let tx = self.tx.region(TEMP_SENSOR_FRAME)?;
        let rx = self.rx.region(TEMP_SENSOR_FRAME)?;
        self.spi.transfer_async(&self.device, tx, rx)
    }

    /// Decode the last completed read, in centi-degrees Celsius.
    pub fn latest(&self) -> Result<i32> {
        self.rx
            .with(|frame| decode(u16::from_be_bytes([frame[1], frame[2]])))
    }

    /// Receive buffer, for tests that play the sensor's side.
    #[cfg(test)]
    pub(crate) fn rx_buffer(&self) -> &'static DmaBuffer<TEMP_SENSOR_FRAME> {
        self.rx
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::test_support::{complete, leak_dma, leak_spi};
    use platform::dma::regs::FLAG_TC;
    use platform::gpio::{self, PinId, Port};
    use std::sync::atomic::{AtomicU32, Ordering};

    static DONE: AtomicU32 = AtomicU32::new(0);

    fn on_done(ok: bool) {
        if ok {
            DONE.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn decode_examples() {
        assert_eq!(decode(0x0C80), 2_500);
        assert_eq!(decode(0x0000), 0);
        assert_eq!(decode(0x0008), 6);
        assert_eq!(decode(0xE700), -5_000);
        assert_eq!(decode(0xFFF8), -6);
        assert_eq!(decode(0x0C87), 2_500);
    }

    #[test]
    fn wrong_instance_is_rejected() {
        let dma = leak_dma();
        let spi = leak_spi(dma, platform::spi::SpiInstance::Spi2);
        let tx = Box::leak(Box::new(DmaBuffer::new()));
        let rx = Box::leak(Box::new(DmaBuffer::new()));
        assert!(TempSensor::init(spi, tx, rx, None).is_err());
    }

    #[test]
    fn read_exchanges_command_and_decodes() {
        let dma = leak_dma();
        let spi = leak_spi(dma, config::TEMP_SENSOR_SPI);
        let tx = Box::leak(Box::new(DmaBuffer::new()));
        let rx = Box::leak(Box::new(DmaBuffer::new()));
        let sensor = TempSensor::init(spi, tx, rx, Some(on_done)).unwrap();
        let cs = PinId::new(Port::E, 6).unwrap();
        assert!(gpio::output_level(dma.bus(), cs));

        sensor.read_temperature().unwrap();
        assert!(sensor.is_busy());
        assert!(!gpio::output_level(dma.bus(), cs));
        assert_eq!(sensor.latest(), Err(Error::Busy));
        assert_eq!(sensor.read_temperature(), Err(Error::Busy));

        complete(dma, 1, FLAG_TC);
        complete(dma, 0, FLAG_TC);
        assert!(!sensor.is_busy());
        assert!(gpio::output_level(dma.bus(), cs));
        assert!(DONE.load(Ordering::SeqCst) >= 1);

        sensor.rx_buffer().with(|frame| *frame = [0, 0x0C, 0x80]).unwrap();
        assert_eq!(sensor.latest().unwrap(), 2_500);
        assert_eq!(tx.with(|frame| frame[0]).unwrap(), CMD_READ_TEMPERATURE);
    }
}
