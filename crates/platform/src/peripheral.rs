//! Configuration vocabulary shared by the SPI, I²C and USART drivers.
//!
//! Each driver owns a TX and an RX DMA stream. Callers describe those
//! streams with a [`PeriphDmaConfig`]; the driver fills in the DMAMUX request
//! line and its own completion trampoline when it initialises.

use crate::dma::{Callback, Direction, DmaConfig, FifoThreshold, Priority, StreamId, Width};
use crate::error::{Error, Result};

/// Kernel clock feeding the peripheral blocks, in Hz.
pub const KERNEL_CLOCK_HZ: u32 = 64_000_000;

/// Lower bound on the poll count of the blocking transfer variants.
pub const BLOCKING_RETRIES_MIN: u32 = 10_000;

/// Peripheral completion callback: `true` on success.
pub type Completion = fn(bool);

/// SPI modes (CPOL, CPHA)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiMode {
    /// Mode 0: CPOL=0, CPHA=0
    Mode0,
    /// Mode 1: CPOL=0, CPHA=1
    Mode1,
    /// Mode 2: CPOL=1, CPHA=0
    Mode2,
    /// Mode 3: CPOL=1, CPHA=1
    Mode3,
}

impl SpiMode {
    /// Clock idles high.
    pub const fn cpol(self) -> bool {
        matches!(self, Self::Mode2 | Self::Mode3)
    }

    /// Data captured on the second edge.
    pub const fn cpha(self) -> bool {
        matches!(self, Self::Mode1 | Self::Mode3)
    }
}

impl TryFrom<u8> for SpiMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Mode0),
            1 => Ok(Self::Mode1),
            2 => Ok(Self::Mode2),
            3 => Ok(Self::Mode3),
            _ => Err(Error::InvalidConfig("spi mode out of range")),
        }
    }
}

/// Bit order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitOrder {
    /// Most significant bit first
    MsbFirst,
    /// Least significant bit first
    LsbFirst,
}

/// I²C target addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressMode {
    /// 7-bit addresses.
    SevenBit,
    /// 10-bit addresses.
    TenBit,
}

/// USART data bits, parity excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataBits {
    /// 7 bits.
    Seven,
    /// 8 bits.
    Eight,
    /// 9 bits.
    Nine,
}

impl DataBits {
    /// Number of bits.
    pub const fn count(self) -> u8 {
        match self {
            Self::Seven => 7,
            Self::Eight => 8,
            Self::Nine => 9,
        }
    }
}

/// USART parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parity {
    /// No parity bit.
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
}

/// USART stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopBits {
    /// 1 stop bit (STOP = 0).
    One,
    /// 0.5 stop bit (STOP = 1).
    Half,
    /// 2 stop bits (STOP = 2).
    Two,
    /// 1.5 stop bits (STOP = 3).
    OnePointFive,
}

/// A DMA stream description without its request line or callback.
#[derive(Debug, Clone, Copy)]
pub struct PeriphDmaConfig {
    /// Stream the driver will own.
    pub stream: StreamId,
    /// Must match the driver side it is passed for.
    pub direction: Direction,
    /// Source item width.
    pub src_width: Width,
    /// Destination item width.
    pub dst_width: Width,
    /// Increment the source address.
    pub src_increment: bool,
    /// Increment the destination address.
    pub dst_increment: bool,
    /// Arbitration priority.
    pub priority: Priority,
    /// FIFO threshold, or `None` for direct mode.
    pub fifo: Option<FifoThreshold>,
}

impl PeriphDmaConfig {
    /// Byte-wide memory-to-peripheral stream.
    pub const fn tx(stream: StreamId, priority: Priority) -> Self {
        Self {
            stream,
            direction: Direction::MemToPeriph,
            src_width: Width::Byte,
            dst_width: Width::Byte,
            src_increment: true,
            dst_increment: false,
            priority,
            fifo: None,
        }
    }

    /// Byte-wide peripheral-to-memory stream.
    pub const fn rx(stream: StreamId, priority: Priority) -> Self {
        Self {
            stream,
            direction: Direction::PeriphToMem,
            src_width: Width::Byte,
            dst_width: Width::Byte,
            src_increment: false,
            dst_increment: true,
            priority,
            fifo: None,
        }
    }

    /// Fill in the request line and callback.
    pub const fn complete(self, request: u8, callback: Callback) -> DmaConfig {
        DmaConfig {
            stream: self.stream,
            request,
            direction: self.direction,
            src_width: self.src_width,
            dst_width: self.dst_width,
            src_increment: self.src_increment,
            dst_increment: self.dst_increment,
            priority: self.priority,
            fifo: self.fifo,
            callback,
        }
    }

    /// Check a TX/RX pair handed to a driver.
    pub(crate) fn check_pair(tx: &Self, rx: &Self) -> Result<()> {
        if tx.direction != Direction::MemToPeriph {
            return Err(Error::InvalidConfig("tx stream must be memory-to-peripheral"));
        }
        if rx.direction != Direction::PeriphToMem {
            return Err(Error::InvalidConfig("rx stream must be peripheral-to-memory"));
        }
        if tx.stream == rx.stream {
            return Err(Error::InvalidConfig("tx and rx need distinct streams"));
        }
        Ok(())
    }
}

pub(crate) fn check_retries(retries: u32) -> Result<()> {
    if retries < BLOCKING_RETRIES_MIN {
        return Err(Error::InvalidConfig("blocking retries below 10000"));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::dma::{Context, Controller};

    fn noop(_: bool, _: Context) {}

    #[test]
    fn spi_mode_bits() {
        assert!(!SpiMode::Mode0.cpol() && !SpiMode::Mode0.cpha());
        assert!(SpiMode::Mode3.cpol() && SpiMode::Mode3.cpha());
        assert_eq!(SpiMode::try_from(1).unwrap(), SpiMode::Mode1);
        assert!(SpiMode::try_from(4).is_err());
    }

    #[test]
    fn pair_directions_are_checked() {
        let tx = PeriphDmaConfig::tx(StreamId::new(Controller::Dma1, 0).unwrap(), Priority::High);
        let rx = PeriphDmaConfig::rx(StreamId::new(Controller::Dma1, 1).unwrap(), Priority::High);
        assert!(PeriphDmaConfig::check_pair(&tx, &rx).is_ok());
        assert!(PeriphDmaConfig::check_pair(&rx, &tx).is_err());
        assert!(PeriphDmaConfig::check_pair(&tx, &tx).is_err());
    }

    #[test]
    fn complete_fills_request() {
        let tx = PeriphDmaConfig::tx(StreamId::new(Controller::Dma2, 3).unwrap(), Priority::Low);
        let full = tx.complete(38, noop);
        assert_eq!(full.request, 38);
        assert_eq!(full.direction, Direction::MemToPeriph);
        assert!(full.src_increment && !full.dst_increment);
    }

    #[test]
    fn retries_have_a_floor() {
        assert!(check_retries(9_999).is_err());
        assert!(check_retries(BLOCKING_RETRIES_MIN).is_ok());
    }
}
