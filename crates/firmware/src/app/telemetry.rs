//! Radio telemetry over USART DMA.
//!
//! Frame layout: sync byte `0xA5`, payload length, payload, then the XOR of
//! the length and every payload byte. Readings travel as little-endian
//! `i32`s, so one frame carries at most 63 of them.

use platform::buffer::DmaBuffer;
use platform::peripheral::Completion;
use platform::usart::Usart;
use platform::{Error, Mmio, Result};

use crate::config::{self, TELEMETRY_FRAME_MAX};

/// First byte of every frame.
pub const SYNC: u8 = 0xA5;

/// Largest payload a frame can carry.
pub const PAYLOAD_MAX: usize = 255;

/// Readings per frame.
pub const READINGS_PER_FRAME: usize = PAYLOAD_MAX / 4;

/// XOR checksum over the length byte and the payload.
pub fn checksum(len: u8, payload: &[u8]) -> u8 {
    payload.iter().fold(len, |acc, byte| acc ^ byte)
}

/// Write a frame around `payload` into `out`. Returns the frame length.
pub fn encode_frame(payload: &[u8], out: &mut [u8]) -> Result<usize> {
    let len = u8::try_from(payload.len()).map_err(|_| Error::InvalidConfig("payload too long"))?;
    let total = payload.len().saturating_add(3);
    let frame = out
        .get_mut(..total)
        .ok_or(Error::InvalidConfig("frame buffer too small"))?;
    let (head, rest) = frame.split_at_mut(2);
    head.copy_from_slice(&[SYNC, len]);
    let (body, tail) = rest.split_at_mut(payload.len());
    body.copy_from_slice(payload);
    tail.fill(checksum(len, payload));
    Ok(total)
}

/// Telemetry sink bound to its USART.
pub struct Telemetry<B: Mmio + 'static> {
    usart: &'static Usart<'static, B>,
    frame: &'static DmaBuffer<TELEMETRY_FRAME_MAX>,
}

impl<B: Mmio + 'static> Telemetry<B> {
    /// Bring up the radio USART. `callback` reports each frame's completion.
    pub fn init(
        usart: &'static Usart<'static, B>,
        frame: &'static DmaBuffer<TELEMETRY_FRAME_MAX>,
        callback: Option<Completion>,
    ) -> Result<Self> {
        usart.init(
            config::telemetry_usart(),
            config::telemetry_tx_dma()?,
            config::telemetry_rx_dma()?,
            callback,
        )?;
        Ok(Self { usart, frame })
    }

    /// `true` while a frame is on the wire.
    pub fn is_busy(&self) -> bool {
        self.usart.is_busy()
    }

    /// Frame and send `readings`.
    pub fn start(&self, readings: &[i32]) -> Result<()> {
        if readings.is_empty() || readings.len() > READINGS_PER_FRAME {
            return Err(Error::InvalidConfig("telemetry batch size"));
        }
        if self.usart.is_busy() {
            return Err(Error::Busy);
        }
        let len = self.frame.with(|buf| {
            let mut payload = [0u8; PAYLOAD_MAX];
            for (chunk, reading) in payload.chunks_exact_mut(4).zip(readings) {
                chunk.copy_from_slice(&reading.to_le_bytes());
            }
            let used = readings.len().saturating_mul(4);
            encode_frame(payload.get(..used).unwrap_or_default(), buf)
        })??;
        self.usart.write_async(self.frame.region(len)?)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;
    use crate::test_support::{complete, leak_dma, leak_usart};
    use platform::dma::regs::{FLAG_TC, M0AR, NDTR};
    use platform::dma::{Controller, StreamId};

    #[test]
    fn frame_layout() {
        let mut out = [0u8; 8];
        let n = encode_frame(&[0x01, 0x02, 0x04], &mut out).unwrap();
        assert_eq!(n, 6);
        assert_eq!(out[..6], [SYNC, 3, 1, 2, 4, 3 ^ 1 ^ 2 ^ 4]);
    }

    #[test]
    fn frame_limits() {
        let mut small = [0u8; 4];
        assert!(encode_frame(&[1, 2], &mut small).is_err());
        let mut big = [0u8; 300];
        assert!(encode_frame(&[0; 256], &mut big).is_err());
        assert_eq!(encode_frame(&[], &mut big).unwrap(), 3);
    }

    #[test]
    fn send_streams_the_frame() {
        let dma = leak_dma();
        let usart = leak_usart(dma, config::TELEMETRY_USART);
        let frame = Box::leak(Box::new(DmaBuffer::new()));
        let telemetry = Telemetry::init(usart, frame, None).unwrap();

        telemetry.start(&[2_500, -5_000]).unwrap();
        assert!(telemetry.is_busy());
        assert!(frame.is_lent());
        let tx = StreamId::new(Controller::Dma1, 2).unwrap();
        assert_eq!(dma.bus().peek(tx.register(NDTR)), 11);
        assert_ne!(dma.bus().peek(tx.register(M0AR)), 0);
        assert_eq!(telemetry.start(&[1]), Err(Error::Busy));

        complete(dma, 2, FLAG_TC);
        assert!(!telemetry.is_busy());
        let bytes = frame.with(|buf| buf[..11].to_vec()).unwrap();
        assert_eq!(bytes[..2], [SYNC, 8]);
        assert_eq!(bytes[2..6], 2_500i32.to_le_bytes());
        assert_eq!(bytes[10], checksum(8, &bytes[2..10]));
    }

    #[test]
    fn batch_size_is_checked() {
        let dma = leak_dma();
        let usart = leak_usart(dma, config::TELEMETRY_USART);
        let frame = Box::leak(Box::new(DmaBuffer::new()));
        let telemetry = Telemetry::init(usart, frame, None).unwrap();
        assert!(telemetry.start(&[]).is_err());
        assert!(telemetry.start(&[0; READINGS_PER_FRAME + 1]).is_err());
    }

    proptest::proptest! {
        #[test]
        fn frames_xor_to_zero(payload in proptest::collection::vec(proptest::num::u8::ANY, 0..=PAYLOAD_MAX)) {
            let mut out = [0u8; TELEMETRY_FRAME_MAX];
            let n = encode_frame(&payload, &mut out).unwrap();
            proptest::prop_assert_eq!(n, payload.len() + 3);
            proptest::prop_assert_eq!(out[0], SYNC);
            proptest::prop_assert_eq!(usize::from(out[1]), payload.len());
            proptest::prop_assert_eq!(&out[2..n - 1], &payload[..]);
            // Length, payload and checksum cancel out.
            proptest::prop_assert_eq!(out[1..n].iter().fold(0, |acc, b| acc ^ b), 0);
        }
    }
}
