//! Real-time clock.
//!
//! The calendar runs in 24-hour format from the 32.768 kHz LSE. Date and
//! time are stored in BCD; [`Rtc::read`] and [`Rtc::write`] convert to and
//! from plain fields. Writes go through the INIT handshake with the
//! backup-domain and RTC write protections lifted for the duration.

use crate::dma::SPIN_LIMIT;
use crate::error::{Error, Result};
use crate::mmio::Mmio;
use crate::rcc;

/// RTC register block base.
pub const RTC_BASE: u32 = 0x5800_4000;

/// Register map.
#[allow(missing_docs)]
pub mod regs {
    use crate::mmio::Field;

    pub const TR: u32 = 0x00;
    pub const DR: u32 = 0x04;
    pub const CR: u32 = 0x08;
    pub const ISR: u32 = 0x0C;
    pub const PRER: u32 = 0x10;
    pub const WPR: u32 = 0x24;
    pub const SSR: u32 = 0x28;

    pub const TR_SU: Field = Field::new(0, 4);
    pub const TR_ST: Field = Field::new(4, 3);
    pub const TR_MNU: Field = Field::new(8, 4);
    pub const TR_MNT: Field = Field::new(12, 3);
    pub const TR_HU: Field = Field::new(16, 4);
    pub const TR_HT: Field = Field::new(20, 2);

    pub const DR_DU: Field = Field::new(0, 4);
    pub const DR_DT: Field = Field::new(4, 2);
    pub const DR_MU: Field = Field::new(8, 4);
    pub const DR_MT: Field = Field::new(12, 1);
    pub const DR_WDU: Field = Field::new(13, 3);
    pub const DR_YU: Field = Field::new(16, 4);
    pub const DR_YT: Field = Field::new(20, 4);

    pub const CR_FMT: u32 = 1 << 6;

    pub const ISR_RSF: u32 = 1 << 5;
    pub const ISR_INITF: u32 = 1 << 6;
    pub const ISR_INIT: u32 = 1 << 7;

    pub const PRER_PREDIV_S: Field = Field::new(0, 15);
    pub const PRER_PREDIV_A: Field = Field::new(16, 7);

    pub const SSR_SS: Field = Field::new(0, 16);

    pub const WPR_KEY1: u32 = 0xCA;
    pub const WPR_KEY2: u32 = 0x53;
    pub const WPR_LOCK: u32 = 0xFF;

    pub const BDCR_LSEON: u32 = 1 << 0;
    pub const BDCR_LSERDY: u32 = 1 << 1;
    pub const BDCR_RTCSEL: Field = Field::new(8, 2);
    pub const BDCR_RTCEN: u32 = 1 << 15;
}

/// Asynchronous prescaler register value (divide by 128).
pub const PREDIV_A: u32 = 127;
/// Synchronous prescaler register value (divide by 256).
pub const PREDIV_S: u32 = 255;

/// Calendar reading or setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DateTime {
    /// Years since 2000 (0..=99).
    pub year: u8,
    /// 1..=12.
    pub month: u8,
    /// 1..=31.
    pub day: u8,
    /// 1 (Monday) ..= 7 (Sunday).
    pub weekday: u8,
    /// 0..=23.
    pub hours: u8,
    /// 0..=59.
    pub minutes: u8,
    /// 0..=59.
    pub seconds: u8,
    /// Fraction of the current second in 1/65536 units. Ignored on write.
    pub subseconds: u16,
}

impl DateTime {
    fn validate(&self) -> Result<()> {
        let ok = self.year <= 99
            && (1..=12).contains(&self.month)
            && (1..=31).contains(&self.day)
            && (1..=7).contains(&self.weekday)
            && self.hours <= 23
            && self.minutes <= 59
            && self.seconds <= 59;
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidConfig("date or time field out of range"))
        }
    }
}

fn tens(value: u8) -> u32 {
    u32::from(value / 10)
}

fn units(value: u8) -> u32 {
    u32::from(value % 10)
}

#[allow(clippy::cast_possible_truncation)] // BCD digits, at most 99
fn bcd(tens: u32, units: u32) -> u8 {
    (tens.wrapping_mul(10).wrapping_add(units)) as u8
}

/// Sub-second fraction from a raw SSR reading.
#[allow(clippy::cast_possible_truncation)] // quotient < 65536 since ss <= prediv_s
pub fn subsecond_fraction(ss: u32, prediv_s: u32) -> u16 {
    let elapsed = prediv_s.saturating_sub(ss);
    let scaled = u64::from(elapsed).wrapping_shl(16);
    let period = u64::from(prediv_s).wrapping_add(1);
    scaled.checked_div(period).unwrap_or(0).min(u64::from(u16::MAX)) as u16
}

/// RTC driver.
pub struct Rtc<B: Mmio> {
    bus: B,
}

impl<B: Mmio> Rtc<B> {
    /// Driver over `bus`.
    pub const fn new(bus: B) -> Self {
        Self { bus }
    }

    fn reg(offset: u32) -> u32 {
        RTC_BASE.wrapping_add(offset)
    }

    fn unlock(&self) {
        self.bus.set_bits(
            rcc::PWR_BASE.wrapping_add(rcc::PWR_CR1),
            rcc::PWR_CR1_DBP,
        );
        self.bus.write(Self::reg(regs::WPR), regs::WPR_KEY1);
        self.bus.write(Self::reg(regs::WPR), regs::WPR_KEY2);
    }

    fn lock(&self) {
        self.bus.write(Self::reg(regs::WPR), regs::WPR_LOCK);
    }

    fn spin_until(&self, addr: u32, mask: u32) -> Result<()> {
        for _ in 0..SPIN_LIMIT {
            if self.bus.bits_set(addr, mask) {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(Error::Timeout)
    }

    /// Run `f` in INIT mode with write protection lifted.
    fn in_init_mode(&self, f: impl FnOnce(&B)) -> Result<()> {
        self.unlock();
        let isr = Self::reg(regs::ISR);
        self.bus.set_bits(isr, regs::ISR_INIT);
        let entered = self.spin_until(isr, regs::ISR_INITF);
        if entered.is_ok() {
            f(&self.bus);
        }
        self.bus.clear_bits(isr, regs::ISR_INIT);
        self.lock();
        entered.map_err(|error| {
            warn!("rtc: INITF never raised");
            error
        })
    }

    /// Start the LSE, select it as RTC clock and program the prescalers.
    pub fn init(&self) -> Result<()> {
        self.unlock();
        let bdcr = rcc::RCC_BASE.wrapping_add(rcc::regs::BDCR);
        self.bus.set_bits(bdcr, regs::BDCR_LSEON);
        self.spin_until(bdcr, regs::BDCR_LSERDY)?;
        self.bus.write_field(bdcr, regs::BDCR_RTCSEL, 0b01);
        self.bus.set_bits(bdcr, regs::BDCR_RTCEN);

        self.in_init_mode(|bus| {
            let prer = Self::reg(regs::PRER);
            bus.write(prer, regs::PRER_PREDIV_S.encode(PREDIV_S));
            bus.write(
                prer,
                regs::PRER_PREDIV_S.encode(PREDIV_S) | regs::PRER_PREDIV_A.encode(PREDIV_A),
            );
            bus.clear_bits(Self::reg(regs::CR), regs::CR_FMT);
        })?;
        info!("rtc: running");
        Ok(())
    }

    /// Set the calendar.
    pub fn write(&self, dt: &DateTime) -> Result<()> {
        dt.validate()?;
        let tr = regs::TR_HT.encode(tens(dt.hours))
            | regs::TR_HU.encode(units(dt.hours))
            | regs::TR_MNT.encode(tens(dt.minutes))
            | regs::TR_MNU.encode(units(dt.minutes))
            | regs::TR_ST.encode(tens(dt.seconds))
            | regs::TR_SU.encode(units(dt.seconds));
        let dr = regs::DR_YT.encode(tens(dt.year))
            | regs::DR_YU.encode(units(dt.year))
            | regs::DR_WDU.encode(u32::from(dt.weekday))
            | regs::DR_MT.encode(tens(dt.month))
            | regs::DR_MU.encode(units(dt.month))
            | regs::DR_DT.encode(tens(dt.day))
            | regs::DR_DU.encode(units(dt.day));
        self.in_init_mode(|bus| {
            bus.write(Self::reg(regs::TR), tr);
            bus.write(Self::reg(regs::DR), dr);
        })
    }

    /// Read the calendar.
    ///
    /// SSR is read first: that freezes the TR/DR shadows until DR is read.
    pub fn read(&self) -> DateTime {
        let ss = regs::SSR_SS.decode(self.bus.read(Self::reg(regs::SSR)));
        let tr = self.bus.read(Self::reg(regs::TR));
        let dr = self.bus.read(Self::reg(regs::DR));
        let prediv_s = regs::PRER_PREDIV_S.decode(self.bus.read(Self::reg(regs::PRER)));
        DateTime {
            year: bcd(regs::DR_YT.decode(dr), regs::DR_YU.decode(dr)),
            month: bcd(regs::DR_MT.decode(dr), regs::DR_MU.decode(dr)),
            day: bcd(regs::DR_DT.decode(dr), regs::DR_DU.decode(dr)),
            weekday: bcd(0, regs::DR_WDU.decode(dr)),
            hours: bcd(regs::TR_HT.decode(tr), regs::TR_HU.decode(tr)),
            minutes: bcd(regs::TR_MNT.decode(tr), regs::TR_MNU.decode(tr)),
            seconds: bcd(regs::TR_ST.decode(tr), regs::TR_SU.decode(tr)),
            subseconds: subsecond_fraction(ss, prediv_s),
        }
    }
}
