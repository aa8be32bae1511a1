//! Cortex-M7 MPU region setup.
//!
//! Core A's D-cache must not hold lines of memory the other core or a DMA
//! controller writes behind its back. The inter-core mailbox lives in SRAM4,
//! so boot marks that region non-cacheable before enabling the cache.
//!
//! # Region rules (ARMv7-M)
//!
//! - Size is a power of two, at least 32 bytes.
//! - Base is aligned to the size.
//! - RASR SIZE field = `log2(size) - 1`.
//!
//! # Attributes (TEX, S, C, B)
//!
//! | Attribute                  | TEX | S | C | B |
//! |----------------------------|-----|---|---|---|
//! | Strongly ordered           | 000 | 1 | 0 | 0 |
//! | Non-cacheable, shareable   | 001 | 1 | 0 | 0 |
//! | Write-back, no allocate    | 000 | 0 | 1 | 1 |
//! | Write-through, no allocate | 000 | 0 | 1 | 0 |

use crate::error::{Error, Result};
use crate::mmio::Mmio;

/// MPU registers.
#[allow(missing_docs)]
pub mod regs {
    pub const CTRL: u32 = 0xE000_ED94;
    pub const RNR: u32 = 0xE000_ED98;
    pub const RBAR: u32 = 0xE000_ED9C;
    pub const RASR: u32 = 0xE000_EDA0;

    pub const CTRL_ENABLE: u32 = 1 << 0;
    pub const CTRL_PRIVDEFENA: u32 = 1 << 2;

    pub const RBAR_VALID: u32 = 1 << 4;

    pub const RASR_ENABLE: u32 = 1 << 0;
    pub const RASR_B: u32 = 1 << 16;
    pub const RASR_C: u32 = 1 << 17;
    pub const RASR_S: u32 = 1 << 18;
    pub const RASR_TEX_001: u32 = 1 << 19;
    pub const RASR_AP_FULL: u32 = 0b011 << 24;
    pub const RASR_XN: u32 = 1 << 28;
}

/// Hardware region slots.
pub const REGION_COUNT: u8 = 16;

/// SRAM4, shared by both cores (D3 domain).
pub const SRAM4_BASE: u32 = 0x3800_0000;
/// SRAM4 size.
pub const SRAM4_SIZE: u32 = 64 * 1024;

/// MPU memory attributes for a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MpuAttributes {
    /// Strongly ordered, for peripheral registers.
    StronglyOrdered,
    /// Normal memory, not cached, shareable between bus masters.
    NonCacheable,
    /// Write-back, no write-allocate.
    WriteBackNoWriteAllocate,
    /// Write-through, no write-allocate.
    WriteThrough,
}

impl MpuAttributes {
    const fn rasr_bits(self) -> u32 {
        match self {
            Self::StronglyOrdered => regs::RASR_S | regs::RASR_XN,
            Self::NonCacheable => regs::RASR_TEX_001 | regs::RASR_S | regs::RASR_XN,
            Self::WriteBackNoWriteAllocate => regs::RASR_C | regs::RASR_B,
            Self::WriteThrough => regs::RASR_C,
        }
    }
}

/// A validated MPU region descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MpuRegion {
    base: u32,
    size: u32,
    attrs: MpuAttributes,
}

impl MpuRegion {
    /// Validate size and alignment.
    pub fn new(base: u32, size: u32, attrs: MpuAttributes) -> Result<Self> {
        if size < 32 {
            return Err(Error::InvalidConfig("mpu region below 32 bytes"));
        }
        if !size.is_power_of_two() {
            return Err(Error::InvalidConfig("mpu region size not a power of two"));
        }
        if base & size.wrapping_sub(1) != 0 {
            return Err(Error::InvalidConfig("mpu region base not aligned to size"));
        }
        Ok(Self { base, size, attrs })
    }

    /// SRAM4 as non-cacheable shared memory.
    pub fn shared_sram4() -> Result<Self> {
        Self::new(SRAM4_BASE, SRAM4_SIZE, MpuAttributes::NonCacheable)
    }

    /// RASR SIZE field.
    pub fn size_field(&self) -> u32 {
        self.size.trailing_zeros().saturating_sub(1)
    }

    /// Base address.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Size in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Attributes.
    pub fn attrs(&self) -> MpuAttributes {
        self.attrs
    }

    /// Exclusive end, saturating at the top of the address space.
    pub fn end(&self) -> u32 {
        self.base.saturating_add(self.size)
    }

    /// `true` if the two regions share any byte.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.base < other.end() && other.base < self.end()
    }

    /// RBAR value selecting `slot`.
    pub fn rbar(&self, slot: u8) -> u32 {
        self.base | regs::RBAR_VALID | (u32::from(slot) & 0xF)
    }

    /// RASR value, region enabled.
    pub fn rasr(&self) -> u32 {
        regs::RASR_AP_FULL
            | self.attrs.rasr_bits()
            | self.size_field().wrapping_shl(1)
            | regs::RASR_ENABLE
    }
}

/// Program `regions` into slots 0.. and enable the MPU with the default map
/// as background for privileged code.
pub fn apply(bus: &impl Mmio, regions: &[MpuRegion]) -> Result<()> {
    if regions.len() > usize::from(REGION_COUNT) {
        return Err(Error::InvalidConfig("more mpu regions than slots"));
    }
    bus.write(regs::CTRL, 0);
    for (slot, region) in (0u8..).zip(regions) {
        bus.write(regs::RNR, u32::from(slot));
        bus.write(regs::RBAR, region.rbar(slot));
        bus.write(regs::RASR, region.rasr());
    }
    bus.write(regs::CTRL, regs::CTRL_ENABLE | regs::CTRL_PRIVDEFENA);
    debug!("mpu: {} regions enabled", regions.len());
    Ok(())
}
