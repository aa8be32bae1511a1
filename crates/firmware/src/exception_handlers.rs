//! Fault and default handlers shared by both images.
//!
//! `device.x` points every unclaimed vector at `DefaultHandler` and the
//! HardFault vector at `HardFault_default`, a small trampoline that picks
//! the active stack and hands the stacked frame to [`hard_fault_report`].
//! Both log over defmt and park the core; a fault is never returned from.
//!
//! Decoding of the fault status registers is plain data and host-tested.

/// Configurable Fault Status Register.
pub const CFSR: u32 = 0xE000_ED28;
/// MemManage Fault Address Register.
pub const MMFAR: u32 = 0xE000_ED34;
/// BusFault Address Register.
pub const BFAR: u32 = 0xE000_ED38;
/// Interrupt Control and State Register; VECTACTIVE is bits 8..0.
pub const ICSR: u32 = 0xE000_ED04;

/// Registers pushed by the core on exception entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(C)]
#[allow(missing_docs)]
pub struct ExceptionFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

/// Most specific cause named by a CFSR value.
pub fn fault_cause(cfsr: u32) -> &'static str {
    const CAUSES: [(u32, &str); 12] = [
        (1 << 25, "divide by zero"),
        (1 << 24, "unaligned access"),
        (1 << 19, "no coprocessor"),
        (1 << 18, "invalid pc load"),
        (1 << 17, "invalid state"),
        (1 << 16, "undefined instruction"),
        (1 << 12, "bus fault on exception stacking"),
        (1 << 9, "precise data bus error"),
        (1 << 10, "imprecise data bus error"),
        (1 << 8, "instruction bus error"),
        (1 << 1, "data access violation"),
        (1 << 0, "instruction access violation"),
    ];
    CAUSES
        .iter()
        .find(|(bit, _)| cfsr & bit != 0)
        .map_or("escalated or unknown", |(_, cause)| cause)
}

/// `true` when MMFAR holds the faulting address.
pub fn mmfar_valid(cfsr: u32) -> bool {
    cfsr & (1 << 7) != 0
}

/// `true` when BFAR holds the faulting address.
pub fn bfar_valid(cfsr: u32) -> bool {
    cfsr & (1 << 15) != 0
}

#[cfg(feature = "hardware")]
mod hardware {
    use super::{bfar_valid, fault_cause, mmfar_valid, ExceptionFrame, BFAR, CFSR, ICSR, MMFAR};
    use platform::{Mmio, VolatileMmio};

    core::arch::global_asm!(
        ".section .text.HardFault_default, \"ax\"",
        ".global HardFault_default",
        ".type HardFault_default, %function",
        ".thumb_func",
        "HardFault_default:",
        "    tst lr, #4",
        "    ite eq",
        "    mrseq r0, msp",
        "    mrsne r0, psp",
        "    b hard_fault_report",
        ".size HardFault_default, . - HardFault_default",
    );

    /// Log the fault and park.
    #[no_mangle]
    unsafe extern "C" fn hard_fault_report(frame: &ExceptionFrame) -> ! {
        // SAFETY: System Control Space reads only.
        let scs = unsafe { VolatileMmio::new() };
        let cfsr = scs.read(CFSR);
        defmt::error!("HardFault: {} (cfsr {=u32:#010x})", fault_cause(cfsr), cfsr);
        if mmfar_valid(cfsr) {
            defmt::error!("  mmfar {=u32:#010x}", scs.read(MMFAR));
        }
        if bfar_valid(cfsr) {
            defmt::error!("  bfar {=u32:#010x}", scs.read(BFAR));
        }
        defmt::error!("  {}", frame);
        loop {
            cortex_m::asm::bkpt();
            cortex_m::asm::wfi();
        }
    }

    /// Catch-all for vectors nothing claimed.
    #[no_mangle]
    #[allow(non_snake_case)]
    unsafe extern "C" fn DefaultHandler() {
        // SAFETY: System Control Space read only.
        let scs = unsafe { VolatileMmio::new() };
        defmt::error!("unhandled exception {=u32}", scs.read(ICSR) & 0x1FF);
        loop {
            cortex_m::asm::wfi();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn causes_are_decoded() {
        assert_eq!(fault_cause(1 << 25), "divide by zero");
        assert_eq!(fault_cause((1 << 16) | (1 << 1)), "undefined instruction");
        assert_eq!(fault_cause(0), "escalated or unknown");
    }

    #[test]
    fn address_registers_are_gated() {
        assert!(mmfar_valid((1 << 7) | (1 << 1)));
        assert!(!bfar_valid(1 << 9));
        assert!(bfar_valid((1 << 15) | (1 << 9)));
    }

    #[test]
    fn frame_is_eight_words() {
        assert_eq!(core::mem::size_of::<ExceptionFrame>(), 32);
    }
}
