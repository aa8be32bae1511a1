//! Cortex-M7/M4 core control for the boot and RPC layers.

use cortex_m::register::control::{self, Npriv};
use platform::boot::CoreSetup;
use platform::critical::InterruptControl;
use platform::mpu::{self, MpuRegion};
use platform::rpc::{CoreId, CoreOps};
use platform::{Mmio, VolatileMmio};

/// Coprocessor access control register.
const CPACR: u32 = 0xE000_ED88;
/// CP10 and CP11 full access.
const CPACR_FPU_FULL: u32 = 0xF << 20;

/// The core this code is running on.
pub struct Cpu {
    core: CoreId,
    bus: VolatileMmio,
}

impl Cpu {
    /// Handle for `core`. Only construct it for the core actually running.
    pub fn new(core: CoreId) -> Self {
        Self {
            core,
            // SAFETY: only System Control Space registers are addressed.
            bus: unsafe { VolatileMmio::new() },
        }
    }
}

impl InterruptControl for Cpu {
    fn interrupts_enabled(&self) -> bool {
        cortex_m::register::primask::read().is_active()
    }

    fn disable_interrupts(&self) {
        cortex_m::interrupt::disable();
    }

    fn enable_interrupts(&self) {
        // SAFETY: callers only unmask on leaving a section they opened.
        unsafe { cortex_m::interrupt::enable() };
    }
}

impl CoreSetup for Cpu {
    fn set_privileged_thread(&self) {
        let mut value = control::read();
        value.set_npriv(Npriv::Privileged);
        // SAFETY: still privileged at reset; stack selection is unchanged.
        unsafe { control::write(value) };
        cortex_m::asm::isb();
    }

    fn enable_fpu(&self) {
        self.bus.set_bits(CPACR, CPACR_FPU_FULL);
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    fn enable_caches(&self) {
        // The mailbox must bypass the D-cache before it is switched on.
        let shared = MpuRegion::shared_sram4().and_then(|r| mpu::apply(&self.bus, &[r]));
        if let Err(error) = shared {
            defmt::error!("cpu: mpu setup failed ({}), caches left off", error);
            return;
        }
        cortex_m::asm::dsb();
        cortex_m::asm::isb();

        // SAFETY: boot context, nothing else holds the core peripherals.
        let mut cp = unsafe { cortex_m::Peripherals::steal() };
        cp.SCB.enable_icache();
        cp.SCB.enable_dcache(&mut cp.CPUID);
        defmt::debug!("cpu: caches on");
    }

    fn park(&self) {
        cortex_m::asm::wfi();
    }
}

impl CoreOps for Cpu {
    fn current_core(&self) -> CoreId {
        self.core
    }

    fn send_event(&self) {
        cortex_m::asm::dsb();
        cortex_m::asm::sev();
    }
}
