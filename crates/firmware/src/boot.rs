//! Per-core reset path.
//!
//! Both images share one reset design. A naked entry masks interrupts,
//! zeroes the kernel stack and calls into Rust; [`platform::boot::startup`]
//! then materialises memory from the linker's load and clear tables, switches
//! to privileged thread mode, enables the FPU (and, on core A, the caches),
//! runs the constructor arrays and calls `main`. When `main` returns the
//! destructors run and the core parks in WFI.
//!
//! The linker scripts (`cm7.x`, `cm4.x`) own the layout; this module only
//! reads the symbols they export.

/// Ordered list of reset steps, shared by docs and tests.
///
/// # Correctness Invariants
///
/// - The stack is zeroed before anything is pushed to it.
/// - `.data` is copied and `.bss` cleared before any constructor runs.
/// - On core A the MPU marks SRAM4 non-cacheable before the D-cache is
///   enabled, or the inter-core mailbox would be served from cache.
/// - Only core A clears `.shared`; core B must not wipe a call in flight.
pub const BOOT_SEQUENCE_STEPS: &[&str] = &[
    "1. Entry: mask interrupts",
    "2. Stack: zero the kernel stack",
    "3. Load: copy initialised sections from flash",
    "4. Clear: zero bss (core A also clears the shared mailbox)",
    "5. Mode: privileged thread mode, FPU enabled",
    "6. MPU: SRAM4 non-cacheable (core A)",
    "7. Caches: I-cache and D-cache on (core A)",
    "8. Constructors: preinit array, then init array",
    "9. main",
    "10. Destructors: fini array",
    "11. Park: wait for interrupt",
];

/// Kernel stack `cm7.x` reserves in DTCM.
pub const KSTACK_BYTES_CM7: u32 = 16 * 1024;
/// Kernel stack `cm4.x` reserves.
pub const KSTACK_BYTES_CM4: u32 = 8 * 1024;

/// Kernel stack reserved by `core`'s image.
pub const fn kstack_bytes(core: platform::rpc::CoreId) -> u32 {
    match core {
        platform::rpc::CoreId::Cm7 => KSTACK_BYTES_CM7,
        platform::rpc::CoreId::Cm4 => KSTACK_BYTES_CM4,
    }
}

#[cfg(feature = "hardware")]
pub mod hardware {
    //! Linker-symbol glue. Only compiled for the target.

    use core::ptr::addr_of;

    use platform::boot::{self, BootImage, ClearEntry, Constructor, CoreSetup, LoadEntry};
    use platform::rpc::CoreId;
    use platform::VolatileMmio;

    use crate::cpu::Cpu;

    extern "C" {
        static load_table_start: LoadEntry;
        static load_table_end: LoadEntry;
        static clear_table_start: ClearEntry;
        static clear_table_end: ClearEntry;
        static preinit_array_start: Option<Constructor>;
        static preinit_array_end: Option<Constructor>;
        static init_array_start: Option<Constructor>;
        static init_array_end: Option<Constructor>;
        static fini_array_start: Option<Constructor>;
        static fini_array_end: Option<Constructor>;
        static kstack_start: u32;
        static kstack_end: u32;
    }

    /// View a linker-delimited array.
    ///
    /// # Safety
    ///
    /// `start..end` must bound an initialised, immutable array of `T`.
    unsafe fn table<T>(start: *const T, end: *const T) -> &'static [T] {
        let bytes = (end as usize).saturating_sub(start as usize);
        let len = bytes.checked_div(core::mem::size_of::<T>()).unwrap_or(0);
        // SAFETY: upheld by the caller.
        unsafe { core::slice::from_raw_parts(start, len) }
    }

    /// The image the linker laid out for this core.
    fn image() -> BootImage<'static> {
        // SAFETY: the symbols are emitted by cm7.x/cm4.x around read-only
        // tables in flash; only their addresses are taken.
        unsafe {
            BootImage {
                stack: ClearEntry {
                    start: addr_of!(kstack_start) as u32,
                    end: addr_of!(kstack_end) as u32,
                },
                load: table(addr_of!(load_table_start), addr_of!(load_table_end)),
                clear: table(addr_of!(clear_table_start), addr_of!(clear_table_end)),
                preinit: table(addr_of!(preinit_array_start), addr_of!(preinit_array_end)),
                init: table(addr_of!(init_array_start), addr_of!(init_array_end)),
                fini: table(addr_of!(fini_array_start), addr_of!(fini_array_end)),
            }
        }
    }

    /// Rust half of the reset handler. The naked entry has already masked
    /// interrupts and zeroed the stack.
    ///
    /// # Safety
    ///
    /// Call exactly once, from the reset entry of `core`.
    pub unsafe fn start(core: CoreId, main: fn() -> i32) -> ! {
        let image = image();
        // SAFETY: boot context; the tables address this core's own RAM.
        let mem = unsafe { VolatileMmio::new() };
        let cpu = Cpu::new(core);
        // SAFETY: nothing else runs yet and the image was laid out by the
        // linker script of this core.
        let status = unsafe { boot::startup(core, &mem, &cpu, &image, main) };
        defmt::warn!("boot: {} main returned {}", core, status);
        loop {
            cpu.park();
        }
    }

    /// Emit the reset entry, startup shim and vector table of one core.
    ///
    /// Expands to the `Reset` symbol named by `ENTRY` in the linker script.
    /// `main` runs on the fresh stack with interrupts masked.
    #[macro_export]
    macro_rules! core_entry {
        (Cm7, $main:path) => {
            $crate::core_entry!(@emit Cm7, ".vector_table.cm7", $main);
        };
        (Cm4, $main:path) => {
            $crate::core_entry!(@emit Cm4, ".vector_table.cm4", $main);
        };
        (@emit $core:ident, $section:literal, $main:path) => {
            core::arch::global_asm!(
                ".section .text.Reset, \"ax\"",
                ".global Reset",
                ".type Reset, %function",
                ".thumb_func",
                "Reset:",
                "    cpsid i",
                "    ldr r0, =kstack_start",
                "    ldr r1, =kstack_end",
                "    movs r2, #0",
                "5:",
                "    cmp r1, r0",
                "    bls 6f",
                "    str r2, [r0], #4",
                "    b 5b",
                "6:",
                "    bl titan_startup",
                "7:",
                "    wfi",
                "    b 7b",
                ".size Reset, . - Reset",
            );

            #[no_mangle]
            unsafe extern "C" fn titan_startup() -> ! {
                // SAFETY: only reached from `Reset`.
                unsafe {
                    $crate::boot::hardware::start(::platform::rpc::CoreId::$core, $main)
                }
            }

            #[used]
            #[no_mangle]
            #[link_section = $section]
            static VECTOR_TABLE: $crate::vectors::VectorTable = $crate::vectors::VectorTable::new();
        };
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use platform::boot::sim::{SimCore, Step};
    use platform::boot::{reset, BootImage, ClearEntry, LoadEntry};
    use platform::rpc::CoreId;
    use platform::sim::SimBus;

    fn position(needle: &str) -> usize {
        BOOT_SEQUENCE_STEPS
            .iter()
            .position(|s| s.contains(needle))
            .expect("step documented")
    }

    #[test]
    fn test_boot_sequence_order_is_documented() {
        assert!(position("Stack") < position("Load"));
        assert!(position("Load") < position("Constructors"));
        assert!(position("Clear") < position("Constructors"));
        assert!(position("MPU") < position("Caches"));
        assert!(position("main") < position("Destructors"));
        assert_eq!(BOOT_SEQUENCE_STEPS.last().map(|s| s.contains("Park")), Some(true));
    }

    #[test]
    fn test_kstack_sizes_match_link_scripts() {
        let declared = |script: &str| {
            script
                .lines()
                .find_map(|line| line.trim().strip_prefix("_kstack_size = "))
                .and_then(|size| size.strip_suffix("K;"))
                .and_then(|kib| kib.parse::<u32>().ok())
                .map(|kib| kib * 1024)
        };
        assert_eq!(declared(include_str!("../cm7.x")), Some(kstack_bytes(CoreId::Cm7)));
        assert_eq!(declared(include_str!("../cm4.x")), Some(kstack_bytes(CoreId::Cm4)));
    }

    #[test]
    fn test_core_b_skips_caches() {
        let mem = SimBus::new();
        let stack = ClearEntry {
            start: 0x1000_0000,
            end: 0x1000_0000 + kstack_bytes(CoreId::Cm4),
        };
        let image = BootImage {
            stack,
            load: &[] as &[LoadEntry],
            clear: &[],
            preinit: &[],
            init: &[],
            fini: &[],
        };
        let a = SimCore::new();
        let b = SimCore::new();
        // SAFETY: empty tables, simulated memory.
        unsafe {
            assert_eq!(reset(CoreId::Cm7, &mem, &a, &image, || 0), 0);
            assert_eq!(reset(CoreId::Cm4, &mem, &b, &image, || 3), 3);
        }
        assert!(a.steps().contains(&Step::Caches));
        assert!(!b.steps().contains(&Step::Caches));
        assert_eq!(b.steps().last(), Some(&Step::Park));
    }
}
