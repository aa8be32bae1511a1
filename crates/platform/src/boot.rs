//! Reset pipeline.
//!
//! Each core's reset entry masks interrupts, zeroes its kernel stack, runs
//! [`startup`] and parks. `startup` materialises memory from the linker's
//! load and clear tables, configures the core, runs the constructor arrays,
//! calls `main`, then runs the fini array.
//!
//! Memory is reached through [`Mmio`], so the same code runs against
//! [`crate::mmio::VolatileMmio`] on target and the simulator in tests.

use crate::critical::InterruptControl;
use crate::error::{Error, Result};
use crate::mmio::Mmio;
use crate::rpc::CoreId;

const WORD: u32 = 4;

/// Copy `[src, end)` from image storage to `dst`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadEntry {
    /// First source byte.
    pub src: u32,
    /// One past the last source byte.
    pub end: u32,
    /// First destination byte.
    pub dst: u32,
}

impl LoadEntry {
    /// Length in bytes, zero if the range is reversed.
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.src)
    }

    /// `true` for an empty entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dst_end(&self) -> u32 {
        self.dst.saturating_add(self.len())
    }
}

/// Zero `[start, end)`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearEntry {
    /// First byte.
    pub start: u32,
    /// One past the last byte.
    pub end: u32,
}

/// Entry of the preinit/init/fini arrays.
pub type Constructor = unsafe extern "C" fn();

/// Linker-described layout of one core's image.
#[derive(Debug, Clone, Copy)]
pub struct BootImage<'a> {
    /// Kernel stack `[start, end)`.
    pub stack: ClearEntry,
    /// Sections copied from flash.
    pub load: &'a [LoadEntry],
    /// Sections zeroed.
    pub clear: &'a [ClearEntry],
    /// Run before `init`.
    pub preinit: &'a [Option<Constructor>],
    /// Static constructors.
    pub init: &'a [Option<Constructor>],
    /// Run after `main` returns.
    pub fini: &'a [Option<Constructor>],
}

fn aligned(addr: u32) -> bool {
    addr & (WORD - 1) == 0
}

fn check_range(start: u32, end: u32) -> Result<()> {
    if end < start {
        return Err(Error::InvalidConfig("section range reversed"));
    }
    if !aligned(start) || !aligned(end) {
        return Err(Error::InvalidConfig("section not word aligned"));
    }
    Ok(())
}

impl BootImage<'_> {
    /// Reject reversed ranges, unaligned words and overlapping load
    /// destinations.
    pub fn validate(&self) -> Result<()> {
        check_range(self.stack.start, self.stack.end)?;
        for entry in self.clear {
            check_range(entry.start, entry.end)?;
        }
        for entry in self.load {
            check_range(entry.src, entry.end)?;
            if !aligned(entry.dst) {
                return Err(Error::InvalidConfig("section not word aligned"));
            }
            if entry.dst.checked_add(entry.len()).is_none() {
                return Err(Error::InvalidConfig("section range reversed"));
            }
        }
        for (i, a) in self.load.iter().enumerate() {
            let overlapping = self
                .load
                .iter()
                .skip(i.saturating_add(1))
                .filter(|b| !a.is_empty() && !b.is_empty())
                .any(|b| a.dst < b.dst_end() && b.dst < a.dst_end());
            if overlapping {
                return Err(Error::InvalidConfig("load destinations overlap"));
            }
        }
        Ok(())
    }
}

/// CPU-level actions of the reset path.
pub trait CoreSetup: InterruptControl {
    /// Run thread mode privileged.
    fn set_privileged_thread(&self);
    /// Grant full access to the FPU coprocessors.
    fn enable_fpu(&self);
    /// Enable the instruction and data caches.
    fn enable_caches(&self);
    /// Idle in wait-for-interrupt. Never returns on target.
    fn park(&self);
}

/// Copy every load entry word by word.
pub fn copy_sections(mem: &impl Mmio, table: &[LoadEntry]) {
    for entry in table {
        let mut offset = 0;
        while offset < entry.len() {
            let word = mem.read(entry.src.wrapping_add(offset));
            mem.write(entry.dst.wrapping_add(offset), word);
            offset = offset.wrapping_add(WORD);
        }
    }
}

/// Zero every clear entry.
pub fn clear_sections(mem: &impl Mmio, table: &[ClearEntry]) {
    for entry in table {
        zero_words(mem, entry.start, entry.end);
    }
}

/// Zero the kernel stack. Touches nothing outside `[start, end)`.
pub fn zero_stack(mem: &impl Mmio, stack: ClearEntry) {
    zero_words(mem, stack.start, stack.end);
}

fn zero_words(mem: &impl Mmio, start: u32, end: u32) {
    let mut addr = start;
    while addr < end {
        mem.write(addr, 0);
        addr = addr.wrapping_add(WORD);
    }
}

/// Call each constructor in order, skipping null entries.
///
/// # Safety
///
/// Every entry must be safe to call at this point of boot.
pub unsafe fn run_constructors(list: &[Option<Constructor>]) {
    for ctor in list.iter().flatten() {
        // SAFETY: upheld by the caller.
        unsafe { ctor() };
    }
}

/// High-level reset routine: load, clear, configure the core, run
/// constructors, `main`, then the fini array. Returns `main`'s status.
///
/// # Safety
///
/// `image` must describe memory that nothing else is using, and its
/// constructor arrays must be callable.
pub unsafe fn startup<M, C>(
    core: CoreId,
    mem: &M,
    cpu: &C,
    image: &BootImage<'_>,
    main: impl FnOnce() -> i32,
) -> i32
where
    M: Mmio,
    C: CoreSetup,
{
    copy_sections(mem, image.load);
    clear_sections(mem, image.clear);

    cpu.set_privileged_thread();
    cpu.enable_fpu();
    if core == CoreId::Cm7 {
        cpu.enable_caches();
    }

    // SAFETY: upheld by the caller.
    unsafe {
        run_constructors(image.preinit);
        run_constructors(image.init);
    }
    debug!("boot: {} entering main", core);
    let status = main();
    // SAFETY: upheld by the caller.
    unsafe { run_constructors(image.fini) };
    status
}

/// Whole reset handler: mask interrupts, zero the stack, [`startup`], park.
///
/// # Safety
///
/// As for [`startup`]; additionally nothing may be live on the kernel stack.
pub unsafe fn reset<M, C>(
    core: CoreId,
    mem: &M,
    cpu: &C,
    image: &BootImage<'_>,
    main: impl FnOnce() -> i32,
) -> i32
where
    M: Mmio,
    C: CoreSetup,
{
    cpu.disable_interrupts();
    zero_stack(mem, image.stack);
    // SAFETY: upheld by the caller.
    let status = unsafe { startup(core, mem, cpu, image, main) };
    cpu.park();
    status
}

/// Recording [`CoreSetup`] for host tests.
#[cfg(any(test, feature = "simulator"))]
pub mod sim {
    use std::sync::{Mutex, PoisonError};
    use std::vec::Vec;

    use super::CoreSetup;
    use crate::critical::{InterruptControl, SimInterrupts};

    /// CPU action observed by [`SimCore`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Step {
        /// Interrupts masked.
        DisableInterrupts,
        /// Interrupts unmasked.
        EnableInterrupts,
        /// Thread mode made privileged.
        Privileged,
        /// FPU enabled.
        Fpu,
        /// Caches enabled.
        Caches,
        /// Parked.
        Park,
    }

    /// CPU model that records every action.
    #[derive(Default)]
    pub struct SimCore {
        irq: SimInterrupts,
        steps: Mutex<Vec<Step>>,
    }

    impl SimCore {
        /// Fresh core, interrupts enabled.
        pub fn new() -> Self {
            Self::default()
        }

        /// Actions so far.
        pub fn steps(&self) -> Vec<Step> {
            self.steps
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        fn record(&self, step: Step) {
            self.steps
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(step);
        }
    }

    impl InterruptControl for SimCore {
        fn interrupts_enabled(&self) -> bool {
            self.irq.interrupts_enabled()
        }

        fn disable_interrupts(&self) {
            self.record(Step::DisableInterrupts);
            self.irq.disable_interrupts();
        }

        fn enable_interrupts(&self) {
            self.record(Step::EnableInterrupts);
            self.irq.enable_interrupts();
        }
    }

    impl CoreSetup for SimCore {
        fn set_privileged_thread(&self) {
            self.record(Step::Privileged);
        }

        fn enable_fpu(&self) {
            self.record(Step::Fpu);
        }

        fn enable_caches(&self) {
            self.record(Step::Caches);
        }

        fn park(&self) {
            self.record(Step::Park);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::sim::{SimCore, Step};
    use super::*;
    use crate::sim::SimBus;
    use proptest::prelude::*;
    use std::sync::Mutex;
    use std::vec::Vec;

    static ORDER: Mutex<Vec<u8>> = Mutex::new(Vec::new());

    extern "C" fn first() {
        ORDER.lock().unwrap().push(1);
    }

    extern "C" fn second() {
        ORDER.lock().unwrap().push(2);
    }

    extern "C" fn third() {
        ORDER.lock().unwrap().push(3);
    }

    fn stack() -> ClearEntry {
        ClearEntry { start: 0x2001_F000, end: 0x2002_0000 }
    }

    fn image<'a>(load: &'a [LoadEntry], clear: &'a [ClearEntry]) -> BootImage<'a> {
        BootImage { stack: stack(), load, clear, preinit: &[], init: &[], fini: &[] }
    }

    #[test]
    fn validate_accepts_disjoint_tables() {
        let load = [
            LoadEntry { src: 0x0800_0100, end: 0x0800_0200, dst: 0x2000_0000 },
            LoadEntry { src: 0x0800_0200, end: 0x0800_0300, dst: 0x2000_0100 },
        ];
        let clear = [ClearEntry { start: 0x2000_1000, end: 0x2000_1080 }];
        image(&load, &clear).validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_tables() {
        let overlap = [
            LoadEntry { src: 0x0800_0100, end: 0x0800_0200, dst: 0x2000_0000 },
            LoadEntry { src: 0x0800_0200, end: 0x0800_0300, dst: 0x2000_00FC },
        ];
        assert_eq!(
            image(&overlap, &[]).validate(),
            Err(Error::InvalidConfig("load destinations overlap"))
        );

        let reversed = [ClearEntry { start: 0x2000_1000, end: 0x2000_0F00 }];
        assert_eq!(
            image(&[], &reversed).validate(),
            Err(Error::InvalidConfig("section range reversed"))
        );

        let unaligned = [LoadEntry { src: 0x0800_0100, end: 0x0800_0200, dst: 0x2000_0002 }];
        assert_eq!(
            image(&unaligned, &[]).validate(),
            Err(Error::InvalidConfig("section not word aligned"))
        );
    }

    #[test]
    fn constructors_run_in_order_skipping_nulls() {
        let list: [Option<Constructor>; 4] = [
            Some(third as Constructor),
            None,
            Some(first as Constructor),
            Some(second as Constructor),
        ];
        unsafe { run_constructors(&list) };
        assert_eq!(*ORDER.lock().unwrap(), [3, 1, 2]);
    }

    #[test]
    fn reset_configures_the_core_around_main() {
        let mem = SimBus::new();
        let cpu = SimCore::new();
        let status = unsafe { reset(CoreId::Cm4, &mem, &cpu, &image(&[], &[]), || 3) };
        assert_eq!(status, 3);
        assert_eq!(
            cpu.steps(),
            [Step::DisableInterrupts, Step::Privileged, Step::Fpu, Step::Park]
        );
        assert!(!cpu.interrupts_enabled());
    }

    #[test]
    fn main_sees_zeroed_stack() {
        let mem = SimBus::new();
        mem.load_words(stack().start, &[0xDEAD_BEEF; 16]);
        let cpu = SimCore::new();
        unsafe {
            reset(CoreId::Cm7, &mem, &cpu, &image(&[], &[]), || {
                assert_eq!(mem.words(stack().start, 16), [0; 16]);
                0
            })
        };
        assert!(cpu.steps().contains(&Step::Caches));
    }

    prop_compose! {
        fn load_table()(lens in prop::collection::vec(0u32..16, 1..6)) -> Vec<LoadEntry> {
            lens.iter()
                .enumerate()
                .map(|(i, words)| {
                    let slot = i as u32 * 0x100;
                    LoadEntry {
                        src: 0x0800_0000 + slot,
                        end: 0x0800_0000 + slot + words * 4,
                        dst: 0x2000_0000 + slot,
                    }
                })
                .collect()
        }
    }

    proptest! {
        #[test]
        fn copying_twice_equals_copying_once(
            table in load_table(),
            flash in prop::collection::vec(any::<u32>(), 0x100),
        ) {
            let mem = SimBus::new();
            mem.load_words(0x0800_0000, &flash);
            image(&table, &[]).validate().unwrap();

            copy_sections(&mem, &table);
            let once = mem.words(0x2000_0000, 0x100);
            copy_sections(&mem, &table);
            prop_assert_eq!(mem.words(0x2000_0000, 0x100), once);

            for entry in &table {
                let words = (entry.len() / 4) as usize;
                prop_assert_eq!(mem.words(entry.dst, words), mem.words(entry.src, words));
            }
        }

        #[test]
        fn stack_zeroing_stays_in_bounds(
            start_word in 0u32..64,
            words in 0u32..64,
            fill in any::<u32>(),
        ) {
            let base = 0x2001_0000;
            let region = ClearEntry { start: base + start_word * 4, end: base + (start_word + words) * 4 };
            let mem = SimBus::new();
            mem.load_words(base, &[fill; 160]);
            mem.clear_log();

            zero_stack(&mem, region);

            for (i, word) in mem.words(base, 160).into_iter().enumerate() {
                let addr = base + i as u32 * 4;
                if addr >= region.start && addr < region.end {
                    prop_assert_eq!(word, 0);
                } else {
                    prop_assert_eq!(word, fill);
                }
            }
            prop_assert!(mem.writes().iter().all(|&(addr, _)| addr >= region.start && addr < region.end));
        }
    }
}
