//! Reset-path integration tests
//!
//! Drives the whole reset handler against the simulated register file and
//! a recording CPU, the way core A and core B run it on the board.
//!
//! Run with: cargo test -p flight-computer --test boot_scenarios

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::arithmetic_side_effects)]

use std::sync::Mutex;

use flight_computer::boot::BOOT_SEQUENCE_STEPS;
use platform::boot::sim::{SimCore, Step};
use platform::boot::{reset, BootImage, ClearEntry, Constructor, LoadEntry};
use platform::rpc::CoreId;
use platform::sim::SimBus;

static ORDER: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

unsafe extern "C" fn preinit_sentinel() {
    ORDER.lock().unwrap().push("preinit");
}

unsafe extern "C" fn init_sentinel() {
    ORDER.lock().unwrap().push("init");
}

unsafe extern "C" fn fini_sentinel() {
    ORDER.lock().unwrap().push("fini");
}

const FLASH_SRC: u32 = 0x0800_0100;
const FLASH_END: u32 = 0x0800_0200;
const RAM_DST: u32 = 0x2000_0000;
const BSS: ClearEntry = ClearEntry {
    start: 0x2000_1000,
    end: 0x2000_1080,
};
const STACK: ClearEntry = ClearEntry {
    start: 0x2000_8000,
    end: 0x2000_8100,
};

/// Cold boot of core A: data copied, bss and stack zeroed, constructors in
/// order around `main`, and the core parked at the end.
#[test]
fn test_cold_boot_of_core_a() {
    let mem = SimBus::new();
    let flash: Vec<u32> = (0..64).map(|i| 0xC0DE_0000 | i).collect();
    mem.load_words(FLASH_SRC, &flash);
    mem.load_words(BSS.start, &[0xDEAD_BEEF; 32]);
    mem.load_words(STACK.start, &[0xFFFF_FFFF; 64]);
    mem.load_words(STACK.end, &[0x5A5A_5A5A]);

    let load = [LoadEntry {
        src: FLASH_SRC,
        end: FLASH_END,
        dst: RAM_DST,
    }];
    let clear = [BSS];
    let preinit = [Some(preinit_sentinel as Constructor)];
    let init = [None, Some(init_sentinel as Constructor)];
    let fini = [Some(fini_sentinel as Constructor)];
    let image = BootImage {
        stack: STACK,
        load: &load,
        clear: &clear,
        preinit: &preinit,
        init: &init,
        fini: &fini,
    };
    image.validate().unwrap();

    let cpu = SimCore::new();
    let main = || {
        ORDER.lock().unwrap().push("main");
        0
    };
    // SAFETY: simulated memory and sentinel constructors only.
    let status = unsafe { reset(CoreId::Cm7, &mem, &cpu, &image, main) };

    assert_eq!(status, 0);
    assert_eq!(mem.words(RAM_DST, 64), flash);
    assert!(mem.words(BSS.start, 32).iter().all(|&w| w == 0));
    assert!(mem.words(STACK.start, 64).iter().all(|&w| w == 0));
    assert_eq!(mem.peek(STACK.end), 0x5A5A_5A5A, "zeroing stays below kstack_end");
    assert_eq!(*ORDER.lock().unwrap(), ["preinit", "init", "main", "fini"]);

    let steps = cpu.steps();
    assert_eq!(steps.first(), Some(&Step::DisableInterrupts));
    assert_eq!(steps.last(), Some(&Step::Park));
    assert!(steps.contains(&Step::Caches));
    assert!(!steps.contains(&Step::EnableInterrupts));
}

/// A malformed table is caught before anything is copied.
#[test]
fn test_overlapping_load_destinations_are_rejected() {
    let load = [
        LoadEntry {
            src: FLASH_SRC,
            end: FLASH_END,
            dst: RAM_DST,
        },
        LoadEntry {
            src: FLASH_END,
            end: FLASH_END + 0x40,
            dst: RAM_DST + 0x80,
        },
    ];
    let image = BootImage {
        stack: STACK,
        load: &load,
        clear: &[],
        preinit: &[],
        init: &[],
        fini: &[],
    };
    assert!(image.validate().is_err());
}

#[test]
fn test_documented_sequence_matches_reset_path() {
    let stack = BOOT_SEQUENCE_STEPS.iter().position(|s| s.starts_with("2. Stack"));
    let main = BOOT_SEQUENCE_STEPS.iter().position(|s| s.ends_with("main"));
    assert!(stack.unwrap() < main.unwrap());
}
