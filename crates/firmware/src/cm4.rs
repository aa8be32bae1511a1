//! Titan flight computer, core B (Cortex-M4) image.
//!
//! Idles in WFI with its send-event interrupt armed, so core A can run
//! core-pinned functions here.

#![no_std]
#![no_main]

use defmt_rtt as _;
use panic_probe as _;

use platform::rpc::CoreId;
use platform::VolatileMmio;

flight_computer::core_entry!(Cm4, main);

fn main() -> i32 {
    // SAFETY: only NVIC registers are addressed.
    let bus = unsafe { VolatileMmio::new() };
    if let Err(error) = flight_computer::ipc::init(&bus, CoreId::Cm4) {
        defmt::error!("cm4: rpc init failed: {}", error);
        return 1;
    }
    // SAFETY: the mailbox handler is the only one enabled.
    unsafe { cortex_m::interrupt::enable() };
    defmt::info!("cm4: idle");
    loop {
        cortex_m::asm::wfi();
    }
}
