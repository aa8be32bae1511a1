//! The inter-core mailbox and its send-event handlers.
//!
//! The mailbox lives in `.shared`, which both linker scripts place at the
//! start of SRAM4 and which core A marks non-cacheable before its caches
//! come on. Only core A's startup clears it.

use platform::rpc::{self, CoreId, Mailbox};
use platform::{Mmio, Result};

/// Mailbox shared by both cores.
#[link_section = ".shared"]
pub static MAILBOX: Mailbox = Mailbox::new();

/// Arm this core's send-event interrupt. Pending calls from before the
/// interrupt was enabled are serviced immediately.
pub fn init(bus: &impl Mmio, core: CoreId) -> Result<()> {
    rpc::init(bus, core)?;
    if MAILBOX.service(core) {
        defmt::debug!("ipc: serviced a call queued before init");
    }
    Ok(())
}

/// Core A's event: raised by core B's SEV.
#[no_mangle]
#[allow(non_snake_case)]
extern "C" fn CM4_SEV_IT() {
    MAILBOX.service(CoreId::Cm7);
}

/// Core B's event: raised by core A's SEV.
#[no_mangle]
#[allow(non_snake_case)]
extern "C" fn CM7_SEV_IT() {
    MAILBOX.service(CoreId::Cm4);
}
