//! Titan flight computer firmware.
//!
//! Application layer and per-core images for the STM32H745 (Cortex-M7 core
//! A, Cortex-M4 core B), built on the `platform` drivers.
//!
//! # Architecture
//!
//! ```text
//! titan-cm7 / titan-cm4 (per-core entry, vectors, linker scripts)
//!         ↓
//! app (system manager, collector, logger, telemetry, launch sequence)
//!         ↓
//! sensors (temperature sensor on SPI1)
//!         ↓
//! platform (DMA engine, SPI/I²C/USART, RPC, boot, MMIO)
//! ```
//!
//! # Features
//!
//! - `hardware` - Build the two core images for `thumbv7em-none-eabihf`
//! - `std` - Enable the standard library (host testing)
//!
//! ```bash
//! cargo build --release --target thumbv7em-none-eabihf --features hardware
//! ```

#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
// Upgrade relevant warns to deny; keep pedantic as warn (too noisy for firmware)
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::await_holding_lock)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::print_stdout)]
#![warn(clippy::dbg_macro)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::similar_names)]

pub mod app;
pub mod boot;
pub mod config;
pub mod exception_handlers;
pub mod sensors;
pub mod vectors;

#[cfg(feature = "hardware")]
pub mod cpu;
#[cfg(feature = "hardware")]
pub mod ipc;

pub use app::{ErrorHandler, LaunchSequence, SystemManager};
pub use sensors::TempSensor;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod test_support {
    //! Simulated board for the unit tests.

    use platform::dma::{self, Controller, DmaEngine, StreamId};
    use platform::sim::SimBus;
    use platform::spi::{Spi, SpiInstance};
    use platform::usart::{Usart, UsartInstance};

    pub type Sim = SimBus;

    /// Initialised DMA engine on a fresh register file.
    pub fn leak_dma() -> &'static DmaEngine<Sim> {
        let dma = Box::leak(Box::new(DmaEngine::new(SimBus::new())));
        dma.init();
        dma
    }

    pub fn leak_spi(dma: &'static DmaEngine<Sim>, instance: SpiInstance) -> &'static Spi<'static, Sim> {
        Box::leak(Box::new(Spi::new(dma, instance)))
    }

    pub fn leak_usart(
        dma: &'static DmaEngine<Sim>,
        instance: UsartInstance,
    ) -> &'static Usart<'static, Sim> {
        Box::leak(Box::new(Usart::new(dma, instance)))
    }

    /// Raise `flags` on DMA1 stream `index` and run its interrupt.
    pub fn complete(dma: &DmaEngine<Sim>, index: u8, flags: u32) {
        let stream = StreamId::new(Controller::Dma1, index).unwrap();
        dma::raise_flags(dma.bus(), stream, flags);
        dma.on_interrupt(stream);
    }
}
