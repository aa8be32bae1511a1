//! Board-support layer for the Titan flight computer (STM32H745, dual
//! Cortex-M7/M4).
//!
//! Every driver programs hardware through the [`Mmio`] register-bus trait,
//! so the whole crate runs unchanged against the host register model in
//! [`sim`] (feature `simulator`).
//!
//! # Layers
//!
//! ```text
//! Application (flight-computer crate: system manager, sensors, sinks)
//!         ↓
//! Peripheral drivers (spi, i2c, usart) over DmaEngine streams
//!         ↓
//! Low-level helpers (gpio, rtc, watchdog, pwm, nvic, mpu, critical)
//!         ↓
//! Register bus (mmio::VolatileMmio on target, sim::SimBus on host)
//! ```
//!
//! The reset pipeline ([`boot`]) and the inter-core call mailbox ([`rpc`])
//! sit beside the drivers and are driven by the firmware's per-core entry
//! points.
//!
//! # Features
//!
//! - `std`: build against the standard library (host tests)
//! - `simulator`: host register model ([`sim`]) and core models
//! - `defmt`: `defmt::Format` derives and log forwarding
//!
//! # Example
//!
//! ```no_run
//! use platform::dma::{Controller, DmaEngine, StreamId};
//! use platform::mmio::VolatileMmio;
//!
//! static DMA: DmaEngine<VolatileMmio> = DmaEngine::new(unsafe { VolatileMmio::new() });
//!
//! fn bring_up() -> platform::Result<()> {
//!     DMA.init();
//!     let first = StreamId::new(Controller::Dma1, 0)?;
//!     assert_eq!(DMA.free_stream(Controller::Dma1), Some(first));
//!     Ok(())
//! }
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer defmt over println! in lib code
// Pedantic lints suppressed for this hardware crate:
#![allow(clippy::doc_markdown)] // hex addresses and register names in doc comments
#![allow(clippy::must_use_candidate)] // hardware accessors: callers decide
#![allow(clippy::match_same_arms)] // register tables read better row by row
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

// Must come first: the logging macros are used by every module below.
#[macro_use]
mod fmt;

pub mod boot;
pub mod buffer;
pub mod critical;
pub mod dma;
pub mod error;
pub mod gpio;
pub mod i2c;
pub mod mmio;
pub mod mpu;
pub mod nvic;
pub mod peripheral;
pub mod pwm;
pub mod rcc;
pub mod rpc;
pub mod rtc;
pub mod spi;
pub mod transfer;
pub mod usart;
pub mod watchdog;

#[cfg(any(test, feature = "simulator"))]
pub mod sim;

pub use buffer::{DmaBuffer, Region};
pub use dma::{DmaConfig, DmaEngine, StreamId};
pub use error::{Error, ErrorFlag, Result};
pub use gpio::{Input, Output, PinId, Port};
pub use mmio::{Mmio, VolatileMmio};
pub use peripheral::{PeriphDmaConfig, SpiMode};
pub use rpc::{CoreId, CoreOps, Mailbox};

pub use i2c::{I2c, I2cConfig, I2cDevice};
pub use spi::{Spi, SpiConfig, SpiDevice};
pub use usart::{Usart, UsartConfig};
