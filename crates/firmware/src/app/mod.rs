//! Application layer of core A.

pub mod data_collector;
pub mod data_logger;
pub mod error_handler;
pub mod launch_sequence;
pub mod system_manager;
pub mod telemetry;

pub use data_collector::DataCollector;
pub use data_logger::DataLogger;
pub use error_handler::{ErrorHandler, ErrorRecord, Severity};
pub use launch_sequence::{LaunchSequence, Phase};
pub use system_manager::{BoardErrors, Readiness, Resources, SystemManager};
pub use telemetry::Telemetry;
