//! Sensor drivers.

pub mod temp_sensor;

pub use temp_sensor::TempSensor;
