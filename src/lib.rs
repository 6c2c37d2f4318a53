//! Script-driven control of DPS-series bench power supply modules.
//!
//! A script is compiled once by [`script::compile`] into a [`script::Program`], which the
//! [`engine::Engine`] then steps through, one operation per poll cycle. Every cycle refreshes the
//! module telemetry through the [`device::Device`] proxy and hands a sample to the
//! [`recorder::Recorder`], which decides what ends up in the CSV log.

#[macro_use]
extern crate error_chain;

pub mod errors;
pub mod constants;
pub mod data;
pub mod protocol;
pub mod transport;
pub mod device;
pub mod script;
pub mod recorder;
pub mod call;
pub mod engine;
mod num_utils;

#[cfg(test)]
mod testing;
