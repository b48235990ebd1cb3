#![cfg_attr(docsrs, feature(doc_cfg))]
//! # teslabms_lib
//!
//! This crate talks to a daisy chain of Tesla battery monitoring modules over
//! their shared half-duplex serial bus. It assigns bus addresses, reads cell
//! voltages and temperatures, and switches the cell balancing resistors.
//!
//! The bus is strictly request/response without transaction ids, so all
//! access goes through one [`bus::BusClient`] that owns the transport.
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `teslabms` command-line tool and pulls in `serialport` and `serde`.
//! - `serialport`: Enables [`serialport::SerialTransport`] using the `serialport` crate.
//! - `serde`: Enables `serde` support for the module record and pack aggregate.

/// Contains error types for the library.
mod error;
/// Frame codec, register map and ADC conversions.
pub mod protocol;

pub mod balance;
pub mod bus;
pub mod driver;
pub mod module;
pub mod pack;
pub mod transport;

pub use error::{DiscoveryStage, Error, Result};

/// Serial port transport for the module bus.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;

#[cfg(test)]
mod mock;
