#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
//! # canbroker
//!
//! ## Overview
//! This crate lets several independently written modules of one node share
//! the node's bxCAN controllers without knowing about each other.
//!
//! It is made of three layers:
//!
//! - [`registry`]: a table of every peripheral of the node, mapping it to the
//!   hardware handle the target HAL registered and tracking a single owner
//! - [`bus`]: a transport over one controller; bit timing from a verified
//!   table, non-blocking mailbox submission, filter banks and health queries
//! - [`manager`]: arbitration of the two controllers between consumers,
//!   fan-out of inbound frames to subscribers and a bounded outbound queue
//!   drained by a periodic timer
//!
//! Platform specifics stay behind the [`canbroker_core`](crate::core)
//! traits. A target HAL implements [`Registers`](crate::core::Registers) and
//! [`Dependencies`](crate::core::Dependencies) for every controller it owns,
//! either directly or through [`reg::Mmio`].
//!
//! ## Sharing
//!
//! Tables touched from both tasks and interrupt handlers are guarded by the
//! global interrupt mask, see [`mask`]. Every entry point takes `&self`, so a
//! single instance can be placed in a `static` or handed out by reference.
//! The `critical-section` implementation is picked by the final binary.
//!
//! ## Logging
//!
//! With the `defmt` feature enabled, lease conflicts, start failures and
//! dropped frames are logged through `defmt`.
//!
//! ## Example
//!
//! ```no_run
//! use canbroker::bus::Bus;
//! use canbroker::config::{Baud, BusConfig};
//! use canbroker::manager::{CanManager, Handler, PeriodicTimer};
//! use canbroker::message::CanFrame;
//! use canbroker::reg::Mmio;
//! use canbroker::registry::{DeviceRegistry, Handle, PeripheralId};
//! use canbroker::core::fugit::HertzU32;
//! use canbroker::Error;
//! use std::ptr::NonNull;
//!
//! struct Tim6;
//!
//! impl PeriodicTimer for Tim6 {
//!     fn peripheral(&self) -> PeripheralId {
//!         PeripheralId::TIMER_6
//!     }
//!
//!     fn start(&self, _rate: HertzU32) -> Result<(), Error> {
//!         // Program the timer and unmask its interrupt here.
//!         Ok(())
//!     }
//! }
//!
//! fn on_engine_status(id: u32, data: &[u8]) {
//!     let _ = (id, data);
//! }
//!
//! static REGISTRY: DeviceRegistry = DeviceRegistry::new();
//!
//! let can1_base = NonNull::new(0x4000_6400 as *mut ()).ok_or(Error::NullHandle)?;
//! let can2_base = NonNull::new(0x4000_6800 as *mut ()).ok_or(Error::NullHandle)?;
//!
//! REGISTRY.set_handle(PeripheralId::CAN_1, Handle::new(can1_base.as_ptr())?)?;
//! REGISTRY.set_handle(PeripheralId::CAN_2, Handle::new(can2_base.as_ptr())?)?;
//!
//! // Safety: both register blocks are owned by this code from here on, and
//! // the filter registers always live in the first controller's block.
//! let (can1, can2) = unsafe {
//!     (
//!         Mmio::new(can1_base, can1_base, HertzU32::MHz(42)),
//!         Mmio::new(can2_base, can1_base, HertzU32::MHz(42)),
//!     )
//! };
//! let manager = CanManager::new(&REGISTRY, can1, can2, Tim6);
//!
//! let config = BusConfig::new(Baud::K500);
//! manager.ask_resource(Bus::Can1, config)?;
//! manager.subscribe(Bus::Can1, 0x011, Handler::Fn(on_engine_status))?;
//! manager.start_resource(Bus::Can1)?;
//! manager.send_message(Bus::Can1, &CanFrame::new_standard(0x120, &[1, 2, 3])?)?;
//! # Ok::<(), Error>(())
//! ```

#[macro_use]
mod fmt;

pub mod bus;
pub mod config;
pub mod error;
pub mod filter;
pub mod interrupt;
pub mod manager;
pub mod mask;
pub mod message;
pub mod reg;
pub mod registry;
pub mod ring;
pub mod rx_fifo;
pub mod tx_buffers;

pub use canbroker_core as core;
pub use embedded_can;
pub use error::Error;
pub use generic_array;
