//! A Modbus master (client) library built on [Tokio](https://docs.rs/tokio)
//! and Rust's `async/await` syntax.
//!
//! # Features
//!
//! * Panic-free parsing
//! * RTU, ASCII, and TCP (MBAP) framing behind one channel API
//! * Single-in-flight request pipeline with inter-frame (t3.5) pacing,
//!   a response-timeout watchdog, and configurable retries
//! * Broadcast requests with a turnaround pause instead of a response wait
//! * Automatic reconnect with a bounded open-retry budget
//! * Protocol decode logging at the application, frame, and physical layers
//!
//! # Supported functions
//!
//! * Read Coils / Discrete Inputs / Holding Registers / Input Registers
//! * Write Single Coil / Single Register
//! * Write Multiple Coils / Multiple Registers
//! * Read/Write Multiple Registers
//!
//! # Example
//!
//! A client that reads a few coils over Modbus RTU:
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use modbus_master::*;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut channel = spawn_serial_client_task(
//!         "/dev/ttyUSB0",
//!         SerialSettings::default(),
//!         SerialMode::Rtu,
//!         16,
//!         OpenRetry::default(),
//!         DecodeLevel::nothing(),
//!         None,
//!     );
//!
//!     channel.enable().await?;
//!     channel.set_response_timeout(Duration::from_millis(1000)).await?;
//!
//!     let coils = channel
//!         .read_coils(UnitId::new(1), AddressRange::try_from(10, 3)?)
//!         .await?;
//!     for coil in coils {
//!         println!("index: {} value: {}", coil.index, coil.value);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![deny(
    non_camel_case_types,
    non_shorthand_field_patterns,
    non_snake_case,
    non_upper_case_globals,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_import_braces
)]
#![forbid(unsafe_code, while_true, bare_trait_objects)]
#![warn(missing_docs)]

/// client channel API: spawn functions, the `Channel` handle, and the
/// request payload types
pub mod client;
/// public constant values related to the Modbus specification
pub mod constants;

mod common;
mod decode;
mod error;
mod exception;
mod retry;
mod serial;
mod tcp;
mod types;

#[doc(hidden)]
pub mod mock;

pub use crate::client::*;
pub use crate::decode::*;
pub use crate::error::*;
pub use crate::exception::*;
pub use crate::retry::*;
pub use crate::serial::{DataBits, FlowControl, Parity, SerialMode, SerialSettings, StopBits};
pub use crate::types::{AddressRange, BitIterator, Indexed, RegisterIterator, UnitId};
