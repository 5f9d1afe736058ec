//! Device polling and register batching for field buses using [Tokio](https://docs.rs/tokio).
//!
//! A [`Project`](model::Project) describes devices and the items (registers or bits) they
//! expose. The [`poll`] scheduler sweeps the devices on a fixed interval, and each device's
//! backend turns its items into as few bus transactions as possible.
//!
//! # Features
//! * Items at adjacent addresses are batched into single range requests, split at the
//!   protocol limits
//! * Writes are debounced, coalesced per item, and always sent before reads
//! * Persistent bus errors are logged once, with a single message on recovery
//! * USB serial adapters are rediscovered by name after being unplugged
//! * Panic-free RTU framing with CRC validation
//!
//! # Supported functions
//! * Read Coils
//! * Read Discrete Inputs
//! * Read Holding Registers
//! * Read Input Registers
//! * Write Single Coil
//! * Write Single Register
//! * Write Multiple Coils
//! * Write Multiple Registers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use buspoll::config::{DeviceConfig, ItemConfig, ProjectConfig, Settings};
//! use buspoll::model::{ItemId, Project};
//! use buspoll::modbus::ModbusBackend;
//! use buspoll::{BackendKind, RegisterKind, Value};
//!
//! #[tokio::main(flavor = "multi_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProjectConfig::default().with_device(
//!         DeviceConfig::new(1, "boiler", 3)
//!             .with_backend(BackendKind::Modbus)
//!             .with_item(ItemConfig::new(1, "temperature", RegisterKind::InputRegister, 0))
//!             .with_item(ItemConfig::new(2, "pump", RegisterKind::Coil, 4)),
//!     );
//!     let project = Arc::new(Project::from_config(&config)?);
//!     let mut changes = project.subscribe();
//!
//!     let handle = buspoll::poll::spawn(
//!         &Settings::default(),
//!         project.clone(),
//!         vec![ModbusBackend::new().into()],
//!     );
//!     handle.write(ItemId(2), Value::Bool(true), 0).await?;
//!
//!     while let Ok(change) = changes.recv().await {
//!         println!("{} = {:?}", change.item, change.value);
//!     }
//!     Ok(())
//! }
//! ```

pub mod capability;
pub mod config;
pub mod model;
pub mod modbus;
pub mod pack;
pub mod poll;
pub mod serial;
/// Deduplicated error reporting
pub mod status;
/// Immutable bus transactions
pub mod transaction;

mod channel;
mod constants;
mod decode;
mod error;
mod exception;
#[cfg(test)]
mod mock;
mod types;

pub use crate::capability::{Backend, BackendKind};
pub use crate::decode::*;
pub use crate::error::*;
pub use crate::exception::*;
pub use crate::types::*;
