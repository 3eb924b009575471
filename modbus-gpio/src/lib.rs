//! Expose the general purpose I/O pins of a single-board computer as Modbus
//! coils and discrete inputs over TCP.
//!
//! Only pins that were configured and then explicitly allowed can be reached
//! by a remote client. Configuring a pin never grants access by itself.
//!
//! # Layers
//!
//! * [`backend`] - capability to program and drive pins, with a Raspberry Pi
//!   implementation (feature `rpi`) and an in-memory simulation
//! * [`registry`] - the per-pin configuration and access-control table
//! * [`mapper`] - validation of Modbus requests and their translation into
//!   registry operations under a reader/writer lock
//! * [`server`] - Modbus/TCP server built on `tokio-modbus`
//!
//! # Example
//!
//! ```no_run
//! use modbus_gpio::backend::simulated::SimulatedBackend;
//! use modbus_gpio::mapper::share;
//! use modbus_gpio::pin::PullMode;
//! use modbus_gpio::registry::PinRegistry;
//! use modbus_gpio::server::{spawn_tcp_server_task, ServerConfig};
//!
//! #[tokio::main(flavor = "multi_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = PinRegistry::new(SimulatedBackend::new());
//!     registry.open()?;
//!
//!     registry.set_pin_as_coil(17)?;
//!     registry.allow(17)?;
//!     registry.set_pin_as_discrete_input(6, PullMode::PullUp)?;
//!     registry.allow(6)?;
//!
//!     let _server = spawn_tcp_server_task(ServerConfig::default(), share(registry)).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     Ok(())
//! }
//! ```

/// Driver capability and its implementations
pub mod backend;
/// Constants and defaults
pub mod constants;
/// Error types
pub mod error;
/// Modbus request validation and translation
pub mod mapper;
/// Pin configuration types
pub mod pin;
/// Pin configuration and access-control table
pub mod registry;
/// Modbus/TCP server
pub mod server;

pub use crate::error::{ConfigError, DriverError, ModbusError, ReadError, WriteError};
