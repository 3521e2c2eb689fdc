//! Device model, dispatcher and connection manager for starwire.
//!
//! - [`Manager`]: one connection to one device server, owning its devices
//! - [`Dispatcher`]: applies inbound commands to the device model
//! - [`ServerProcess`]: a locally spawned server
//! - [`LabelRegistry`]: application-wide unique device labels
//! - [`config`]: settings and directories

pub mod config;

mod dispatch;
mod error;
mod event;
mod labels;
mod manager;
mod server;

#[cfg(test)]
mod tests;

pub use dispatch::{DEFAULT_TIMESTAMP_FORMAT, Dispatcher};
pub use error::{DispatchError, Error, Result};
pub use event::{ConnectionState, EventReceiver, EventSender, ManagerEvent, event_channel};
pub use labels::{LabelRegistry, NamingAuthority};
pub use manager::{CommandSender, ConnectionMode, Manager};
pub use server::{ServerProcess, server_args};

pub use starwire_types::*;
