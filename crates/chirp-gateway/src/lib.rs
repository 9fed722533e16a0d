//! Presence-and-delivery relay: online registry, conversation resolution,
//! delivery status transitions and the WebSocket connection loop.

pub mod connection;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod presence;
pub mod resolver;
pub mod store;

pub use dispatcher::Dispatcher;
pub use error::RelayError;
pub use presence::{ConnHandle, Presence};
pub use store::Store;
