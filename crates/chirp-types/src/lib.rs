//! Shared model, wire and API types for the chirp relay.

pub mod api;
pub mod events;
pub mod models;
