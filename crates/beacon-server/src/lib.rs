//! WebSocket adapter for Beacon.
//!
//! Exposes the distribution hub's subscriptions over a JSON WebSocket
//! protocol, plus health endpoints.

pub mod principal;
pub mod routes;
pub mod state;
pub mod ws;

pub use state::AppState;
