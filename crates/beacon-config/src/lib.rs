//! KDL configuration parsing for Beacon.
//!
//! This crate handles parsing of the service configuration (`beacon.kdl`):
//! - Notification channel names
//! - Reconnect backoff
//! - Console section rendering
//! - Server bind address

pub mod error;
pub mod hub;
mod nodes;

pub use error::{ConfigError, ConfigResult};
pub use hub::{
    ConsoleConfig, HubConfig, NotificationConfig, ReconnectConfig, ServerConfig, load_hub_config,
    parse_hub_config,
};
