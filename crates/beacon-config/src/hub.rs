//! Service configuration parsing.

use chrono::{FixedOffset, Offset, Utc};
use kdl::KdlDocument;
use std::path::Path;
use std::time::Duration;

use crate::nodes::{f64_setting, first_string_arg, invalid, string_setting, u64_setting};
use crate::{ConfigError, ConfigResult};

/// Top-level configuration of the distribution service.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Database URL; usually overridden by `DATABASE_URL`.
    pub database_url: Option<String>,
    pub notifications: NotificationConfig,
    pub reconnect: ReconnectConfig,
    pub console: ConsoleConfig,
    pub server: ServerConfig,
}

/// Names of the store notification channels.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub jobs_channel: String,
    pub console_channel: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            jobs_channel: "beacon_jobs".to_string(),
            console_channel: "beacon_console".to_string(),
        }
    }
}

/// Exponential backoff applied between notification reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Each delay is randomly stretched or shrunk by up to this fraction.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

/// Console section assembly settings.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Lines kept per section before older ones are dropped.
    pub max_section_lines: usize,
    /// Section markers must start within this many leading characters.
    pub marker_window: usize,
    /// Offset used when displaying line timestamps.
    pub display_offset: FixedOffset,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            max_section_lines: 500,
            marker_window: 10,
            display_offset: Utc.fix(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Parse the service configuration from KDL text.
///
/// Every setting is optional; anything left out keeps its default.
pub fn parse_hub_config(kdl: &str) -> ConfigResult<HubConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = HubConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "database" => {
                config.database_url = Some(
                    first_string_arg(node)
                        .ok_or_else(|| ConfigError::MissingField("database url".to_string()))?,
                );
            }
            "notifications" => {
                let n = &mut config.notifications;
                if let Some(channel) = string_setting(node, "jobs-channel")? {
                    n.jobs_channel = channel;
                }
                if let Some(channel) = string_setting(node, "console-channel")? {
                    n.console_channel = channel;
                }
                if n.jobs_channel == n.console_channel {
                    return Err(invalid(
                        "notifications",
                        "jobs and console channels must differ",
                    ));
                }
            }
            "reconnect" => {
                let r = &mut config.reconnect;
                if let Some(ms) = u64_setting(node, "initial-delay-ms")? {
                    if ms == 0 {
                        return Err(invalid("reconnect initial-delay-ms", "must be positive"));
                    }
                    r.initial_delay = Duration::from_millis(ms);
                }
                if let Some(ms) = u64_setting(node, "max-delay-ms")? {
                    r.max_delay = Duration::from_millis(ms);
                }
                if let Some(multiplier) = f64_setting(node, "multiplier")? {
                    if multiplier < 1.0 {
                        return Err(invalid("reconnect multiplier", "must be at least 1"));
                    }
                    r.multiplier = multiplier;
                }
                if let Some(jitter) = f64_setting(node, "jitter")? {
                    if !(0.0..=1.0).contains(&jitter) {
                        return Err(invalid("reconnect jitter", "must be between 0 and 1"));
                    }
                    r.jitter = jitter;
                }
                if r.max_delay < r.initial_delay {
                    return Err(invalid(
                        "reconnect max-delay-ms",
                        "must not be smaller than initial-delay-ms",
                    ));
                }
            }
            "console" => {
                let c = &mut config.console;
                if let Some(lines) = u64_setting(node, "max-section-lines")? {
                    if lines == 0 {
                        return Err(invalid("console max-section-lines", "must be positive"));
                    }
                    c.max_section_lines = lines as usize;
                }
                if let Some(window) = u64_setting(node, "marker-window")? {
                    c.marker_window = window as usize;
                }
                if let Some(offset) = string_setting(node, "display-offset")? {
                    c.display_offset = offset.parse().map_err(|_| {
                        invalid(
                            "console display-offset",
                            format!("expected an offset like +02:00, got {offset}"),
                        )
                    })?;
                }
            }
            "server" => {
                if let Some(bind) = string_setting(node, "bind")? {
                    config.server.bind = bind;
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

/// Read and parse a configuration file.
pub fn load_hub_config(path: impl AsRef<Path>) -> ConfigResult<HubConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_hub_config(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_hub_config("").unwrap();
        assert_eq!(config.notifications.jobs_channel, "beacon_jobs");
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(3));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(60));
        assert_eq!(config.console.max_section_lines, 500);
        assert_eq!(config.console.marker_window, 10);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            database "postgres://beacon@localhost/ci"

            notifications {
                jobs-channel "job_events"
                console-channel "console_events"
            }

            reconnect initial-delay-ms=500 max-delay-ms=10000 multiplier=1.5 jitter=0.1

            console max-section-lines=200 display-offset="+02:00"

            server bind="127.0.0.1:4000"
        "#;

        let config = parse_hub_config(kdl).unwrap();
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://beacon@localhost/ci")
        );
        assert_eq!(config.notifications.jobs_channel, "job_events");
        assert_eq!(config.notifications.console_channel, "console_events");
        assert_eq!(config.reconnect.initial_delay, Duration::from_millis(500));
        assert_eq!(config.reconnect.max_delay, Duration::from_millis(10_000));
        assert_eq!(config.reconnect.multiplier, 1.5);
        assert_eq!(config.reconnect.jitter, 0.1);
        assert_eq!(config.console.max_section_lines, 200);
        assert_eq!(config.console.display_offset.local_minus_utc(), 7200);
        assert_eq!(config.server.bind, "127.0.0.1:4000");
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let err = parse_hub_config("reconnect initial-delay-ms=5000 max-delay-ms=100").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_rejects_zero_delay_and_wild_jitter() {
        let err = parse_hub_config("reconnect initial-delay-ms=0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert!(parse_hub_config("reconnect jitter=1.5").is_err());
    }

    #[test]
    fn test_rejects_shared_channel() {
        let kdl = r#"
            notifications {
                jobs-channel "events"
                console-channel "events"
            }
        "#;
        assert!(parse_hub_config(kdl).is_err());
    }

    #[test]
    fn test_rejects_bad_offset() {
        let err = parse_hub_config(r#"console display-offset="soon""#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
