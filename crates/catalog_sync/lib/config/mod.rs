use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::sources::XtreamCredentials;
use crate::sync_service::write_policy::{
    DeviceClass, DeviceClassProvider, FixedDeviceClass, SystemMemoryDeviceClass,
};

pub const DEFAULT_DB_PATH: &str = "catalog.sqlite3";
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 6 * 60 * 60;
pub const DEFAULT_PLAYBACK_THROTTLE_MS: u64 = 2000;
pub const DEFAULT_XTREAM_RPS: u32 = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },

    #[error("{name} is set but {missing} is not")]
    Incomplete {
        name: &'static str,
        missing: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceClassSetting {
    /// Probe the host memory on every query.
    #[default]
    Auto,
    Fixed(DeviceClass),
}

impl FromStr for DeviceClassSetting {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.trim().eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        raw.parse().map(Self::Fixed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XtreamSettings {
    pub credentials: XtreamCredentials,
    pub requests_per_second: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSettings {
    pub bridge_url: String,
    pub chat_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: String,
    /// Present only when base url, username and password are all set.
    pub xtream: Option<XtreamSettings>,
    /// Present only when the bridge url and at least one chat id are set.
    pub chat: Option<ChatSettings>,
    pub device_class: DeviceClassSetting,
    pub sync_interval: Duration,
    pub playback_throttle: Duration,
    pub account_label: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let xtream = match (
            var("XTREAM_BASE_URL"),
            var("XTREAM_USERNAME"),
            var("XTREAM_PASSWORD"),
        ) {
            (Some(base_url), Some(username), Some(password)) => Some(XtreamSettings {
                credentials: XtreamCredentials {
                    base_url: base_url.trim_end_matches('/').to_string(),
                    username,
                    password,
                },
                requests_per_second: parse_or("XTREAM_RPS", var("XTREAM_RPS"), DEFAULT_XTREAM_RPS)?,
            }),
            (None, None, None) => None,
            _ => return Err(incomplete_xtream(&var)),
        };
        if xtream
            .as_ref()
            .is_some_and(|settings| settings.requests_per_second == 0)
        {
            return Err(ConfigError::Invalid {
                name: "XTREAM_RPS",
                message: "must be > 0".to_string(),
            });
        }

        let chat = match (var("CHAT_BRIDGE_URL"), var("CHAT_IDS")) {
            (Some(bridge_url), Some(raw_ids)) => Some(ChatSettings {
                bridge_url: bridge_url.trim_end_matches('/').to_string(),
                chat_ids: parse_chat_ids(&raw_ids)?,
            }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::Incomplete {
                    name: "CHAT_BRIDGE_URL",
                    missing: "CHAT_IDS",
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::Incomplete {
                    name: "CHAT_IDS",
                    missing: "CHAT_BRIDGE_URL",
                })
            }
        };

        let device_class = match var("CATALOG_DEVICE_CLASS") {
            Some(raw) => raw.parse().map_err(|message| ConfigError::Invalid {
                name: "CATALOG_DEVICE_CLASS",
                message,
            })?,
            None => DeviceClassSetting::Auto,
        };

        Ok(Self {
            db_path: var("CATALOG_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            xtream,
            chat,
            device_class,
            sync_interval: Duration::from_secs(parse_or(
                "SYNC_INTERVAL_SECS",
                var("SYNC_INTERVAL_SECS"),
                DEFAULT_SYNC_INTERVAL_SECS,
            )?),
            playback_throttle: Duration::from_millis(parse_or(
                "PLAYBACK_THROTTLE_MS",
                var("PLAYBACK_THROTTLE_MS"),
                DEFAULT_PLAYBACK_THROTTLE_MS,
            )?),
            account_label: var("SYNC_ACCOUNT_LABEL"),
        })
    }

    pub fn has_sources(&self) -> bool {
        self.xtream.is_some() || self.chat.is_some()
    }

    pub fn device_class_provider(&self) -> Arc<dyn DeviceClassProvider> {
        match self.device_class {
            DeviceClassSetting::Auto => Arc::new(SystemMemoryDeviceClass::default()),
            DeviceClassSetting::Fixed(class) => Arc::new(FixedDeviceClass(class)),
        }
    }
}

fn incomplete_xtream(var: &impl Fn(&str) -> Option<String>) -> ConfigError {
    let missing = ["XTREAM_BASE_URL", "XTREAM_USERNAME", "XTREAM_PASSWORD"]
        .into_iter()
        .find(|name| var(name).is_none())
        .unwrap_or("XTREAM_PASSWORD");
    ConfigError::Incomplete {
        name: "XTREAM_*",
        missing,
    }
}

fn parse_or<T: FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|err: T::Err| ConfigError::Invalid {
            name,
            message: format!("`{raw}`: {err}"),
        }),
    }
}

fn parse_chat_ids(raw: &str) -> Result<Vec<i64>, ConfigError> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>().map_err(|err| ConfigError::Invalid {
                name: "CHAT_IDS",
                message: format!("`{part}`: {err}"),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if ids.is_empty() {
        return Err(ConfigError::Invalid {
            name: "CHAT_IDS",
            message: "no chat ids given".to_string(),
        });
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{Config, ConfigError, DeviceClassSetting, DEFAULT_DB_PATH};
    use crate::sync_service::write_policy::DeviceClass;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_without_any_source() {
        let config = config(&[]).expect("config");
        assert_eq!(config.db_path, DEFAULT_DB_PATH);
        assert!(!config.has_sources());
        assert_eq!(config.device_class, DeviceClassSetting::Auto);
        assert_eq!(config.sync_interval, Duration::from_secs(21_600));
        assert_eq!(config.playback_throttle, Duration::from_millis(2_000));
    }

    #[test]
    fn xtream_needs_all_three_credentials() {
        let err = config(&[
            ("XTREAM_BASE_URL", "http://panel.example:8080/"),
            ("XTREAM_USERNAME", "alice"),
        ])
        .expect_err("password missing");
        assert_eq!(
            err,
            ConfigError::Incomplete {
                name: "XTREAM_*",
                missing: "XTREAM_PASSWORD"
            }
        );

        let config = config(&[
            ("XTREAM_BASE_URL", "http://panel.example:8080/"),
            ("XTREAM_USERNAME", "alice"),
            ("XTREAM_PASSWORD", "s3cret"),
            ("XTREAM_RPS", "4"),
        ])
        .expect("config");
        let xtream = config.xtream.expect("xtream enabled");
        assert_eq!(xtream.credentials.base_url, "http://panel.example:8080");
        assert_eq!(xtream.requests_per_second, 4);
    }

    #[test]
    fn chat_ids_are_comma_separated() {
        let config = config(&[
            ("CHAT_BRIDGE_URL", "http://127.0.0.1:8081"),
            ("CHAT_IDS", "-1001, 42,"),
            ("CATALOG_DEVICE_CLASS", "constrained"),
        ])
        .expect("config");
        assert_eq!(config.chat.expect("chat").chat_ids, vec![-1001, 42]);
        assert_eq!(
            config.device_class,
            DeviceClassSetting::Fixed(DeviceClass::Constrained)
        );
    }

    #[test]
    fn bad_numbers_name_the_variable() {
        let err = config(&[("SYNC_INTERVAL_SECS", "hourly")]).expect_err("not a number");
        assert!(matches!(err, ConfigError::Invalid { name: "SYNC_INTERVAL_SECS", .. }));
        let err = config(&[("CHAT_BRIDGE_URL", "http://x"), ("CHAT_IDS", "a,b")])
            .expect_err("not ids");
        assert!(matches!(err, ConfigError::Invalid { name: "CHAT_IDS", .. }));
    }
}
