// Copyright (c) 2024 SenseLink Contributors
// SPDX-License-Identifier: MPL-2.0

//! Configuration file handling.
//!
//! A YAML document with a top-level `sources` list; each element is a
//! single-key mapping naming the source kind (`static`, `mutable`, `hass`,
//! `mqtt`, `aggregate`). Source bodies carry controller credentials and a
//! `plugs` list of single-key `identifier -> details` mappings.

use std::collections::HashMap;

use config::Config;
use log::{debug, warn};
use serde::Deserialize;

use crate::errors::SenseLinkError;

/// Default configuration file path, matching the original project.
pub const DEF_CONFIG_FILE: &str = "/etc/senselink/config.yml";

/// Environment variable that overrides the configuration file path.
pub const ENV_CONFIG_LOCATION: &str = "CONFIG_LOCATION";
/// Environment variable that overrides the `-l/--log` CLI level.
pub const ENV_LOGLEVEL: &str = "LOGLEVEL";
/// Environment variable controlling whether UDP replies are actually sent.
/// Any value other than `TRUE` (case-insensitive) behaves like `-q/--quiet`.
pub const ENV_SENSE_RESPONSE: &str = "SENSE_RESPONSE";

const STATIC_KEY: &str = "static";
const MUTABLE_KEY: &str = "mutable";
const HASS_KEY: &str = "hass";
const MQTT_KEY: &str = "mqtt";
const AGG_KEY: &str = "aggregate";

/// Per-plug configuration body.
///
/// Mirrors the original project's loosely-typed `details` dict: every field
/// here is optional since which ones apply depends on the source kind the
/// plug was declared under.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlugEntry {
    pub alias: Option<String>,
    pub mac: Option<String>,
    pub device_id: Option<String>,
    pub skip_rate: u32,

    pub min_watts: f64,
    pub max_watts: f64,
    pub off_usage: Option<f64>,
    pub on_fraction: Option<f64>,
    pub voltage: Option<f64>,

    /// Mutable-source starting power.
    pub power: Option<f64>,

    /// Home Assistant source fields.
    pub entity_id: Option<String>,
    pub state_keypath: Option<String>,
    pub off_state_value: Option<String>,
    pub on_state_value: Option<String>,
    pub attribute: Option<String>,
    pub attribute_keypath: Option<String>,
    pub power_keypath: Option<String>,
    pub attribute_min: Option<f64>,
    pub attribute_max: Option<f64>,

    /// MQTT source fields.
    pub power_topic: Option<String>,
    pub state_topic: Option<String>,
    pub attribute_topic: Option<String>,
    pub timeout_duration: Option<f64>,

    /// Aggregate source fields.
    pub elements: Vec<String>,
}

/// A single `identifier -> details` entry, as it appears in a `plugs` list.
pub type PlugMapping = HashMap<String, PlugEntry>;

#[derive(Debug, Clone, Deserialize)]
pub struct HaControllerConfig {
    pub url: String,
    pub auth_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttControllerConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_mqtt_port() -> u16 {
    1883
}

#[derive(Debug, Clone)]
pub enum SourceConfig {
    Static(Vec<PlugMapping>),
    Mutable(Vec<PlugMapping>),
    Ha(HaControllerConfig, Vec<PlugMapping>),
    Mqtt(MqttControllerConfig, Vec<PlugMapping>),
    Aggregate(Vec<PlugMapping>),
}

#[derive(Debug, Clone, Deserialize)]
struct RawSourceBody {
    #[serde(default)]
    plugs: Vec<PlugMapping>,
    url: Option<String>,
    auth_token: Option<String>,
    host: Option<String>,
    #[serde(default = "default_mqtt_port")]
    port: u16,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default)]
    sources: Vec<HashMap<String, RawSourceBody>>,
    target: Option<String>,
}

/// Fully resolved application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Every `source` entry, in file order, with only one `aggregate`
    /// entry kept (a second one is a configuration warning, not an error,
    /// matching the original project).
    pub sources: Vec<SourceConfig>,
    /// UDP reply destination override, used for Docker bridge deployments
    /// where the broadcast source address isn't reachable directly.
    pub target: Option<String>,
}

/// Loads and validates the YAML configuration at `path`.
pub fn load_configuration(path: &str) -> Result<Settings, SenseLinkError> {
    let config = Config::builder()
        .add_source(config::File::with_name(path).format(config::FileFormat::Yaml))
        .build()?;
    let raw: RawSettings = config.try_deserialize()?;
    resolve(raw)
}

fn resolve(raw: RawSettings) -> Result<Settings, SenseLinkError> {
    let mut sources = Vec::with_capacity(raw.sources.len());
    let mut has_aggregate = false;

    for entry in raw.sources {
        let (key, body) = entry
            .into_iter()
            .next()
            .ok_or_else(|| SenseLinkError::Configuration("empty source entry".into()))?;

        match key.to_lowercase().as_str() {
            STATIC_KEY => sources.push(SourceConfig::Static(body.plugs)),
            MUTABLE_KEY => sources.push(SourceConfig::Mutable(body.plugs)),
            HASS_KEY => {
                let url = body.url.ok_or_else(|| {
                    SenseLinkError::Configuration("hass source missing 'url'".into())
                })?;
                let auth_token = body.auth_token.ok_or_else(|| {
                    SenseLinkError::Configuration("hass source missing 'auth_token'".into())
                })?;
                sources.push(SourceConfig::Ha(
                    HaControllerConfig { url, auth_token },
                    body.plugs,
                ));
            }
            MQTT_KEY => {
                let host = body.host.ok_or_else(|| {
                    SenseLinkError::Configuration("mqtt source missing 'host'".into())
                })?;
                sources.push(SourceConfig::Mqtt(
                    MqttControllerConfig {
                        host,
                        port: body.port,
                        username: body.username,
                        password: body.password,
                    },
                    body.plugs,
                ));
            }
            AGG_KEY => {
                if has_aggregate {
                    warn!(
                        "Multiple 'aggregate' groups defined - only one group is allowed. Ignoring this and all subsequent!"
                    );
                    continue;
                }
                has_aggregate = true;
                sources.push(SourceConfig::Aggregate(body.plugs));
            }
            other => {
                return Err(SenseLinkError::Configuration(format!(
                    "Source type '{other}' not recognized"
                )));
            }
        }
    }

    debug!("Configuration resolved: {} source group(s)", sources.len());
    Ok(Settings {
        sources,
        target: raw.target,
    })
}
