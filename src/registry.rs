// Copyright (c) 2024 SenseLink Contributors
// SPDX-License-Identifier: MPL-2.0

//! Turns a resolved [`Settings`] into the live plug registry the UDP server
//! and controllers query and update.
//!
//! Grounded on `original_source/senselink/plug_instance.py` (`PlugInstance`,
//! `configure_plugs`) and `original_source/senselink/senselink.py`
//! (`SenseLink.create_instances`, `add_instances`).

use std::collections::HashSet;
#[cfg(test)]
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use serde_json::{json, Value};

use crate::configuration::{HaControllerConfig, MqttControllerConfig, PlugEntry, PlugMapping, Settings, SourceConfig};
use crate::datasource::{AggregateSource, DataSource, MutableSource, StaticSource};
use crate::errors::SenseLinkError;
use crate::ha::source::HaSource;
use crate::identity::{generate_device_id, generate_mac, DEFAULT_OUI};
use crate::mqtt::source::MqttSource;

/// A single spoofed plug: its stable identity plus the data source backing
/// its reported wattage.
#[derive(Debug)]
pub struct Plug {
    pub identifier: String,
    pub mac: String,
    pub device_id: String,
    pub alias: String,
    pub data_source: DataSource,
    pub skip_rate: u32,
    start_time: OnceLock<Instant>,
    in_aggregate: AtomicBool,
    response_counter: AtomicU32,
}

impl Plug {
    pub fn power(&self) -> f64 {
        self.data_source.power()
    }

    pub fn in_aggregate(&self) -> bool {
        self.in_aggregate.load(Ordering::Relaxed)
    }

    /// Records the first time this plug is queried, if it hasn't been already.
    pub fn mark_seen(&self) {
        let _ = self.start_time.set(Instant::now());
    }

    /// Rate-limits responses per `skip_rate`: responds once, then skips the
    /// next `skip_rate` requests.
    pub fn should_respond(&self) -> bool {
        let counter = self.response_counter.load(Ordering::Relaxed);
        if counter < 1 {
            self.response_counter.store(self.skip_rate, Ordering::Relaxed);
            true
        } else {
            self.response_counter.store(counter.saturating_sub(1), Ordering::Relaxed);
            false
        }
    }

    /// Builds the TP-Link `emeter`/`system` JSON response for this plug.
    pub fn generate_response(&self) -> Value {
        let mac_upper = self.mac.to_uppercase();
        json!({
            "emeter": {
                "get_realtime": {
                    "current": self.data_source.current(),
                    "voltage": self.data_source.voltage(),
                    "power": self.data_source.power(),
                    "total": 0,
                    "err_code": 0
                }
            },
            "system": {
                "get_sysinfo": {
                    "err_code": 0,
                    "sw_ver": "1.2.5 Build 171206 Rel.085954",
                    "hw_ver": "1.0",
                    "type": "IOT.SMARTPLUGSWITCH",
                    "model": "HS110(US)",
                    "mac": mac_upper,
                    "deviceId": mac_upper,
                    "alias": self.alias,
                    "relay_state": 1,
                    "updating": 0
                }
            }
        })
    }
}

/// The fully resolved set of live plugs plus the controller groups that
/// need to be started alongside the UDP server.
pub struct Registry {
    pub plugs: Vec<Arc<Plug>>,
    pub ha_groups: Vec<(HaControllerConfig, Vec<Arc<Plug>>)>,
    pub mqtt_groups: Vec<(MqttControllerConfig, Vec<Arc<Plug>>)>,
    pub target: Option<String>,
}

impl Registry {
    pub fn plug_for_mac(&self, mac: &str) -> Option<&Arc<Plug>> {
        self.plugs.iter().find(|p| p.mac == mac)
    }
}

fn new_plug(identifier: &str, entry: &PlugEntry, data_source: DataSource) -> Arc<Plug> {
    let mac = entry.mac.clone().unwrap_or_else(|| {
        let mac = generate_mac(Some(&DEFAULT_OUI));
        log::info!("Spoofed MAC for {identifier}: {mac}");
        mac
    });
    let device_id = entry.device_id.clone().unwrap_or_else(|| {
        let id = generate_device_id();
        log::info!("Spoofed Device ID for {identifier}: {id}");
        id
    });
    let alias = entry
        .alias
        .clone()
        .unwrap_or_else(|| format!("Spoofed TP-Link Kasa HS110 {}", &device_id[..8.min(device_id.len())]));

    Arc::new(Plug {
        identifier: identifier.to_string(),
        mac,
        device_id,
        alias,
        data_source,
        skip_rate: entry.skip_rate,
        start_time: OnceLock::new(),
        in_aggregate: AtomicBool::new(false),
        response_counter: AtomicU32::new(0),
    })
}

fn configure<F>(plugs: &[PlugMapping], make_source: F) -> Result<Vec<Arc<Plug>>, SenseLinkError>
where
    F: Fn(&str, &PlugEntry) -> DataSource,
{
    let mut out = Vec::with_capacity(plugs.len());
    for mapping in plugs {
        let (identifier, entry) = mapping.iter().next().ok_or_else(|| {
            SenseLinkError::Configuration("empty plug entry".to_string())
        })?;
        out.push(new_plug(identifier, entry, make_source(identifier, entry)));
        log::debug!("Added plug: {identifier}");
    }
    Ok(out)
}

fn insert_all(
    all: &mut Vec<Arc<Plug>>,
    seen_macs: &mut HashSet<String>,
    new_plugs: Vec<Arc<Plug>>,
) -> Result<(), SenseLinkError> {
    for plug in new_plugs {
        if !seen_macs.insert(plug.mac.clone()) {
            return Err(SenseLinkError::Configuration(format!(
                "Two plugs configured with the same MAC address! ({})",
                plug.mac
            )));
        }
        all.push(plug);
    }
    Ok(())
}

/// Builds the live plug registry from resolved settings.
///
/// Aggregate plugs are bound in a second pass, after every other group has
/// been added, so elements can be looked up by identifier across the whole
/// registry regardless of declaration order. Resolution walks the registry
/// in insertion order (not `element_ids` order) to match the order plugs
/// were actually declared in the configuration file.
pub fn build_registry(settings: Settings) -> Result<Registry, SenseLinkError> {
    let mut plugs = Vec::new();
    let mut seen_macs = HashSet::new();
    let mut ha_groups = Vec::new();
    let mut mqtt_groups = Vec::new();
    let mut aggregate_plugs: Vec<PlugMapping> = Vec::new();

    for source in settings.sources {
        match source {
            SourceConfig::Static(list) => {
                log::info!("Generating Static instances");
                let group = configure(&list, |_, entry| DataSource::Static(StaticSource::from_config(entry)))?;
                insert_all(&mut plugs, &mut seen_macs, group)?;
            }
            SourceConfig::Mutable(list) => {
                log::info!("Generating Mutable instances");
                let group = configure(&list, |_, entry| DataSource::Mutable(MutableSource::from_config(entry)))?;
                insert_all(&mut plugs, &mut seen_macs, group)?;
            }
            SourceConfig::Ha(controller_cfg, list) => {
                log::info!("Generating HASS instances");
                let group = configure(&list, |id, entry| DataSource::Ha(HaSource::from_config(id, entry)))?;
                insert_all(&mut plugs, &mut seen_macs, group.clone())?;
                ha_groups.push((controller_cfg, group));
            }
            SourceConfig::Mqtt(controller_cfg, list) => {
                log::info!("Generating MQTT instances");
                let group = configure(&list, |_, entry| DataSource::Mqtt(MqttSource::from_config(entry)))?;
                insert_all(&mut plugs, &mut seen_macs, group.clone())?;
                mqtt_groups.push((controller_cfg, group));
            }
            SourceConfig::Aggregate(list) => {
                aggregate_plugs = list;
            }
        }
    }

    if !aggregate_plugs.is_empty() {
        log::info!("Generating Aggregate instances");
        let agg = configure(&aggregate_plugs, |_, entry| {
            DataSource::Aggregate(AggregateSource::from_config(entry))
        })?;

        for plug in &agg {
            let element_ids: HashSet<&str> = plug
                .data_source
                .as_aggregate()
                .expect("aggregate plug must hold an AggregateSource")
                .element_ids
                .iter()
                .map(String::as_str)
                .collect();

            let mut elements = Vec::new();
            for candidate in &plugs {
                if !element_ids.contains(candidate.identifier.as_str()) {
                    continue;
                }
                if candidate.in_aggregate() {
                    log::warn!(
                        "Configuration adds plug {} to more than one Aggregate plug. Usage in Aggregate {} will be ignored.",
                        candidate.identifier,
                        plug.identifier
                    );
                    continue;
                }
                candidate.in_aggregate.store(true, Ordering::Relaxed);
                elements.push(Arc::clone(candidate));
            }

            plug.data_source
                .as_aggregate()
                .expect("aggregate plug must hold an AggregateSource")
                .bind_elements(elements);
        }

        insert_all(&mut plugs, &mut seen_macs, agg)?;
    }

    Ok(Registry {
        plugs,
        ha_groups,
        mqtt_groups,
        target: settings.target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::SourceConfig;

    fn plug_mapping(id: &str, entry: PlugEntry) -> PlugMapping {
        HashMap::from([(id.to_string(), entry)])
    }

    #[test]
    fn duplicate_mac_across_groups_is_rejected() {
        let entry = PlugEntry {
            mac: Some("aa:bb:cc:dd:ee:ff".to_string()),
            min_watts: 5.0,
            max_watts: 5.0,
            ..Default::default()
        };
        let settings = Settings {
            sources: vec![
                SourceConfig::Static(vec![plug_mapping("a", entry.clone())]),
                SourceConfig::Static(vec![plug_mapping("b", entry)]),
            ],
            target: None,
        };
        assert!(build_registry(settings).is_err());
    }

    #[test]
    fn aggregate_sums_member_power() {
        let a = PlugEntry {
            mac: Some("aa:aa:aa:aa:aa:01".to_string()),
            min_watts: 10.0,
            max_watts: 10.0,
            ..Default::default()
        };
        let b = PlugEntry {
            mac: Some("aa:aa:aa:aa:aa:02".to_string()),
            min_watts: 20.0,
            max_watts: 20.0,
            ..Default::default()
        };
        let agg = PlugEntry {
            mac: Some("aa:aa:aa:aa:aa:03".to_string()),
            elements: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        let settings = Settings {
            sources: vec![
                SourceConfig::Static(vec![plug_mapping("a", a), plug_mapping("b", b)]),
                SourceConfig::Aggregate(vec![plug_mapping("agg", agg)]),
            ],
            target: None,
        };
        let registry = build_registry(settings).unwrap();
        let agg_plug = registry.plug_for_mac("aa:aa:aa:aa:aa:03").unwrap();
        assert_eq!(agg_plug.power(), 30.0);
        assert!(registry.plug_for_mac("aa:aa:aa:aa:aa:01").unwrap().in_aggregate());
    }

    #[test]
    fn plug_without_mac_gets_spoofed_identity() {
        let entry = PlugEntry {
            min_watts: 1.0,
            max_watts: 1.0,
            ..Default::default()
        };
        let settings = Settings {
            sources: vec![SourceConfig::Static(vec![plug_mapping("a", entry)])],
            target: None,
        };
        let registry = build_registry(settings).unwrap();
        let plug = &registry.plugs[0];
        assert!(plug.mac.starts_with("53:75:31:"));
        assert!(plug.alias.starts_with("Spoofed TP-Link Kasa HS110 "));
    }

    #[test]
    fn should_respond_honors_skip_rate() {
        let entry = PlugEntry {
            mac: Some("aa:aa:aa:aa:aa:09".to_string()),
            skip_rate: 2,
            min_watts: 1.0,
            max_watts: 1.0,
            ..Default::default()
        };
        let settings = Settings {
            sources: vec![SourceConfig::Static(vec![plug_mapping("a", entry)])],
            target: None,
        };
        let registry = build_registry(settings).unwrap();
        let plug = &registry.plugs[0];
        assert!(plug.should_respond());
        assert!(!plug.should_respond());
        assert!(!plug.should_respond());
        assert!(plug.should_respond());
    }
}
