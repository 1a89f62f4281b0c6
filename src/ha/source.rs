// Copyright (c) 2024 SenseLink Contributors
// SPDX-License-Identifier: MPL-2.0

//! Per-entity Home Assistant update parsing.
//!
//! Ground truth for the reconciliation order (state wins over attribute,
//! `on_state_value` is tentative and overridable, raw-power updates write
//! before comparing to `off_usage`) is `original_source/senselink/homeassistant/ha_data_source.py`,
//! corrected per the write-then-check fix called out in the design notes.

use serde_json::Value;

use crate::configuration::PlugEntry;
use crate::datasource::{is_close, AtomicF64, Base};
use crate::errors::SenseLinkError;
use crate::util::{get_float_at_path, safekey};

/// Root path prefix used for a `get_states` bulk entry: the state fields
/// are at the top level.
pub const BULK_ROOT: &str = "";
/// Root path prefix used for a `state_changed` event: the state fields are
/// nested under `new_state`.
pub const INCREMENTAL_ROOT: &str = "new_state/";

#[derive(Debug)]
pub struct HaSource {
    pub base: Base,
    power: AtomicF64,
    pub entity_id: String,
    pub state_keypath: String,
    pub off_state_value: String,
    pub on_state_value: Option<String>,
    pub attribute: Option<String>,
    pub attribute_keypath: Option<String>,
    pub power_keypath: Option<String>,
    pub attribute_min: f64,
    pub attribute_max: f64,
}

impl HaSource {
    pub fn from_config(identifier: &str, cfg: &PlugEntry) -> Self {
        Self {
            base: Base::from_config(cfg),
            power: AtomicF64::new(0.0),
            entity_id: cfg.entity_id.clone().unwrap_or_else(|| identifier.to_string()),
            state_keypath: cfg.state_keypath.clone().unwrap_or_else(|| "state".to_string()),
            off_state_value: cfg.off_state_value.clone().unwrap_or_else(|| "off".to_string()),
            on_state_value: cfg.on_state_value.clone(),
            attribute: cfg.attribute.clone(),
            attribute_keypath: cfg.attribute_keypath.clone(),
            power_keypath: cfg.power_keypath.clone(),
            attribute_min: cfg.attribute_min.unwrap_or(0.0),
            attribute_max: cfg.attribute_max.unwrap_or(0.0),
        }
    }

    pub fn power(&self) -> f64 {
        self.power.get()
    }

    fn set_power(&self, value: f64) {
        self.power.set(value);
    }

    fn matches(&self, message: &Value) -> bool {
        safekey(message, "entity_id").and_then(Value::as_str) == Some(self.entity_id.as_str())
    }

    /// Routes a `get_states` result entry to this source.
    pub fn parse_bulk_update(&self, message: &Value) {
        if !self.matches(message) {
            return;
        }
        if let Err(e) = self.parse_update(BULK_ROOT, message) {
            log::error!("Error for entity {}: {e}", self.entity_id);
        }
    }

    /// Routes a `state_changed` event's `event.data` to this source.
    pub fn parse_incremental_update(&self, message: &Value) {
        if !self.matches(message) {
            return;
        }
        if let Err(e) = self.parse_update(INCREMENTAL_ROOT, message) {
            log::error!("Error for entity {}: {e}", self.entity_id);
        }
    }

    fn parse_update(&self, root_path: &str, message: &Value) -> Result<(), SenseLinkError> {
        let state_path = format!("{root_path}{}", self.state_keypath);
        let attribute_path = if let Some(power_keypath) = &self.power_keypath {
            format!("{root_path}{power_keypath}")
        } else if let Some(attribute) = &self.attribute {
            format!("{root_path}attributes/{attribute}")
        } else if let Some(attribute_keypath) = &self.attribute_keypath {
            format!("{root_path}{attribute_keypath}")
        } else {
            state_path.clone()
        };

        let state_value = safekey(message, &state_path).and_then(Value::as_str);
        let attribute_value = get_float_at_path(message, &attribute_path);

        self.reconcile(state_value, attribute_value)
    }

    fn reconcile(
        &self,
        state_value: Option<&str>,
        attribute_value: Option<f64>,
    ) -> Result<(), SenseLinkError> {
        let mut parsed_power: Option<f64> = None;

        if let Some(sv) = state_value {
            if sv == self.off_state_value {
                self.base.set_state(false);
                self.set_power(self.base.off_usage);
                log::info!("Updated wattage for {}: {}", self.entity_id, self.base.off_usage);
                return Ok(());
            }
            if Some(sv) == self.on_state_value.as_deref() {
                parsed_power = Some(self.base.max_watts);
                self.base.set_state(true);
            }
        }

        if let Some(attribute_value) = attribute_value {
            if self.power_keypath.is_some() || self.attribute.is_none() {
                if is_close(attribute_value, self.base.off_usage) {
                    self.base.set_state(false);
                }
                parsed_power = Some(attribute_value);
            } else if parsed_power.is_none() {
                let clamped = Base::clamp_attribute(
                    &self.entity_id,
                    attribute_value,
                    self.attribute_min,
                    self.attribute_max,
                );
                let delta = self.attribute_max - self.attribute_min;
                let on_fraction = if delta != 0.0 {
                    (clamped - self.attribute_min) / delta
                } else {
                    0.0
                };
                self.base.set_on_fraction(on_fraction);
                parsed_power = Some(self.base.min_watts + on_fraction * self.base.delta_watts);
            }
        }

        match parsed_power {
            Some(power) => {
                self.set_power(power);
                log::info!("Updated wattage for {}: {power}", self.entity_id);
                Ok(())
            }
            None => Err(SenseLinkError::Parse(format!(
                "No valid attribute found for {}",
                self.entity_id
            ))),
        }
    }
}
