// Copyright (c) 2024 SenseLink Contributors
// SPDX-License-Identifier: MPL-2.0

//! Per-topic MQTT update parsing.
//!
//! Grounded on `original_source/senselink/mqtt/mqtt_data_source.py`. The
//! inactivity timer itself is owned by [`crate::mqtt`]'s controller actor
//! (it's the one holding a `Context` to schedule on); this module only
//! reports, via the `bool` each handler returns, whether that timer should
//! be (re)armed.

use crate::configuration::PlugEntry;
use crate::datasource::{is_close, AtomicF64, Base};

#[derive(Debug)]
pub struct MqttSource {
    pub base: Base,
    power: AtomicF64,
    pub power_topic: Option<String>,
    pub state_topic: Option<String>,
    pub attribute_topic: Option<String>,
    pub on_state_value: String,
    pub off_state_value: String,
    pub attribute_min: f64,
    pub attribute_max: f64,
    pub timeout_duration: Option<f64>,
}

impl MqttSource {
    pub fn from_config(cfg: &PlugEntry) -> Self {
        Self {
            base: Base::from_config(cfg),
            power: AtomicF64::new(0.0),
            power_topic: cfg.power_topic.clone(),
            state_topic: cfg.state_topic.clone(),
            attribute_topic: cfg.attribute_topic.clone(),
            on_state_value: cfg.on_state_value.clone().unwrap_or_else(|| "on".to_string()),
            off_state_value: cfg.off_state_value.clone().unwrap_or_else(|| "off".to_string()),
            attribute_min: cfg.attribute_min.unwrap_or(0.0),
            attribute_max: cfg.attribute_max.unwrap_or(0.0),
            timeout_duration: cfg.timeout_duration,
        }
    }

    pub fn power(&self) -> f64 {
        self.power.get()
    }

    /// Every topic this source listens on, paired with the handler to
    /// invoke for a payload received on it.
    pub fn topics(&self) -> Vec<&str> {
        [&self.power_topic, &self.state_topic, &self.attribute_topic]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect()
    }

    /// Updates power, applying the `isclose` dedup the original project
    /// relies on to avoid re-logging/re-resetting on no-op updates.
    ///
    /// Returns whether the inactivity timer should be (re)armed.
    fn update_power(&self, value: f64, restart_timeout: bool) -> bool {
        if !is_close(value, self.power()) {
            self.power.set(value);
            if is_close(value, self.base.off_usage) {
                self.base.set_state(false);
                log::debug!("Power equal to off_usage, assuming off");
            }
            log::debug!("Power updated: {:.4}", value);
        }
        restart_timeout && self.timeout_duration.is_some()
    }

    /// Called when `timeout_duration` elapses with no update.
    pub fn handle_timeout(&self) {
        log::info!("Update timeout reached, setting to off_usage");
        self.update_power(self.base.off_usage, false);
        self.base.set_state(false);
    }

    pub fn power_handler(&self, value: &str) -> bool {
        match value.parse::<f64>() {
            Ok(fval) => self.update_power(fval, true),
            Err(_) => {
                log::warn!("Failed to convert power value ({value:?}) to float, ignoring");
                false
            }
        }
    }

    pub fn state_handler(&self, value: &str) -> bool {
        if value == self.off_state_value {
            self.base.set_state(false);
            return self.update_power(self.base.off_usage, true);
        }
        if value == self.on_state_value {
            self.base.set_state(true);
            return if self.attribute_topic.is_some() {
                // Wattage tracks the attribute topic separately.
                self.timeout_duration.is_some()
            } else {
                self.update_power(self.base.max_watts, true)
            };
        }
        match value.parse::<f64>() {
            Ok(fval) if self.power_topic.is_none() => self.update_power(fval, true),
            _ => false,
        }
    }

    pub fn attribute_handler(&self, value: &str) -> bool {
        let attribute_value = match value.parse::<f64>() {
            Ok(v) => v,
            Err(_) => {
                log::warn!("Non-float value ({value:?}) received for attribute update, unable to update!");
                self.power.set(self.base.off_usage);
                self.base.set_state(false);
                return false;
            }
        };

        let clamped =
            Base::clamp_attribute("mqtt attribute", attribute_value, self.attribute_min, self.attribute_max);
        let delta = self.attribute_max - self.attribute_min;
        let on_fraction = if delta != 0.0 {
            (clamped - self.attribute_min) / delta
        } else {
            0.0
        };
        self.base.set_on_fraction(on_fraction);
        let scaled = self.base.min_watts + on_fraction * self.base.delta_watts;
        let rearm = self.update_power(scaled, true);
        log::debug!("Attribute at fraction: {on_fraction}");
        rearm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(min: f64, max: f64) -> MqttSource {
        let cfg = PlugEntry {
            min_watts: min,
            max_watts: max,
            power_topic: Some("home/plug/power".to_string()),
            state_topic: Some("home/plug/state".to_string()),
            timeout_duration: Some(30.0),
            ..Default::default()
        };
        MqttSource::from_config(&cfg)
    }

    #[test]
    fn power_topic_sets_power_directly() {
        let s = source(0.0, 100.0);
        assert!(s.power_handler("42.5"));
        assert_eq!(s.power(), 42.5);
    }

    #[test]
    fn power_topic_ignores_non_numeric_payload() {
        let s = source(0.0, 100.0);
        s.power_handler("42.5");
        assert!(!s.power_handler("not-a-number"));
        assert_eq!(s.power(), 42.5);
    }

    #[test]
    fn state_off_forces_off_usage_and_state_false() {
        let s = source(5.0, 100.0);
        s.power_handler("50.0");
        s.state_handler("off");
        assert_eq!(s.power(), s.base.off_usage);
        assert!(!s.base.state());
    }

    #[test]
    fn state_on_without_attribute_topic_uses_max_watts() {
        let s = source(0.0, 100.0);
        s.state_handler("on");
        assert_eq!(s.power(), 100.0);
        assert!(s.base.state());
    }

    #[test]
    fn attribute_scales_between_min_and_max() {
        let cfg = PlugEntry {
            min_watts: 0.0,
            max_watts: 100.0,
            attribute_topic: Some("home/plug/brightness".to_string()),
            attribute_min: Some(0.0),
            attribute_max: Some(255.0),
            timeout_duration: Some(30.0),
            ..Default::default()
        };
        let s = MqttSource::from_config(&cfg);
        s.attribute_handler("128");
        assert!((s.power() - 50.196).abs() < 1e-2);
    }

    #[test]
    fn timeout_resets_to_off_usage() {
        let s = source(5.0, 100.0);
        s.power_handler("50.0");
        s.handle_timeout();
        assert_eq!(s.power(), s.base.off_usage);
        assert!(!s.base.state());
    }

    #[test]
    fn isclose_dedup_skips_redundant_write() {
        let s = source(0.0, 100.0);
        assert!(s.power_handler("10.0"));
        // Same value again still requests a timer rearm, but doesn't re-log a power change.
        let rearm = s.power_handler("10.0");
        assert!(rearm);
        assert_eq!(s.power(), 10.0);
    }

    #[test]
    fn no_timeout_duration_never_requests_rearm() {
        let cfg = PlugEntry {
            min_watts: 0.0,
            max_watts: 100.0,
            power_topic: Some("t".to_string()),
            ..Default::default()
        };
        let s = MqttSource::from_config(&cfg);
        assert!(!s.power_handler("5.0"));
    }
}
