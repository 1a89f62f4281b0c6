// Copyright (c) 2024 SenseLink Contributors
// SPDX-License-Identifier: MPL-2.0

//! The power/current/voltage model shared by every plug, and the
//! `Static`/`Mutable`/`Aggregate` variants that need nothing beyond it.
//!
//! `Ha` and `Mqtt` variants live in [`crate::ha::source`] and
//! [`crate::mqtt::source`] since their update logic is substantial enough
//! to warrant their own modules; this file only wires them into the
//! [`DataSource`] enum.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::configuration::PlugEntry;
use crate::ha::source::HaSource;
use crate::mqtt::source::MqttSource;

const DEFAULT_VOLTAGE: f64 = 120.0;

/// Lock-free holder for a single `f64`, used for fields that are written by
/// exactly one owner (a controller callback) and read by the UDP server's
/// hot path with no synchronization.
#[derive(Debug)]
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub(crate) fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub(crate) fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Attributes shared by every concrete data source.
///
/// `off_usage`, `min_watts`, `max_watts` and `delta_watts` are fixed at
/// construction. `on_fraction` and `state` are mutated by attribute-scaling
/// updates (HA, MQTT), so they're stored atomically.
#[derive(Debug)]
pub struct Base {
    pub voltage: f64,
    pub off_usage: f64,
    pub min_watts: f64,
    pub max_watts: f64,
    pub delta_watts: f64,
    on_fraction: AtomicF64,
    state: AtomicBool,
}

impl Base {
    pub fn from_config(cfg: &PlugEntry) -> Self {
        let min_watts = cfg.min_watts;
        let max_watts = cfg.max_watts;
        Self {
            voltage: cfg.voltage.unwrap_or(DEFAULT_VOLTAGE),
            off_usage: cfg.off_usage.unwrap_or(min_watts),
            min_watts,
            max_watts,
            delta_watts: max_watts - min_watts,
            on_fraction: AtomicF64::new(cfg.on_fraction.unwrap_or(1.0)),
            state: AtomicBool::new(true),
        }
    }

    pub fn on_fraction(&self) -> f64 {
        self.on_fraction.get()
    }

    pub fn set_on_fraction(&self, value: f64) {
        self.on_fraction.set(value);
    }

    pub fn state(&self) -> bool {
        self.state.load(Ordering::Relaxed)
    }

    pub fn set_state(&self, on: bool) {
        self.state.store(on, Ordering::Relaxed);
    }

    /// `min_watts + on_fraction * delta_watts` when on, else `off_usage`.
    pub fn derived_power(&self) -> f64 {
        if self.state() {
            self.min_watts + self.on_fraction() * self.delta_watts
        } else {
            self.off_usage
        }
    }

    /// Clamps `value` to `[min, max]`, logging when clamping changed it.
    pub fn clamp_attribute(label: &str, value: f64, min: f64, max: f64) -> f64 {
        let clamped = value.clamp(min, max);
        if clamped != value {
            log::error!("Attribute for entity {label} outside expected values ({value}, clamped to [{min}, {max}])");
        }
        clamped
    }
}

/// `math.isclose` with Python's default tolerances (`rel_tol=1e-9`, `abs_tol=0.0`).
pub fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs())
}

/// A statically configured plug: power never changes after startup.
#[derive(Debug)]
pub struct StaticSource {
    pub base: Base,
}

impl StaticSource {
    pub fn from_config(cfg: &PlugEntry) -> Self {
        Self {
            base: Base::from_config(cfg),
        }
    }

    pub fn power(&self) -> f64 {
        self.base.derived_power()
    }
}

/// A plug whose power is set directly by local code rather than derived
/// from `on_fraction`/`state`.
#[derive(Debug)]
pub struct MutableSource {
    pub base: Base,
    power: AtomicF64,
}

impl MutableSource {
    pub fn from_config(cfg: &PlugEntry) -> Self {
        Self {
            base: Base::from_config(cfg),
            power: AtomicF64::new(cfg.power.unwrap_or(0.0)),
        }
    }

    pub fn power(&self) -> f64 {
        self.power.get()
    }

    pub fn set_power(&self, value: f64) {
        self.power.set(value);
    }
}

/// A synthetic plug whose power is the sum of its member plugs' power.
///
/// Members are resolved once, during [`crate::registry::build_registry`];
/// after that this holds owning references directly (no re-lookup per
/// query, per the "members are never re-looked-up" contract).
#[derive(Debug)]
pub struct AggregateSource {
    pub base: Base,
    pub element_ids: Vec<String>,
    elements: std::sync::OnceLock<Vec<Arc<crate::registry::Plug>>>,
}

impl AggregateSource {
    pub fn from_config(cfg: &PlugEntry) -> Self {
        Self {
            base: Base::from_config(cfg),
            element_ids: cfg.elements.clone(),
            elements: std::sync::OnceLock::new(),
        }
    }

    /// Binds the resolved member plugs. Must be called exactly once, before
    /// any UDP query can observe this aggregate.
    pub fn bind_elements(&self, elements: Vec<Arc<crate::registry::Plug>>) {
        self.elements
            .set(elements)
            .expect("aggregate elements bound twice");
    }

    pub fn power(&self) -> f64 {
        self.elements
            .get()
            .map(|elems| elems.iter().map(|p| p.power()).sum())
            .unwrap_or(0.0)
    }
}

/// Tagged union over every concrete data source kind.
///
/// Polymorphism is limited to the `power`/`current`/`voltage` readers, per
/// design: no shared base class, just a match.
#[derive(Debug)]
pub enum DataSource {
    Static(StaticSource),
    Mutable(MutableSource),
    Ha(HaSource),
    Mqtt(MqttSource),
    Aggregate(AggregateSource),
}

impl DataSource {
    pub fn power(&self) -> f64 {
        match self {
            DataSource::Static(s) => s.power(),
            DataSource::Mutable(s) => s.power(),
            DataSource::Ha(s) => s.power(),
            DataSource::Mqtt(s) => s.power(),
            DataSource::Aggregate(s) => s.power(),
        }
    }

    pub fn voltage(&self) -> f64 {
        match self {
            DataSource::Static(s) => s.base.voltage,
            DataSource::Mutable(s) => s.base.voltage,
            DataSource::Ha(s) => s.base.voltage,
            DataSource::Mqtt(s) => s.base.voltage,
            DataSource::Aggregate(s) => s.base.voltage,
        }
    }

    pub fn current(&self) -> f64 {
        self.power() / self.voltage()
    }

    pub fn as_aggregate(&self) -> Option<&AggregateSource> {
        match self {
            DataSource::Aggregate(s) => Some(s),
            _ => None,
        }
    }
}
