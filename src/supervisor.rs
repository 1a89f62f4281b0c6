// Copyright (c) 2024 SenseLink Contributors
// SPDX-License-Identifier: MPL-2.0

//! Top-level orchestration: builds the plug registry, starts one controller
//! actor per configured source group, and runs the UDP server to
//! completion.
//!
//! Grounded on the teacher's `Controller` for the "one actor per long-lived
//! connection" shape (`controller/mod.rs`) and on
//! `original_source/senselink/senselink.py`'s `SenseLink.start` for the
//! "gather everything concurrently" shape.

use std::sync::Arc;

use actix::Actor;
use log::info;

use crate::configuration::Settings;
use crate::errors::SenseLinkError;
use crate::ha::HaController;
use crate::mqtt::MqttController;
use crate::registry::build_registry;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9999";

/// Builds the registry, starts every controller actor, and runs the UDP
/// server until it errors out or the process is interrupted.
pub async fn start(settings: Settings, respond: bool) -> Result<(), SenseLinkError> {
    let registry = build_registry(settings)?;

    for (config, sources) in registry.ha_groups.clone() {
        info!("Starting Home Assistant controller for {}", config.url);
        HaController::new(config, sources).start();
    }
    for (config, sources) in registry.mqtt_groups.clone() {
        info!("Starting MQTT controller for {}:{}", config.host, config.port);
        MqttController::new(config, sources).start();
    }

    let registry = Arc::new(registry);
    crate::udp::run(registry, DEFAULT_BIND_ADDR, respond)
        .await
        .map_err(|e| SenseLinkError::Protocol(e.to_string()))
}
