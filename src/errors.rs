// Copyright (c) 2024 SenseLink Contributors
// SPDX-License-Identifier: MPL-2.0

//! Custom application error with conversions from common Rust and 3rd-party errors.

use derive_more::Display;
use log::error;

/// Application-level error.
///
/// Only [`SenseLinkError::Configuration`] is fatal: it aborts startup before
/// any socket is opened. Every other variant is logged by the caller and the
/// offending message, attribute, or connection is dropped — the data path
/// never propagates an error out to `main`.
#[derive(Debug, Display, PartialEq)]
pub enum SenseLinkError {
    #[display("Configuration error: {_0}")]
    Configuration(String),

    #[display("Parse error: {_0}")]
    Parse(String),

    #[display("Protocol error: {_0}")]
    Protocol(String),
}

impl std::error::Error for SenseLinkError {}

impl From<serde_json::Error> for SenseLinkError {
    fn from(e: serde_json::Error) -> Self {
        error!("{:?}", e);
        SenseLinkError::Parse(e.to_string())
    }
}

impl From<config::ConfigError> for SenseLinkError {
    fn from(e: config::ConfigError) -> Self {
        SenseLinkError::Configuration(e.to_string())
    }
}
