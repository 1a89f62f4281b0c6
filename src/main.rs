// Copyright (c) 2024 SenseLink Contributors
// SPDX-License-Identifier: MPL-2.0

#![forbid(non_ascii_idents)]
#![deny(unsafe_code)]

use anyhow::Context;
use clap::Parser;
use log::error;

use senselink::configuration::{
    load_configuration, DEF_CONFIG_FILE, ENV_CONFIG_LOCATION, ENV_LOGLEVEL, ENV_SENSE_RESPONSE,
};
use senselink::supervisor;

#[derive(Parser, Debug)]
#[command(author, version, about = "TP-Link Kasa HS110 impersonation server for Sense energy monitors")]
struct Cli {
    /// Configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log: Option<String>,

    /// Don't actually send UDP responses (still synthesizes and logs them)
    #[arg(short, long)]
    quiet: bool,
}

#[actix::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let log_level = args
        .log
        .or_else(|| std::env::var(ENV_LOGLEVEL).ok())
        .unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config_path = args
        .config
        .or_else(|| std::env::var(ENV_CONFIG_LOCATION).ok())
        .unwrap_or_else(|| DEF_CONFIG_FILE.to_string());

    let settings = load_configuration(&config_path)
        .with_context(|| format!("Failed to read configuration from {config_path}"))?;

    let respond = !args.quiet
        && std::env::var(ENV_SENSE_RESPONSE)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);

    if let Err(e) = supervisor::start(settings, respond).await {
        error!("{e}");
        std::process::exit(1);
    }

    Ok(())
}
