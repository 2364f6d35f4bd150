// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Default filter directive, e.g. `"info"` or `"lwm2m_client_rs=debug"`.
    pub level: String,
    #[serde(default)]
    pub show_target: bool,
    #[serde(default)]
    pub show_line: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
            show_target: false,
            show_line: false,
        }
    }
}

/// Installs the global tracing subscriber. `RUST_LOG` overrides the
/// configured default level.
pub fn init_logger(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("invalid log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.show_target)
        .with_line_number(config.show_line)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))?;
    Ok(())
}
