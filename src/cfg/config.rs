// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{cfg::enums::DtlsVersion, coap::tx_params::CoapTxParams};

fn default_in_buffer_size() -> usize {
    4000
}

fn default_out_buffer_size() -> usize {
    4000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "EndpointName")]
    /// Endpoint name reported during Register (mandatory, non-empty).
    pub endpoint_name: String,

    #[serde(default, rename = "UdpListenPort")]
    /// Preferred UDP listening port; 0 lets the OS assign one.
    pub udp_listen_port: u16,

    #[serde(default = "default_in_buffer_size", rename = "InBufferSize")]
    /// Size of the buffer incoming messages are decoded into.
    pub in_buffer_size: usize,

    #[serde(default = "default_out_buffer_size", rename = "OutBufferSize")]
    /// Size of the buffer outgoing messages are encoded into.
    pub out_buffer_size: usize,

    #[serde(default, rename = "DtlsVersion")]
    /// (D)TLS version requested for secure connections.
    pub dtls_version: DtlsVersion,

    #[serde(default, rename = "CoapTxParams")]
    /// CoAP transmission parameters; also drive queue-mode suspension.
    pub tx_params: CoapTxParams,
}

impl Config {
    pub fn new(endpoint_name: impl Into<String>) -> Self {
        Config {
            endpoint_name: endpoint_name.into(),
            udp_listen_port: 0,
            in_buffer_size: default_in_buffer_size(),
            out_buffer_size: default_out_buffer_size(),
            dtls_version: DtlsVersion::Default,
            tx_params: CoapTxParams::default(),
        }
    }

    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates invariants required by the core.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.endpoint_name.is_empty(),
            "EndpointName must not be empty"
        );
        // Anything below the minimal CoAP message size cannot hold a
        // useful exchange.
        ensure!(self.in_buffer_size >= 128, "InBufferSize must be >= 128");
        ensure!(self.out_buffer_size >= 128, "OutBufferSize must be >= 128");
        self.tx_params.validate()?;
        Ok(())
    }
}
