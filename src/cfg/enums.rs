// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// (D)TLS protocol version requested for secure connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DtlsVersion {
    /// Let the TLS backend pick the highest version both sides support.
    #[default]
    Default,
    #[serde(rename = "TLSv1.2")]
    Tls12,
    #[serde(rename = "TLSv1.3")]
    Tls13,
}

impl fmt::Display for DtlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DtlsVersion::Default => write!(f, "default"),
            DtlsVersion::Tls12 => write!(f, "TLSv1.2"),
            DtlsVersion::Tls13 => write!(f, "TLSv1.3"),
        }
    }
}

/// UDP security mode from the Security object (resource 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    Psk,
    Certificate,
    NoSec,
}

impl SecurityMode {
    pub fn from_resource_value(value: i64) -> Option<SecurityMode> {
        match value {
            0 => Some(SecurityMode::Psk),
            2 => Some(SecurityMode::Certificate),
            3 => Some(SecurityMode::NoSec),
            _ => None,
        }
    }

    pub fn is_secure(self) -> bool {
        !matches!(self, SecurityMode::NoSec)
    }
}
