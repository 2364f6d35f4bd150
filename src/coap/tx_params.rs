// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

/// CoAP transmission parameters (RFC 7252 §4.8). Queue-mode socket
/// suspension is derived from `max_transmit_wait`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoapTxParams {
    /// ACK_TIMEOUT, seconds.
    pub ack_timeout_s: f64,
    /// ACK_RANDOM_FACTOR.
    pub ack_random_factor: f64,
    /// MAX_RETRANSMIT.
    pub max_retransmit: u32,
    /// NSTART.
    pub nstart: u32,
}

impl Default for CoapTxParams {
    fn default() -> Self {
        CoapTxParams {
            ack_timeout_s: 2.0,
            ack_random_factor: 1.5,
            max_retransmit: 4,
            nstart: 1,
        }
    }
}

impl CoapTxParams {
    pub fn validate(&self) -> Result<()> {
        // ACK_TIMEOUT below 1 second would violate the guidelines of
        // [RFC5405]. -- RFC 7252, 4.8.1
        ensure!(self.ack_timeout_s >= 1.0, "ACK_TIMEOUT below 1000 milliseconds");
        // ACK_RANDOM_FACTOR MUST NOT be decreased below 1.0. -- RFC 7252, 4.8.1
        ensure!(
            self.ack_random_factor >= 1.0,
            "ACK_RANDOM_FACTOR less than 1.0"
        );
        ensure!(self.nstart >= 1, "NSTART less than 1 is useless");
        Ok(())
    }

    /// MAX_TRANSMIT_WAIT: `ACK_TIMEOUT * ((2 ** (MAX_RETRANSMIT + 1)) - 1)
    /// * ACK_RANDOM_FACTOR`.
    pub fn max_transmit_wait(&self) -> Duration {
        let factor = f64::from((1u32 << (self.max_retransmit + 1)) - 1)
            * self.ack_random_factor;
        Duration::from_secs_f64(self.ack_timeout_s * factor)
    }
}
