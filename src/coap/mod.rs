// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Message-level CoAP model and the channel seam.
//!
//! The byte codec, blockwise transfer and confirmable retransmission all
//! live behind [`stream::CoapChannel`]; the core only ever deals with
//! already-decoded messages.

/// Message, code and option types.
pub mod msg;
/// The shared communication channel abstraction.
pub mod stream;
/// CoAP transmission parameters (RFC 7252 §4.8).
pub mod tx_params;
