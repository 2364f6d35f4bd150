// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Decoded CoAP message model.
//!
//! Codes are kept in their wire form (3 class bits, 5 detail bits) so the
//! dispatcher can reason about classes the same way the protocol does.

use core::fmt;

use bytes::Bytes;

use crate::time::RealTimestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

/// CoAP code as `class.detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgCode(u8);

impl MsgCode {
    pub const EMPTY: MsgCode = MsgCode::new(0, 0);
    pub const GET: MsgCode = MsgCode::new(0, 1);
    pub const POST: MsgCode = MsgCode::new(0, 2);
    pub const PUT: MsgCode = MsgCode::new(0, 3);
    pub const DELETE: MsgCode = MsgCode::new(0, 4);

    pub const CREATED: MsgCode = MsgCode::new(2, 1);
    pub const DELETED: MsgCode = MsgCode::new(2, 2);
    pub const VALID: MsgCode = MsgCode::new(2, 3);
    pub const CHANGED: MsgCode = MsgCode::new(2, 4);
    pub const CONTENT: MsgCode = MsgCode::new(2, 5);

    pub const BAD_REQUEST: MsgCode = MsgCode::new(4, 0);
    pub const UNAUTHORIZED: MsgCode = MsgCode::new(4, 1);
    pub const BAD_OPTION: MsgCode = MsgCode::new(4, 2);
    pub const FORBIDDEN: MsgCode = MsgCode::new(4, 3);
    pub const NOT_FOUND: MsgCode = MsgCode::new(4, 4);
    pub const METHOD_NOT_ALLOWED: MsgCode = MsgCode::new(4, 5);
    pub const NOT_ACCEPTABLE: MsgCode = MsgCode::new(4, 6);
    pub const UNSUPPORTED_CONTENT_FORMAT: MsgCode = MsgCode::new(4, 15);

    pub const INTERNAL_SERVER_ERROR: MsgCode = MsgCode::new(5, 0);
    pub const NOT_IMPLEMENTED: MsgCode = MsgCode::new(5, 1);
    pub const SERVICE_UNAVAILABLE: MsgCode = MsgCode::new(5, 3);

    pub const fn new(class: u8, detail: u8) -> MsgCode {
        MsgCode((class & 0x07) << 5 | (detail & 0x1f))
    }

    pub const fn class(self) -> u8 {
        self.0 >> 5
    }

    pub const fn detail(self) -> u8 {
        self.0 & 0x1f
    }

    pub const fn is_client_error(self) -> bool {
        self.class() == 4
    }

    pub const fn is_error(self) -> bool {
        self.class() >= 4
    }

    pub const fn is_success(self) -> bool {
        self.class() == 2
    }
}

impl fmt::Display for MsgCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

/// Content-Format registry values used by the core. `FORMAT_NONE` is the
/// in-memory sentinel for "no Content-Format option present"; it never
/// appears on the wire.
pub const FORMAT_NONE: u16 = u16::MAX;
pub const FORMAT_PLAINTEXT: u16 = 0;
pub const FORMAT_LINK: u16 = 40;
pub const FORMAT_OPAQUE: u16 = 42;
pub const FORMAT_TLV: u16 = 11542;
pub const FORMAT_JSON: u16 = 11543;

/// CoAP option numbers consumed by the core.
pub mod opt {
    pub const ETAG: u16 = 4;
    pub const OBSERVE: u16 = 6;
    pub const LOCATION_PATH: u16 = 8;
    pub const URI_PATH: u16 = 11;
    pub const CONTENT_FORMAT: u16 = 12;
    pub const URI_QUERY: u16 = 15;
    pub const ACCEPT: u16 = 17;
    pub const BLOCK2: u16 = 23;
    pub const BLOCK1: u16 = 27;

    /// Critical options have an odd number (RFC 7252 §5.4.6).
    pub const fn is_critical(number: u16) -> bool {
        number & 1 == 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
    pub number: u16,
    pub value: Bytes,
}

impl CoapOption {
    pub fn new(number: u16, value: impl Into<Bytes>) -> CoapOption {
        CoapOption {
            number,
            value: value.into(),
        }
    }

    pub fn string(number: u16, value: &str) -> CoapOption {
        CoapOption::new(number, Bytes::copy_from_slice(value.as_bytes()))
    }

    pub fn uint(number: u16, value: u32) -> CoapOption {
        let raw = value.to_be_bytes();
        let skip = raw.iter().take_while(|b| **b == 0).count().min(3);
        CoapOption::new(number, Bytes::copy_from_slice(&raw[skip..]))
    }

    pub fn as_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.value).ok()
    }

    pub fn as_uint(&self) -> Option<u32> {
        if self.value.len() > 4 {
            return None;
        }
        let mut out: u32 = 0;
        for b in self.value.iter() {
            out = out << 8 | u32::from(*b);
        }
        Some(out)
    }
}

/// Message id plus token, identifying one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MsgIdentity {
    pub msg_id: u16,
    pub token: Bytes,
}

impl MsgIdentity {
    pub fn new(msg_id: u16, token: impl Into<Bytes>) -> MsgIdentity {
        MsgIdentity {
            msg_id,
            token: token.into(),
        }
    }
}

/// One decoded CoAP message as handed over by the channel.
#[derive(Debug, Clone)]
pub struct CoapMessage {
    pub msg_type: MsgType,
    pub code: MsgCode,
    pub identity: MsgIdentity,
    pub options: Vec<CoapOption>,
    pub payload: Bytes,
}

impl CoapMessage {
    pub fn new(msg_type: MsgType, code: MsgCode) -> CoapMessage {
        CoapMessage {
            msg_type,
            code,
            identity: MsgIdentity::default(),
            options: Vec::new(),
            payload: Bytes::new(),
        }
    }

    pub fn with_identity(mut self, identity: MsgIdentity) -> CoapMessage {
        self.identity = identity;
        self
    }

    pub fn with_option(mut self, option: CoapOption) -> CoapMessage {
        self.options.push(option);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> CoapMessage {
        self.payload = payload.into();
        self
    }

    pub fn options_of(&self, number: u16) -> impl Iterator<Item = &CoapOption> {
        self.options.iter().filter(move |o| o.number == number)
    }

    pub fn first_option(&self, number: u16) -> Option<&CoapOption> {
        self.options_of(number).next()
    }

    pub fn uint_option(&self, number: u16) -> Option<u32> {
        self.first_option(number).and_then(CoapOption::as_uint)
    }
}

/// Parameters of an outgoing response or notification, short of its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgDetails {
    pub msg_type: MsgType,
    pub code: MsgCode,
    /// `FORMAT_NONE` when no Content-Format option should be emitted.
    pub format: u16,
    /// True when the message carries an Observe option.
    pub observe_serial: bool,
    pub location_path: Vec<String>,
}

impl MsgDetails {
    pub fn response(code: MsgCode) -> MsgDetails {
        MsgDetails {
            msg_type: MsgType::Acknowledgement,
            code,
            format: FORMAT_NONE,
            observe_serial: false,
            location_path: Vec::new(),
        }
    }
}

/// Observe option value for an outgoing notification: a monotonically
/// growing 24-bit serial derived from the realtime clock, so the peer can
/// detect reordered notifications.
pub fn observe_serial_value(t: RealTimestamp) -> u32 {
    let secs = t.timestamp() as u64;
    let nanos = u64::from(t.timestamp_subsec_nanos());
    ((secs << 15 | nanos >> 15) & 0x00ff_ffff) as u32
}
