// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Input/output contexts bridging resource handlers and content formats.
//!
//! Handlers never see wire bytes: reads go through an [`OutputCtx`] that
//! encodes into the negotiated Content-Format, writes come in through an
//! [`InputCtx`] that decodes the request payload. Plain-text and LwM2M TLV
//! are built in; the traits are the seam for anything richer.

use bytes::Bytes;
use enum_dispatch::enum_dispatch;

use crate::{
    coap::msg::{self, FORMAT_NONE},
    errors::{CoreError, CoreResult},
};

pub mod text;
pub mod tlv;

pub use text::{OpaqueOutput, TextInput, TextOutput};
pub use tlv::{TlvInput, TlvOutput};

/// Identifier kinds appearing in structured payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    /// Object Instance ID.
    Iid,
    /// Resource ID.
    Rid,
    /// Resource Instance ID (inside a multiple resource).
    Riid,
}

/// A single resource value, as produced by handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Objlnk(u16, u16),
}

impl Value {
    /// Numeric projection used by the observe delta filter; NaN for
    /// non-numeric values.
    pub fn numeric(&self) -> f64 {
        match self {
            Value::Int(v) => *v as f64,
            Value::Float(v) => *v,
            _ => f64::NAN,
        }
    }
}

/// Sink handlers write resource values into.
#[enum_dispatch]
pub trait OutputCtx {
    /// Declares the id of the entry about to be produced.
    fn set_id(&mut self, kind: IdKind, id: u16) -> CoreResult<()>;

    /// Emits a single value for the current entry.
    fn ret(&mut self, value: Value) -> CoreResult<()>;

    /// Emits a multiple resource as `(riid, value)` pairs.
    fn ret_array(&mut self, entries: &[(u16, Value)]) -> CoreResult<()>;

    /// Opens a nested Object Instance context (object-level reads).
    fn begin_instance(&mut self, iid: u16) -> CoreResult<()>;

    fn end_instance(&mut self) -> CoreResult<()>;

    /// True once at least one value was produced; a successful resource
    /// read that produced nothing is a handler bug.
    fn produced(&self) -> bool;
}

/// Captures a value in memory instead of encoding it; used by internal
/// reads (Server and Access-Control resources) and by tests.
#[derive(Debug, Default)]
pub struct CaptureOutput {
    pub value: Option<Value>,
    pub array: Option<Vec<(u16, Value)>>,
}

impl CaptureOutput {
    pub fn new() -> Self {
        CaptureOutput::default()
    }
}

impl OutputCtx for CaptureOutput {
    fn set_id(&mut self, _kind: IdKind, _id: u16) -> CoreResult<()> {
        Ok(())
    }

    fn ret(&mut self, value: Value) -> CoreResult<()> {
        self.value = Some(value);
        Ok(())
    }

    fn ret_array(&mut self, entries: &[(u16, Value)]) -> CoreResult<()> {
        self.array = Some(entries.to_vec());
        Ok(())
    }

    fn begin_instance(&mut self, _iid: u16) -> CoreResult<()> {
        Err(CoreError::FormatMismatch)
    }

    fn end_instance(&mut self) -> CoreResult<()> {
        Err(CoreError::FormatMismatch)
    }

    fn produced(&self) -> bool {
        self.value.is_some() || self.array.is_some()
    }
}

/// Concrete output sinks, one per supported Content-Format.
#[enum_dispatch(OutputCtx)]
pub enum OutputSink {
    Text(TextOutput),
    Opaque(OpaqueOutput),
    Tlv(TlvOutput),
    Capture(CaptureOutput),
}

impl OutputSink {
    pub fn for_format(format: u16) -> CoreResult<OutputSink> {
        match format {
            msg::FORMAT_PLAINTEXT => Ok(OutputSink::Text(TextOutput::new())),
            msg::FORMAT_OPAQUE => Ok(OutputSink::Opaque(OpaqueOutput::new())),
            msg::FORMAT_TLV => Ok(OutputSink::Tlv(TlvOutput::new())),
            _ => Err(CoreError::NotAcceptable),
        }
    }

    /// Consumes the sink, yielding the encoded payload.
    pub fn finish(self) -> Bytes {
        match self {
            OutputSink::Text(out) => out.finish(),
            OutputSink::Opaque(out) => out.finish(),
            OutputSink::Tlv(out) => out.finish(),
            OutputSink::Capture(_) => Bytes::new(),
        }
    }
}

/// Decorates another sink, capturing the numeric projection of the last
/// value for the observe delta filter.
pub struct ObserveOutput<'a> {
    inner: &'a mut OutputSink,
    pub numeric: f64,
}

impl<'a> ObserveOutput<'a> {
    pub fn new(inner: &'a mut OutputSink) -> Self {
        ObserveOutput {
            inner,
            numeric: f64::NAN,
        }
    }
}

impl OutputCtx for ObserveOutput<'_> {
    fn set_id(&mut self, kind: IdKind, id: u16) -> CoreResult<()> {
        self.inner.set_id(kind, id)
    }

    fn ret(&mut self, value: Value) -> CoreResult<()> {
        self.numeric = value.numeric();
        self.inner.ret(value)
    }

    fn ret_array(&mut self, entries: &[(u16, Value)]) -> CoreResult<()> {
        self.inner.ret_array(entries)
    }

    fn begin_instance(&mut self, iid: u16) -> CoreResult<()> {
        self.inner.begin_instance(iid)
    }

    fn end_instance(&mut self) -> CoreResult<()> {
        self.inner.end_instance()
    }

    fn produced(&self) -> bool {
        self.inner.produced()
    }
}

/// Source handlers read written values from.
#[enum_dispatch]
pub trait InputCtx {
    /// Id of the current entry, `None` at the end of the current level.
    fn get_id(&mut self) -> CoreResult<Option<(IdKind, u16)>>;

    /// Advances to the next entry on the current level.
    fn next_entry(&mut self) -> CoreResult<()>;

    /// Descends into the current entry (Object Instance or Multiple
    /// Resource).
    fn enter(&mut self) -> CoreResult<()>;

    /// Ascends, positioning the cursor after the entered entry.
    fn leave(&mut self) -> CoreResult<()>;

    fn read_i64(&mut self) -> CoreResult<i64>;
    fn read_f64(&mut self) -> CoreResult<f64>;
    fn read_bool(&mut self) -> CoreResult<bool>;
    fn read_string(&mut self) -> CoreResult<String>;
    fn read_bytes(&mut self) -> CoreResult<Bytes>;
    fn read_objlnk(&mut self) -> CoreResult<(u16, u16)>;
}

#[enum_dispatch(InputCtx)]
pub enum InputSink {
    Tlv(TlvInput),
    Text(TextInput),
}

impl InputSink {
    /// Builds the input context matching the request Content-Format.
    pub fn for_format(format: u16, payload: Bytes) -> CoreResult<InputSink> {
        match format {
            msg::FORMAT_TLV => Ok(InputSink::Tlv(TlvInput::parse(&payload)?)),
            msg::FORMAT_PLAINTEXT | FORMAT_NONE => {
                Ok(InputSink::Text(TextInput::new(payload, false)))
            },
            msg::FORMAT_OPAQUE => Ok(InputSink::Text(TextInput::new(payload, true))),
            _ => Err(CoreError::UnsupportedContentFormat),
        }
    }
}

/// Picks the response Content-Format for a Read.
///
/// Non-resource paths are structured and only TLV can express them;
/// resource paths default to plain-text when the server did not ask for
/// anything specific.
pub fn select_read_format(requested: u16, is_resource_path: bool) -> CoreResult<u16> {
    if is_resource_path {
        match requested {
            FORMAT_NONE => Ok(msg::FORMAT_PLAINTEXT),
            msg::FORMAT_PLAINTEXT | msg::FORMAT_OPAQUE | msg::FORMAT_TLV => Ok(requested),
            _ => Err(CoreError::NotAcceptable),
        }
    } else {
        match requested {
            FORMAT_NONE | msg::FORMAT_TLV => Ok(msg::FORMAT_TLV),
            _ => Err(CoreError::NotAcceptable),
        }
    }
}
