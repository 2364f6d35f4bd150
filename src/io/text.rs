// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Plain-text and opaque content codecs.
//!
//! Plain-text carries a single scalar: numbers and booleans in decimal,
//! opaque data in base64, object links as `oid:iid`. Opaque carries raw
//! bytes and requires a bytes-typed resource.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;

use crate::{
    errors::{CoreError, CoreResult},
    io::{IdKind, InputCtx, OutputCtx, Value},
};

pub fn encode_text(value: &Value) -> Vec<u8> {
    match value {
        Value::Int(v) => v.to_string().into_bytes(),
        Value::Float(v) => v.to_string().into_bytes(),
        Value::Bool(v) => if *v { b"1".to_vec() } else { b"0".to_vec() },
        Value::Str(v) => v.clone().into_bytes(),
        Value::Bytes(v) => BASE64.encode(v).into_bytes(),
        Value::Objlnk(oid, iid) => format!("{oid}:{iid}").into_bytes(),
    }
}

/// Single-value plain-text output.
#[derive(Debug, Default)]
pub struct TextOutput {
    buf: Option<Vec<u8>>,
}

impl TextOutput {
    pub fn new() -> Self {
        TextOutput::default()
    }

    pub fn finish(self) -> Bytes {
        Bytes::from(self.buf.unwrap_or_default())
    }
}

impl OutputCtx for TextOutput {
    fn set_id(&mut self, _kind: IdKind, _id: u16) -> CoreResult<()> {
        Ok(())
    }

    fn ret(&mut self, value: Value) -> CoreResult<()> {
        if self.buf.is_some() {
            return Err(CoreError::FormatMismatch);
        }
        self.buf = Some(encode_text(&value));
        Ok(())
    }

    fn ret_array(&mut self, _entries: &[(u16, Value)]) -> CoreResult<()> {
        Err(CoreError::FormatMismatch)
    }

    fn begin_instance(&mut self, _iid: u16) -> CoreResult<()> {
        Err(CoreError::FormatMismatch)
    }

    fn end_instance(&mut self) -> CoreResult<()> {
        Err(CoreError::FormatMismatch)
    }

    fn produced(&self) -> bool {
        self.buf.is_some()
    }
}

/// Raw bytes output; only bytes-typed resources fit.
#[derive(Debug, Default)]
pub struct OpaqueOutput {
    buf: Option<Vec<u8>>,
}

impl OpaqueOutput {
    pub fn new() -> Self {
        OpaqueOutput::default()
    }

    pub fn finish(self) -> Bytes {
        Bytes::from(self.buf.unwrap_or_default())
    }
}

impl OutputCtx for OpaqueOutput {
    fn set_id(&mut self, _kind: IdKind, _id: u16) -> CoreResult<()> {
        Ok(())
    }

    fn ret(&mut self, value: Value) -> CoreResult<()> {
        if self.buf.is_some() {
            return Err(CoreError::FormatMismatch);
        }
        match value {
            Value::Bytes(v) => {
                self.buf = Some(v);
                Ok(())
            },
            _ => Err(CoreError::FormatMismatch),
        }
    }

    fn ret_array(&mut self, _entries: &[(u16, Value)]) -> CoreResult<()> {
        Err(CoreError::FormatMismatch)
    }

    fn begin_instance(&mut self, _iid: u16) -> CoreResult<()> {
        Err(CoreError::FormatMismatch)
    }

    fn end_instance(&mut self) -> CoreResult<()> {
        Err(CoreError::FormatMismatch)
    }

    fn produced(&self) -> bool {
        self.buf.is_some()
    }
}

/// Input context over an unstructured payload (plain-text or opaque).
#[derive(Debug)]
pub struct TextInput {
    payload: Bytes,
    opaque: bool,
}

impl TextInput {
    pub fn new(payload: Bytes, opaque: bool) -> Self {
        TextInput { payload, opaque }
    }

    fn as_str(&self) -> CoreResult<&str> {
        core::str::from_utf8(&self.payload).map_err(|_| CoreError::BadRequest)
    }
}

impl InputCtx for TextInput {
    fn get_id(&mut self) -> CoreResult<Option<(IdKind, u16)>> {
        // An unstructured payload carries no ids; asking for one means the
        // request targeted a non-resource path with a scalar format. An
        // empty payload reads as an empty record list (Create without
        // resources).
        if self.payload.is_empty() {
            return Ok(None);
        }
        Err(CoreError::BadRequest)
    }

    fn next_entry(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn enter(&mut self) -> CoreResult<()> {
        Err(CoreError::BadRequest)
    }

    fn leave(&mut self) -> CoreResult<()> {
        Err(CoreError::BadRequest)
    }

    fn read_i64(&mut self) -> CoreResult<i64> {
        self.as_str()?.parse().map_err(|_| CoreError::BadRequest)
    }

    fn read_f64(&mut self) -> CoreResult<f64> {
        self.as_str()?.parse().map_err(|_| CoreError::BadRequest)
    }

    fn read_bool(&mut self) -> CoreResult<bool> {
        match self.as_str()? {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(CoreError::BadRequest),
        }
    }

    fn read_string(&mut self) -> CoreResult<String> {
        Ok(self.as_str()?.to_string())
    }

    fn read_bytes(&mut self) -> CoreResult<Bytes> {
        if self.opaque {
            return Ok(self.payload.clone());
        }
        let decoded = BASE64
            .decode(self.as_str()?)
            .map_err(|_| CoreError::BadRequest)?;
        Ok(Bytes::from(decoded))
    }

    fn read_objlnk(&mut self) -> CoreResult<(u16, u16)> {
        let s = self.as_str()?;
        let (oid, iid) = s.split_once(':').ok_or(CoreError::BadRequest)?;
        Ok((
            oid.parse().map_err(|_| CoreError::BadRequest)?,
            iid.parse().map_err(|_| CoreError::BadRequest)?,
        ))
    }
}
