// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! LwM2M TLV codec (OMA TS §6.3.3).
//!
//! ```text
//!  7 6   5    4 3     2 1 0
//! +----+----+------+--------+
//! |type| id | len  | length |   type: 00 Object Instance
//! |    |size| type |        |         01 Resource Instance
//! +----+----+------+--------+         10 Multiple Resource
//!                                     11 Resource with value
//! ```
//!
//! Integers are encoded big-endian in 1/2/4/8 bytes, floats in 4 or 8,
//! object links as two 16-bit halves.

use bytes::Bytes;

use crate::{
    errors::{CoreError, CoreResult},
    io::{IdKind, InputCtx, OutputCtx, Value},
};

const TYPE_INSTANCE: u8 = 0b00;
const TYPE_RESOURCE_INSTANCE: u8 = 0b01;
const TYPE_MULTIPLE_RESOURCE: u8 = 0b10;
const TYPE_RESOURCE: u8 = 0b11;

fn encode_int(v: i64, out: &mut Vec<u8>) {
    if let Ok(b) = i8::try_from(v) {
        out.extend_from_slice(&b.to_be_bytes());
    } else if let Ok(b) = i16::try_from(v) {
        out.extend_from_slice(&b.to_be_bytes());
    } else if let Ok(b) = i32::try_from(v) {
        out.extend_from_slice(&b.to_be_bytes());
    } else {
        out.extend_from_slice(&v.to_be_bytes());
    }
}

pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    match value {
        Value::Int(v) => encode_int(*v, &mut out),
        Value::Float(v) => {
            let narrowed = *v as f32;
            if f64::from(narrowed) == *v {
                out.extend_from_slice(&narrowed.to_be_bytes());
            } else {
                out.extend_from_slice(&v.to_be_bytes());
            }
        },
        Value::Bool(v) => out.push(u8::from(*v)),
        Value::Str(v) => out.extend_from_slice(v.as_bytes()),
        Value::Bytes(v) => out.extend_from_slice(v),
        Value::Objlnk(oid, iid) => {
            out.extend_from_slice(&oid.to_be_bytes());
            out.extend_from_slice(&iid.to_be_bytes());
        },
    }
    out
}

fn write_header(kind: u8, id: u16, len: usize, out: &mut Vec<u8>) {
    let mut type_byte = kind << 6;
    if id > u16::from(u8::MAX) {
        type_byte |= 0b10_0000;
    }
    let len_field: u8 = match len {
        0..=7 => len as u8,
        _ if len <= 0xff => {
            type_byte |= 0b0000_1000;
            0
        },
        _ if len <= 0xffff => {
            type_byte |= 0b0001_0000;
            0
        },
        _ => {
            type_byte |= 0b0001_1000;
            0
        },
    };
    out.push(type_byte | len_field);
    if id > u16::from(u8::MAX) {
        out.extend_from_slice(&id.to_be_bytes());
    } else {
        out.push(id as u8);
    }
    match len {
        0..=7 => {},
        _ if len <= 0xff => out.push(len as u8),
        _ if len <= 0xffff => out.extend_from_slice(&(len as u16).to_be_bytes()),
        _ => out.extend_from_slice(&(len as u32).to_be_bytes()[1..]),
    }
}

fn write_entry(kind: u8, id: u16, body: &[u8], out: &mut Vec<u8>) {
    write_header(kind, id, body.len(), out);
    out.extend_from_slice(body);
}

/// TLV output sink with optional Object Instance nesting.
#[derive(Debug, Default)]
pub struct TlvOutput {
    buf: Vec<u8>,
    pending_rid: Option<u16>,
    instance: Option<(u16, Vec<u8>)>,
    produced_any: bool,
}

impl TlvOutput {
    pub fn new() -> Self {
        TlvOutput::default()
    }

    pub fn finish(mut self) -> Bytes {
        if let Some((iid, body)) = self.instance.take() {
            write_entry(TYPE_INSTANCE, iid, &body, &mut self.buf);
        }
        Bytes::from(self.buf)
    }

    fn sink(&mut self) -> &mut Vec<u8> {
        match self.instance.as_mut() {
            Some((_, body)) => body,
            None => &mut self.buf,
        }
    }

    fn take_rid(&mut self) -> CoreResult<u16> {
        self.pending_rid.take().ok_or(CoreError::Internal)
    }
}

impl OutputCtx for TlvOutput {
    fn set_id(&mut self, kind: IdKind, id: u16) -> CoreResult<()> {
        match kind {
            IdKind::Rid => {
                self.pending_rid = Some(id);
                Ok(())
            },
            // Instance ids arrive through begin_instance.
            _ => Ok(()),
        }
    }

    fn ret(&mut self, value: Value) -> CoreResult<()> {
        let rid = self.take_rid()?;
        let body = encode_value(&value);
        let sink = self.sink();
        write_entry(TYPE_RESOURCE, rid, &body, sink);
        self.produced_any = true;
        Ok(())
    }

    fn ret_array(&mut self, entries: &[(u16, Value)]) -> CoreResult<()> {
        let rid = self.take_rid()?;
        let mut body = Vec::new();
        for (riid, value) in entries {
            let encoded = encode_value(value);
            write_entry(TYPE_RESOURCE_INSTANCE, *riid, &encoded, &mut body);
        }
        let sink = self.sink();
        write_entry(TYPE_MULTIPLE_RESOURCE, rid, &body, sink);
        self.produced_any = true;
        Ok(())
    }

    fn begin_instance(&mut self, iid: u16) -> CoreResult<()> {
        if self.instance.is_some() {
            return Err(CoreError::Internal);
        }
        self.instance = Some((iid, Vec::new()));
        Ok(())
    }

    fn end_instance(&mut self) -> CoreResult<()> {
        let (iid, body) = self.instance.take().ok_or(CoreError::Internal)?;
        write_entry(TYPE_INSTANCE, iid, &body, &mut self.buf);
        self.produced_any = true;
        Ok(())
    }

    fn produced(&self) -> bool {
        self.produced_any
    }
}

#[derive(Debug, Clone)]
enum TlvBody {
    Leaf(Bytes),
    Nested(Vec<TlvEntry>),
}

#[derive(Debug, Clone)]
struct TlvEntry {
    kind: IdKind,
    id: u16,
    body: TlvBody,
}

fn take<'a>(data: &'a [u8], pos: &mut usize, n: usize) -> CoreResult<&'a [u8]> {
    let end = pos.checked_add(n).ok_or(CoreError::BadRequest)?;
    if end > data.len() {
        return Err(CoreError::BadRequest);
    }
    let slice = &data[*pos..end];
    *pos = end;
    Ok(slice)
}

fn parse_entries(data: &[u8], depth: u8) -> CoreResult<Vec<TlvEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let type_byte = data[pos];
        pos += 1;
        let kind_bits = type_byte >> 6;
        let id_wide = type_byte & 0b10_0000 != 0;
        let len_type = (type_byte >> 3) & 0b11;
        let short_len = usize::from(type_byte & 0b111);

        let id = if id_wide {
            let raw = take(data, &mut pos, 2)?;
            u16::from(raw[0]) << 8 | u16::from(raw[1])
        } else {
            u16::from(take(data, &mut pos, 1)?[0])
        };

        let len = match len_type {
            0 => short_len,
            1 => usize::from(take(data, &mut pos, 1)?[0]),
            2 => {
                let raw = take(data, &mut pos, 2)?;
                usize::from(raw[0]) << 8 | usize::from(raw[1])
            },
            _ => {
                let raw = take(data, &mut pos, 3)?;
                usize::from(raw[0]) << 16 | usize::from(raw[1]) << 8 | usize::from(raw[2])
            },
        };

        let body_bytes = take(data, &mut pos, len)?;
        let entry = match kind_bits {
            TYPE_RESOURCE => TlvEntry {
                kind: IdKind::Rid,
                id,
                body: TlvBody::Leaf(Bytes::copy_from_slice(body_bytes)),
            },
            TYPE_RESOURCE_INSTANCE => TlvEntry {
                kind: IdKind::Riid,
                id,
                body: TlvBody::Leaf(Bytes::copy_from_slice(body_bytes)),
            },
            TYPE_MULTIPLE_RESOURCE => {
                if depth >= 2 {
                    return Err(CoreError::BadRequest);
                }
                TlvEntry {
                    kind: IdKind::Rid,
                    id,
                    body: TlvBody::Nested(parse_entries(body_bytes, depth + 1)?),
                }
            },
            _ => {
                if depth >= 1 {
                    return Err(CoreError::BadRequest);
                }
                TlvEntry {
                    kind: IdKind::Iid,
                    id,
                    body: TlvBody::Nested(parse_entries(body_bytes, depth + 1)?),
                }
            },
        };
        entries.push(entry);
    }
    Ok(entries)
}

fn decode_i64(raw: &[u8]) -> CoreResult<i64> {
    match raw.len() {
        1 => Ok(i64::from(raw[0] as i8)),
        2 => Ok(i64::from(i16::from_be_bytes([raw[0], raw[1]]))),
        4 => Ok(i64::from(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))),
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(raw);
            Ok(i64::from_be_bytes(buf))
        },
        _ => Err(CoreError::BadRequest),
    }
}

/// Cursor-based input context over a parsed TLV tree.
#[derive(Debug)]
pub struct TlvInput {
    stack: Vec<(Vec<TlvEntry>, usize)>,
}

impl TlvInput {
    pub fn parse(payload: &[u8]) -> CoreResult<TlvInput> {
        Ok(TlvInput {
            stack: vec![(parse_entries(payload, 0)?, 0)],
        })
    }

    fn current(&self) -> Option<&TlvEntry> {
        let (entries, idx) = self.stack.last()?;
        entries.get(*idx)
    }

    fn current_leaf(&self) -> CoreResult<&Bytes> {
        match self.current() {
            Some(TlvEntry {
                body: TlvBody::Leaf(raw),
                ..
            }) => Ok(raw),
            _ => Err(CoreError::BadRequest),
        }
    }
}

impl InputCtx for TlvInput {
    fn get_id(&mut self) -> CoreResult<Option<(IdKind, u16)>> {
        Ok(self.current().map(|e| (e.kind, e.id)))
    }

    fn next_entry(&mut self) -> CoreResult<()> {
        if let Some((_, idx)) = self.stack.last_mut() {
            *idx += 1;
        }
        Ok(())
    }

    fn enter(&mut self) -> CoreResult<()> {
        let nested = match self.current() {
            Some(TlvEntry {
                body: TlvBody::Nested(nested),
                ..
            }) => nested.clone(),
            _ => return Err(CoreError::BadRequest),
        };
        self.stack.push((nested, 0));
        Ok(())
    }

    fn leave(&mut self) -> CoreResult<()> {
        if self.stack.len() < 2 {
            return Err(CoreError::BadRequest);
        }
        self.stack.pop();
        if let Some((_, idx)) = self.stack.last_mut() {
            *idx += 1;
        }
        Ok(())
    }

    fn read_i64(&mut self) -> CoreResult<i64> {
        decode_i64(self.current_leaf()?)
    }

    fn read_f64(&mut self) -> CoreResult<f64> {
        let raw = self.current_leaf()?;
        match raw.len() {
            4 => Ok(f64::from(f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))),
            8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(raw);
                Ok(f64::from_be_bytes(buf))
            },
            _ => Err(CoreError::BadRequest),
        }
    }

    fn read_bool(&mut self) -> CoreResult<bool> {
        match self.current_leaf()?.as_ref() {
            [0] => Ok(false),
            [1] => Ok(true),
            _ => Err(CoreError::BadRequest),
        }
    }

    fn read_string(&mut self) -> CoreResult<String> {
        let raw = self.current_leaf()?;
        core::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|_| CoreError::BadRequest)
    }

    fn read_bytes(&mut self) -> CoreResult<Bytes> {
        Ok(self.current_leaf()?.clone())
    }

    fn read_objlnk(&mut self) -> CoreResult<(u16, u16)> {
        let raw = self.current_leaf()?;
        if raw.len() != 4 {
            return Err(CoreError::BadRequest);
        }
        Ok((
            u16::from(raw[0]) << 8 | u16::from(raw[1]),
            u16::from(raw[2]) << 8 | u16::from(raw[3]),
        ))
    }
}
