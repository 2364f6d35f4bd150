// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Discover: CoRE Link-Format rendering of objects, instances and
//! resources together with their stored notification attributes.
//!
//! Attributes are printed at the level they are assigned (plus inherited
//! levels for the target line itself); unset attributes never appear, so
//! the resolver's `pmin` fallback is deliberately not applied here.

use std::fmt::Write;

use bytes::Bytes;

use crate::{
    dm::{
        self, attributes::{Attributes, server_stored_attrs}, DataModel, Iid, ObjectRc,
        Oid, Rid, Ssid, UriPath,
    },
    errors::{CoreError, CoreResult},
};

fn push_attr_i64(out: &mut String, name: &str, value: Option<i64>) {
    if let Some(value) = value {
        let _ = write!(out, ";{name}={value}");
    }
}

fn push_attr_f64(out: &mut String, name: &str, value: Option<f64>) {
    if let Some(value) = value {
        let _ = write!(out, ";{name}={value}");
    }
}

fn push_attrs(out: &mut String, dim: Option<usize>, attrs: &Attributes) {
    if let Some(dim) = dim {
        let _ = write!(out, ";dim={dim}");
    }
    push_attr_i64(out, "pmin", attrs.min_period);
    push_attr_i64(out, "pmax", attrs.max_period);
    push_attr_f64(out, "lt", attrs.less_than);
    push_attr_f64(out, "gt", attrs.greater_than);
    push_attr_f64(out, "st", attrs.step);
}

fn push_link(out: &mut String, path: &UriPath) {
    if !out.is_empty() {
        out.push(',');
    }
    let _ = write!(out, "<{path}>");
}

/// Object + Server levels, without the resolver's pmin fallback: only
/// attributes actually stored somewhere show up in Discover.
fn object_level_attrs(dm: &DataModel, obj: &ObjectRc, ssid: Ssid) -> CoreResult<Attributes> {
    let mut attrs = obj.borrow_mut().object_read_default_attrs(ssid)?;
    if !attrs.is_full() {
        attrs.combine(&server_stored_attrs(dm, ssid)?);
    }
    Ok(attrs)
}

fn instance_level_attrs(obj: &ObjectRc, iid: Iid, ssid: Ssid) -> CoreResult<Attributes> {
    let mut attrs = obj.borrow_mut().instance_read_default_attrs(iid, ssid)?;
    if !attrs.is_full() {
        let object_attrs = obj.borrow_mut().object_read_default_attrs(ssid)?;
        attrs.combine(&object_attrs);
    }
    Ok(attrs)
}

fn discover_resource_line(
    obj: &ObjectRc,
    oid: Oid,
    iid: Iid,
    rid: Rid,
    ssid: Ssid,
    out: &mut String,
) -> CoreResult<()> {
    let attrs = obj.borrow_mut().resource_read_attrs(iid, rid, ssid)?;
    let dim = obj.borrow_mut().resource_dim(iid, rid)?;
    push_link(out, &UriPath::Resource(oid, iid, rid));
    push_attrs(out, dim, &attrs);
    Ok(())
}

fn discover_instance(
    obj: &ObjectRc,
    oid: Oid,
    iid: Iid,
    ssid: Ssid,
    out: &mut String,
) -> CoreResult<()> {
    push_link(out, &UriPath::Instance(oid, iid));
    push_attrs(out, None, &instance_level_attrs(obj, iid, ssid)?);

    let rids = obj.borrow().supported_rids().to_vec();
    for rid in rids {
        if !obj.borrow_mut().resource_present(iid, rid)? {
            continue;
        }
        if !dm::resource_op_allowed(obj, rid, dm::ResourceOps::READ) {
            continue;
        }
        discover_resource_line(obj, oid, iid, rid, ssid, out)?;
    }
    Ok(())
}

fn discover_object(
    dm: &DataModel,
    obj: &ObjectRc,
    oid: Oid,
    ssid: Ssid,
    out: &mut String,
) -> CoreResult<()> {
    push_link(out, &UriPath::Object(oid));
    push_attrs(out, None, &object_level_attrs(dm, obj, ssid)?);

    let instances = obj.borrow_mut().instance_iter()?;
    let rids = obj.borrow().supported_rids().to_vec();
    for iid in instances {
        push_link(out, &UriPath::Instance(oid, iid));
        for rid in &rids {
            if obj.borrow_mut().resource_present(iid, *rid)? {
                push_link(out, &UriPath::Resource(oid, iid, *rid));
            }
        }
    }
    Ok(())
}

/// Produces the Link-Format body of a Discover response.
pub fn discover(
    dm: &DataModel,
    obj: &ObjectRc,
    uri: UriPath,
    ssid: Ssid,
) -> CoreResult<Bytes> {
    let mut out = String::new();
    match uri {
        UriPath::Resource(oid, iid, rid) => {
            dm::ensure_instance_present(obj, iid)?;
            dm::ensure_resource_supported_and_present(obj, iid, rid)?;
            discover_resource_line(obj, oid, iid, rid, ssid, &mut out)?;
        },
        UriPath::Instance(oid, iid) => {
            dm::ensure_instance_present(obj, iid)?;
            discover_instance(obj, oid, iid, ssid, &mut out)?;
        },
        UriPath::Object(oid) => {
            discover_object(dm, obj, oid, ssid, &mut out)?;
        },
        UriPath::Root => return Err(CoreError::BadRequest),
    }
    Ok(Bytes::from(out.into_bytes()))
}
