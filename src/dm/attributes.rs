// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Notification attributes and the inheritance resolver.
//!
//! Attributes are combined along Resource → Instance → Object → Server:
//! every field still unset at a more specific level is filled from the next
//! one. `pmin` falls back to 1 second once server-level defaults are in
//! play; an unset `pmax` means "no periodic trigger".

use tracing::warn;

use crate::{
    dm::{
        self, DataModel, Iid, ObjectRc, Rid, Ssid, query,
        RID_SERVER_DEFAULT_PMAX, RID_SERVER_DEFAULT_PMIN,
    },
    errors::{CoreError, CoreResult},
};

pub const DEFAULT_PMIN_S: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Attributes {
    pub min_period: Option<i64>,
    pub max_period: Option<i64>,
    pub greater_than: Option<f64>,
    pub less_than: Option<f64>,
    pub step: Option<f64>,
}

impl Attributes {
    /// Fills every unset field of `self` from `other` ("first set wins").
    pub fn combine(&mut self, other: &Attributes) {
        if self.min_period.is_none() {
            self.min_period = other.min_period;
        }
        if self.max_period.is_none() {
            self.max_period = other.max_period;
        }
        if self.greater_than.is_none() {
            self.greater_than = other.greater_than;
        }
        if self.less_than.is_none() {
            self.less_than = other.less_than;
        }
        if self.step.is_none() {
            self.step = other.step;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Attributes::default()
    }

    pub fn is_full(&self) -> bool {
        self.min_period.is_some()
            && self.max_period.is_some()
            && self.greater_than.is_some()
            && self.less_than.is_some()
            && self.step.is_some()
    }

    /// `st >= 0` and `lt + 2*st < gt` whenever both bounds are set.
    pub fn resource_attrs_valid(&self) -> bool {
        let step = match self.step {
            Some(st) if st < 0.0 => return false,
            Some(st) => st,
            None => 0.0,
        };
        if let (Some(lt), Some(gt)) = (self.less_than, self.greater_than)
            && lt + 2.0 * step >= gt
        {
            return false;
        }
        true
    }
}

/// Attribute updates carried by a Write-Attributes request. The outer
/// `Option` distinguishes "not mentioned" from an explicit update; the
/// inner one lets `pmin=` (no value) clear a stored attribute.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RequestAttributes {
    pub min_period: Option<Option<i64>>,
    pub max_period: Option<Option<i64>>,
    pub greater_than: Option<Option<f64>>,
    pub less_than: Option<Option<f64>>,
    pub step: Option<Option<f64>>,
}

impl RequestAttributes {
    pub fn is_empty(&self) -> bool {
        *self == RequestAttributes::default()
    }

    pub fn has_resource_specific(&self) -> bool {
        self.greater_than.is_some() || self.less_than.is_some() || self.step.is_some()
    }

    /// Overwrites the mentioned fields of `attrs`.
    pub fn apply_to(&self, attrs: &mut Attributes) {
        if let Some(update) = self.min_period {
            attrs.min_period = update;
        }
        if let Some(update) = self.max_period {
            attrs.max_period = update;
        }
        if let Some(update) = self.greater_than {
            attrs.greater_than = update;
        }
        if let Some(update) = self.less_than {
            attrs.less_than = update;
        }
        if let Some(update) = self.step {
            attrs.step = update;
        }
    }
}

/// Query for the effective attributes of a path.
pub struct AttrsQuery<'a> {
    pub obj: &'a ObjectRc,
    pub iid: Option<Iid>,
    pub rid: Option<Rid>,
    pub ssid: Ssid,
    pub with_server_defaults: bool,
}

fn read_server_period(dm: &DataModel, server_iid: Iid, rid: Rid) -> CoreResult<Option<i64>> {
    match dm::res_read_i64(dm, dm::OID_SERVER, server_iid, rid) {
        Ok(value) if value >= 0 => Ok(Some(value)),
        Ok(_) => Ok(None),
        Err(CoreError::MethodNotAllowed) | Err(CoreError::NotFound) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Periods stored in the Server object (DefaultPmin/DefaultPmax), without
/// any fallback applied.
pub fn server_stored_attrs(dm: &DataModel, ssid: Ssid) -> CoreResult<Attributes> {
    let mut out = Attributes::default();
    match query::find_server_iid(dm, ssid) {
        Err(_) => {
            warn!("could not find Server IID for Short Server ID {ssid}");
        },
        Ok(server_iid) => {
            out.min_period = read_server_period(dm, server_iid, RID_SERVER_DEFAULT_PMIN)?;
            out.max_period = read_server_period(dm, server_iid, RID_SERVER_DEFAULT_PMAX)?;
        },
    }
    Ok(out)
}

/// Combines the Server object's DefaultPmin/DefaultPmax into `out` and
/// applies the final `pmin` fallback.
pub fn combine_server_attrs(dm: &DataModel, ssid: Ssid, out: &mut Attributes) -> CoreResult<()> {
    if out.min_period.is_none() || out.max_period.is_none() {
        let server = server_stored_attrs(dm, ssid)?;
        out.combine(&server);
    }
    if out.min_period.is_none() {
        out.min_period = Some(DEFAULT_PMIN_S);
    }
    Ok(())
}

/// Resolves the effective attribute set for a path. Presence of the path
/// is the caller's responsibility.
pub fn effective_attrs(dm: &DataModel, query: &AttrsQuery<'_>) -> CoreResult<Attributes> {
    let mut out = Attributes::default();

    if let Some(rid) = query.rid {
        let iid = query.iid.ok_or(CoreError::Internal)?;
        let attrs = query
            .obj
            .borrow_mut()
            .resource_read_attrs(iid, rid, query.ssid)?;
        out.combine(&attrs);
    }

    if let Some(iid) = query.iid
        && !out.is_full()
    {
        let attrs = query
            .obj
            .borrow_mut()
            .instance_read_default_attrs(iid, query.ssid)?;
        out.combine(&attrs);
    }

    if !out.is_full() {
        let attrs = query.obj.borrow_mut().object_read_default_attrs(query.ssid)?;
        out.combine(&attrs);
    }

    if query.with_server_defaults {
        combine_server_attrs(dm, query.ssid, &mut out)?;
    }
    Ok(out)
}
