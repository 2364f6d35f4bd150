// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Access-Control evaluator.
//!
//! Maps `(SSID, action, target)` to a verdict using Access-Control object
//! instances. With no Access-Control object registered, or at most one
//! non-bootstrap server known, everything is allowed; the Security object
//! is never accessible to servers.

use bitflags::bitflags;
use tracing::error;

use crate::{
    dm::{
        self, DataModel, Iid, IID_INVALID, OID_ACCESS_CONTROL, OID_SECURITY, Oid,
        RID_ACCESS_CONTROL_ACL, RID_ACCESS_CONTROL_OID, RID_ACCESS_CONTROL_OIID,
        RID_ACCESS_CONTROL_OWNER, Ssid, SSID_BOOTSTRAP,
    },
    errors::{CoreError, CoreResult},
    interface::request::Action,
    io::{IdKind, InputCtx},
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessMask: u16 {
        const READ = 1;
        const WRITE = 2;
        const EXECUTE = 4;
        const DELETE = 8;
        const CREATE = 16;
    }
}

/// One Management Interface action against one target.
#[derive(Debug, Clone, Copy)]
pub struct ActionInfo {
    pub ssid: Ssid,
    pub oid: Oid,
    pub iid: Option<Iid>,
    pub action: Action,
}

fn read_ac_u16(dm: &DataModel, ac_iid: Iid, rid: u16) -> CoreResult<u16> {
    let value = dm::res_read_i64(dm, OID_ACCESS_CONTROL, ac_iid, rid)?;
    u16::try_from(value).map_err(|_| {
        error!("Access Control resource value overflow");
        CoreError::BadRequest
    })
}

/// Scans an ACL multi-resource for `ssid`. Returns the matched SSID key
/// (the exact one, 0 for the default entry, `u16::MAX` when the ACL is
/// empty) and the mask it carries.
fn acl_lookup(input: &mut dyn InputCtx, ssid: Ssid) -> CoreResult<(Ssid, AccessMask)> {
    match input.get_id()? {
        Some((IdKind::Rid, _)) => input.enter()?,
        _ => return Err(CoreError::BadRequest),
    }
    let mut matched: Ssid = u16::MAX;
    let mut mask = AccessMask::empty();
    let mut entries = 0u32;
    while let Some((kind, key)) = input.get_id()? {
        if kind != IdKind::Riid {
            return Err(CoreError::BadRequest);
        }
        if key == ssid || key == 0 {
            let raw = input.read_i64()?;
            matched = key;
            mask = AccessMask::from_bits_truncate(raw as u16);
            if key != 0 {
                // Exact match beats the default entry.
                return Ok((matched, mask));
            }
        }
        entries += 1;
        input.next_entry()?;
    }
    if entries == 0 {
        matched = u16::MAX;
    } else if matched == u16::MAX {
        matched = 0;
        mask = AccessMask::empty();
    }
    Ok((matched, mask))
}

struct MaskQuery {
    oid: Oid,
    oiid: Iid,
    ssid: Ssid,
    is_bootstrap: bool,
}

/// Walks Access-Control instances in data-model order; the first instance
/// matching the target decides (iteration order is the tie-break).
fn access_control_mask(dm: &DataModel, query: &MaskQuery) -> AccessMask {
    let Some(ac) = dm.find(OID_ACCESS_CONTROL) else {
        return AccessMask::empty();
    };
    let Ok(instances) = ac.borrow_mut().instance_iter() else {
        return AccessMask::empty();
    };

    let mut result = AccessMask::empty();
    for ac_iid in instances {
        let (Ok(oid), Ok(oiid), Ok(owner)) = (
            read_ac_u16(dm, ac_iid, RID_ACCESS_CONTROL_OID),
            read_ac_u16(dm, ac_iid, RID_ACCESS_CONTROL_OIID),
            read_ac_u16(dm, ac_iid, RID_ACCESS_CONTROL_OWNER),
        ) else {
            return AccessMask::empty();
        };

        if oid != query.oid
            || oiid != query.oiid
            || query.is_bootstrap != (owner == SSID_BOOTSTRAP)
        {
            continue;
        }

        let Ok(mut input) =
            dm::read_as_input(dm, OID_ACCESS_CONTROL, ac_iid, RID_ACCESS_CONTROL_ACL)
        else {
            return AccessMask::empty();
        };
        let Ok((found_ssid, mask)) = acl_lookup(&mut input, query.ssid) else {
            error!("failed to read ACL of Access Control instance {ac_iid}");
            return AccessMask::empty();
        };

        if found_ssid == query.ssid {
            return mask;
        } else if found_ssid == u16::MAX {
            if owner == query.ssid {
                // Empty ACL: the owner gets everything except Create.
                return AccessMask::all() & !AccessMask::CREATE;
            }
        } else if found_ssid == 0 {
            // Default entry applies unless a later instance matches better.
            result = mask;
        }
    }
    result
}

fn can_instantiate(dm: &DataModel, info: &ActionInfo) -> bool {
    let mask = access_control_mask(
        dm,
        &MaskQuery {
            oid: info.oid,
            oiid: IID_INVALID,
            ssid: info.ssid,
            is_bootstrap: true,
        },
    );
    mask.contains(AccessMask::CREATE)
}

/// The evaluator entry point. `num_non_bootstrap_servers` counts every
/// known server except the Bootstrap one, active or not.
pub fn action_allowed(
    dm: &DataModel,
    num_non_bootstrap_servers: usize,
    info: &ActionInfo,
) -> bool {
    if info.oid == OID_SECURITY {
        return false;
    }
    if dm.find(OID_ACCESS_CONTROL).is_none() || num_non_bootstrap_servers <= 1 {
        return true;
    }

    if info.oid == OID_ACCESS_CONTROL {
        return match info.action {
            Action::Read | Action::Discover => true,
            Action::Create | Action::Delete => false,
            Action::WriteAttributes | Action::CancelObserve => true,
            _ => {
                let Some(iid) = info.iid else {
                    return false;
                };
                read_ac_u16(dm, iid, RID_ACCESS_CONTROL_OWNER)
                    .map(|owner| owner == info.ssid)
                    .unwrap_or(false)
            },
        };
    }

    if info.action == Action::Create {
        return can_instantiate(dm, info);
    }

    let mask = access_control_mask(
        dm,
        &MaskQuery {
            oid: info.oid,
            oiid: info.iid.unwrap_or(IID_INVALID),
            ssid: info.ssid,
            is_bootstrap: false,
        },
    );
    match info.action {
        Action::Read | Action::Discover => mask.contains(AccessMask::READ),
        Action::Write | Action::WriteUpdate => mask.contains(AccessMask::WRITE),
        Action::Execute => mask.contains(AccessMask::EXECUTE),
        Action::Delete => mask.contains(AccessMask::DELETE),
        Action::WriteAttributes | Action::CancelObserve => true,
        _ => false,
    }
}
