// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Lookups into the Security and Server objects.

use tracing::error;

use crate::{
    dm::{
        self, DataModel, Iid, IID_INVALID, OID_SECURITY, OID_SERVER,
        RID_SECURITY_BOOTSTRAP, RID_SECURITY_SERVER_URI, RID_SECURITY_SSID,
        RID_SERVER_BINDING, RID_SERVER_LIFETIME, RID_SERVER_NOTIFICATION_STORING,
        RID_SERVER_SSID, Ssid, SSID_ANY, SSID_BOOTSTRAP,
    },
    errors::{CoreError, CoreResult},
};

/// Registration lifetime used when the Server object does not provide one.
pub const DEFAULT_LIFETIME_S: i64 = 86400;

/// Finds the Server object instance with a matching Short Server ID.
pub fn find_server_iid(dm: &DataModel, ssid: Ssid) -> CoreResult<Iid> {
    if ssid == SSID_ANY || ssid == SSID_BOOTSTRAP {
        return Err(CoreError::NotFound);
    }
    let obj = dm.find(OID_SERVER).ok_or(CoreError::NotFound)?;
    let iids = obj.borrow_mut().instance_iter()?;
    for iid in iids {
        let found = dm::res_read_i64(dm, OID_SERVER, iid, RID_SERVER_SSID)?;
        if found == i64::from(ssid) {
            return Ok(iid);
        }
    }
    Err(CoreError::NotFound)
}

/// True when the Security instance carries the Bootstrap-Server flag.
pub fn is_bootstrap_security_instance(dm: &DataModel, security_iid: Iid) -> bool {
    dm::res_read_bool(dm, OID_SECURITY, security_iid, RID_SECURITY_BOOTSTRAP)
        .unwrap_or(false)
}

/// Finds the Security object instance for `ssid` (or the bootstrap
/// instance when `ssid` is the Bootstrap SSID).
pub fn find_security_iid(dm: &DataModel, ssid: Ssid) -> CoreResult<Iid> {
    let obj = dm.find(OID_SECURITY).ok_or(CoreError::NotFound)?;
    let iids = obj.borrow_mut().instance_iter()?;
    let looking_for_bootstrap = ssid == SSID_BOOTSTRAP;
    for iid in iids {
        let is_bootstrap = is_bootstrap_security_instance(dm, iid);
        if looking_for_bootstrap != is_bootstrap {
            continue;
        }
        if !is_bootstrap {
            let found = dm::res_read_i64(dm, OID_SECURITY, iid, RID_SECURITY_SSID)?;
            if found != i64::from(ssid) {
                continue;
            }
        }
        return Ok(iid);
    }
    Err(CoreError::NotFound)
}

pub fn ssid_from_security_iid(dm: &DataModel, security_iid: Iid) -> CoreResult<Ssid> {
    if is_bootstrap_security_instance(dm, security_iid) {
        return Ok(SSID_BOOTSTRAP);
    }
    let ssid = dm::res_read_i64(dm, OID_SECURITY, security_iid, RID_SECURITY_SSID)?;
    if ssid <= 0 || ssid >= i64::from(IID_INVALID) {
        error!("could not get Short Server ID from Security instance {security_iid}");
        return Err(CoreError::BadRequest);
    }
    Ok(ssid as Ssid)
}

pub fn security_uri(dm: &DataModel, security_iid: Iid) -> CoreResult<String> {
    dm::res_read_string(dm, OID_SECURITY, security_iid, RID_SECURITY_SERVER_URI)
}

/// Registration lifetime from the Server object, with the spec default.
pub fn server_lifetime(dm: &DataModel, ssid: Ssid) -> i64 {
    find_server_iid(dm, ssid)
        .and_then(|iid| dm::res_read_i64(dm, OID_SERVER, iid, RID_SERVER_LIFETIME))
        .ok()
        .filter(|lifetime| *lifetime > 0)
        .unwrap_or(DEFAULT_LIFETIME_S)
}

/// Binding mode string from the Server object; `"U"` when unset.
pub fn server_binding(dm: &DataModel, ssid: Ssid) -> String {
    find_server_iid(dm, ssid)
        .and_then(|iid| dm::res_read_string(dm, OID_SERVER, iid, RID_SERVER_BINDING))
        .unwrap_or_else(|_| "U".to_string())
}

/// "Notification Storing When Disabled or Offline": defaults to true, only
/// an explicitly stored `false` disables storing.
pub fn notification_storing_enabled(dm: &DataModel, ssid: Ssid) -> bool {
    match find_server_iid(dm, ssid) {
        Ok(iid) => dm::res_read_bool(dm, OID_SERVER, iid, RID_SERVER_NOTIFICATION_STORING)
            .unwrap_or(true),
        Err(_) => true,
    }
}
