// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Data-model facade: the registry of Objects and the typed helpers the
//! rest of the core uses to reach into them.
//!
//! Objects are registered as `Rc<RefCell<dyn ObjectHandler>>`; the facade
//! never holds a borrow across a call into another object, which keeps the
//! single-threaded re-entrancy rules enforceable at runtime.

use std::{cell::RefCell, fmt, rc::Rc};

use bitflags::bitflags;
use tracing::{debug, error};

use crate::{
    dm::attributes::Attributes,
    errors::{CoreError, CoreResult},
    io::{
        CaptureOutput, IdKind, InputCtx, InputSink, OutputCtx, OutputSink, TlvInput,
        TlvOutput, Value,
    },
};

pub mod attributes;
pub mod execute;
pub mod notify;
pub mod query;

pub type Oid = u16;
pub type Iid = u16;
pub type Rid = u16;
pub type Ssid = u16;

/// 65535 is reserved; it doubles as the IID wildcard in observation keys.
pub const IID_INVALID: Iid = u16::MAX;
/// Short Server ID reserved for the Bootstrap Server.
pub const SSID_BOOTSTRAP: Ssid = 0;
/// Sentinel meaning "all servers" in user-facing APIs.
pub const SSID_ANY: Ssid = u16::MAX;

pub const OID_SECURITY: Oid = 0;
pub const OID_SERVER: Oid = 1;
pub const OID_ACCESS_CONTROL: Oid = 2;

pub const RID_SECURITY_SERVER_URI: Rid = 0;
pub const RID_SECURITY_BOOTSTRAP: Rid = 1;
pub const RID_SECURITY_MODE: Rid = 2;
pub const RID_SECURITY_PK_OR_IDENTITY: Rid = 3;
pub const RID_SECURITY_SERVER_PK: Rid = 4;
pub const RID_SECURITY_SECRET_KEY: Rid = 5;
pub const RID_SECURITY_SSID: Rid = 10;

pub const RID_SERVER_SSID: Rid = 0;
pub const RID_SERVER_LIFETIME: Rid = 1;
pub const RID_SERVER_DEFAULT_PMIN: Rid = 2;
pub const RID_SERVER_DEFAULT_PMAX: Rid = 3;
pub const RID_SERVER_DISABLE_TIMEOUT: Rid = 5;
pub const RID_SERVER_NOTIFICATION_STORING: Rid = 6;
pub const RID_SERVER_BINDING: Rid = 7;

pub const RID_ACCESS_CONTROL_OID: Rid = 0;
pub const RID_ACCESS_CONTROL_OIID: Rid = 1;
pub const RID_ACCESS_CONTROL_ACL: Rid = 2;
pub const RID_ACCESS_CONTROL_OWNER: Rid = 3;

/// Target of a Management Interface operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriPath {
    Root,
    Object(Oid),
    Instance(Oid, Iid),
    Resource(Oid, Iid, Rid),
}

impl UriPath {
    pub fn oid(&self) -> Option<Oid> {
        match self {
            UriPath::Root => None,
            UriPath::Object(oid)
            | UriPath::Instance(oid, _)
            | UriPath::Resource(oid, _, _) => Some(*oid),
        }
    }

    pub fn iid(&self) -> Option<Iid> {
        match self {
            UriPath::Instance(_, iid) | UriPath::Resource(_, iid, _) => Some(*iid),
            _ => None,
        }
    }

    pub fn rid(&self) -> Option<Rid> {
        match self {
            UriPath::Resource(_, _, rid) => Some(*rid),
            _ => None,
        }
    }
}

impl fmt::Display for UriPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UriPath::Root => write!(f, "/"),
            UriPath::Object(oid) => write!(f, "/{oid}"),
            UriPath::Instance(oid, iid) => write!(f, "/{oid}/{iid}"),
            UriPath::Resource(oid, iid, rid) => write!(f, "/{oid}/{iid}/{rid}"),
        }
    }
}

bitflags! {
    /// Operations a resource supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResourceOps: u8 {
        const READ = 1;
        const WRITE = 2;
        const EXECUTE = 4;
    }
}

/// The collaborator contract supplied by object plugins. Optional entries
/// come with degrading defaults: absent `resource_operations` permits all
/// operations, absent attribute storage reads back as "nothing stored",
/// absent mutators report `MethodNotAllowed`.
pub trait ObjectHandler {
    fn oid(&self) -> Oid;

    /// Supported Resource IDs, strictly ascending.
    fn supported_rids(&self) -> &[Rid];

    /// Present instances in data-model order. The order is observable: it
    /// is the tie-break for Access-Control lookups.
    fn instance_iter(&mut self) -> CoreResult<Vec<Iid>>;

    fn instance_present(&mut self, iid: Iid) -> CoreResult<bool> {
        Ok(self.instance_iter()?.contains(&iid))
    }

    fn instance_create(&mut self, _iid: Option<Iid>, _ssid: Ssid) -> CoreResult<Iid> {
        Err(CoreError::MethodNotAllowed)
    }

    fn instance_remove(&mut self, _iid: Iid) -> CoreResult<()> {
        Err(CoreError::MethodNotAllowed)
    }

    /// Clears all resources of an instance; precedes a full (non-update)
    /// Write.
    fn instance_reset(&mut self, _iid: Iid) -> CoreResult<()> {
        Err(CoreError::MethodNotAllowed)
    }

    fn instance_read_default_attrs(&mut self, _iid: Iid, _ssid: Ssid) -> CoreResult<Attributes> {
        Ok(Attributes::default())
    }

    fn instance_write_default_attrs(
        &mut self,
        _iid: Iid,
        _ssid: Ssid,
        _attrs: &Attributes,
    ) -> CoreResult<()> {
        Err(CoreError::MethodNotAllowed)
    }

    fn object_read_default_attrs(&mut self, _ssid: Ssid) -> CoreResult<Attributes> {
        Ok(Attributes::default())
    }

    fn object_write_default_attrs(&mut self, _ssid: Ssid, _attrs: &Attributes) -> CoreResult<()> {
        Err(CoreError::MethodNotAllowed)
    }

    fn resource_present(&mut self, iid: Iid, rid: Rid) -> CoreResult<bool>;

    fn resource_supported(&self, rid: Rid) -> bool {
        self.supported_rids().binary_search(&rid).is_ok()
    }

    fn resource_operations(&mut self, _rid: Rid) -> CoreResult<ResourceOps> {
        Ok(ResourceOps::all())
    }

    fn resource_read(&mut self, iid: Iid, rid: Rid, out: &mut dyn OutputCtx) -> CoreResult<()>;

    fn resource_write(
        &mut self,
        _iid: Iid,
        _rid: Rid,
        _input: &mut dyn InputCtx,
    ) -> CoreResult<()> {
        Err(CoreError::MethodNotAllowed)
    }

    fn resource_execute(
        &mut self,
        _iid: Iid,
        _rid: Rid,
        _args: &mut execute::ExecuteCtx<'_>,
    ) -> CoreResult<()> {
        Err(CoreError::MethodNotAllowed)
    }

    /// Number of instances of a multiple resource; `None` for single.
    fn resource_dim(&mut self, _iid: Iid, _rid: Rid) -> CoreResult<Option<usize>> {
        Ok(None)
    }

    fn resource_read_attrs(&mut self, _iid: Iid, _rid: Rid, _ssid: Ssid) -> CoreResult<Attributes> {
        Ok(Attributes::default())
    }

    fn resource_write_attrs(
        &mut self,
        _iid: Iid,
        _rid: Rid,
        _ssid: Ssid,
        _attrs: &Attributes,
    ) -> CoreResult<()> {
        Err(CoreError::MethodNotAllowed)
    }

    fn transaction_begin(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn transaction_validate(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn transaction_commit(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn transaction_rollback(&mut self) -> CoreResult<()> {
        Ok(())
    }
}

pub type ObjectRc = Rc<RefCell<dyn ObjectHandler>>;

/// Registry of objects, ordered by OID.
#[derive(Default)]
pub struct DataModel {
    objects: Vec<ObjectRc>,
}

impl DataModel {
    pub fn new() -> Self {
        DataModel::default()
    }

    /// Registers an object; fails with `AlreadyRegistered` on a duplicate
    /// OID and `BadObject` when `supported_rids` is not strictly ascending.
    pub fn register(&mut self, obj: ObjectRc) -> CoreResult<Oid> {
        let oid = obj.borrow().oid();
        {
            let handler = obj.borrow();
            let rids = handler.supported_rids();
            if rids.windows(2).any(|w| w[0] >= w[1]) {
                error!("supported_rids in /{oid} is not strictly ascending");
                return Err(CoreError::BadObject);
            }
        }
        let pos = match self.objects.binary_search_by(|o| o.borrow().oid().cmp(&oid)) {
            Ok(_) => {
                error!("data model object /{oid} already registered");
                return Err(CoreError::AlreadyRegistered);
            },
            Err(pos) => pos,
        };
        self.objects.insert(pos, obj);
        debug!("successfully registered object /{oid}");
        Ok(oid)
    }

    /// Unregisters by pointer equality, returning the OID.
    pub fn unregister(&mut self, obj: &ObjectRc) -> CoreResult<Oid> {
        let pos = self
            .objects
            .iter()
            .position(|o| Rc::ptr_eq(o, obj))
            .ok_or_else(|| {
                error!("object passed for unregister is not currently registered");
                CoreError::NotFound
            })?;
        let removed = self.objects.remove(pos);
        Ok(removed.borrow().oid())
    }

    pub fn find(&self, oid: Oid) -> Option<ObjectRc> {
        self.objects
            .binary_search_by(|o| o.borrow().oid().cmp(&oid))
            .ok()
            .map(|pos| Rc::clone(&self.objects[pos]))
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectRc> {
        self.objects.iter()
    }

    pub fn oids(&self) -> Vec<Oid> {
        self.objects.iter().map(|o| o.borrow().oid()).collect()
    }
}

/// Converts a presence probe into the usual tri-state contract.
pub fn map_present(present: bool) -> CoreResult<()> {
    if present { Ok(()) } else { Err(CoreError::NotFound) }
}

pub fn ensure_instance_present(obj: &ObjectRc, iid: Iid) -> CoreResult<()> {
    map_present(obj.borrow_mut().instance_present(iid)?)
}

pub fn ensure_resource_supported_and_present(
    obj: &ObjectRc,
    iid: Iid,
    rid: Rid,
) -> CoreResult<()> {
    if !obj.borrow().resource_supported(rid) {
        return Err(CoreError::NotFound);
    }
    map_present(obj.borrow_mut().resource_present(iid, rid)?)
}

/// Checks a resource's operation mask; handler failures deny the
/// operation.
pub fn resource_op_allowed(obj: &ObjectRc, rid: Rid, op: ResourceOps) -> bool {
    let operations = obj.borrow_mut().resource_operations(rid);
    match operations {
        Ok(mask) => mask.contains(op),
        Err(_) => {
            error!("resource_operations for /{}/*/{rid} failed", obj.borrow().oid());
            false
        },
    }
}

/// Reads one resource into a captured [`Value`].
pub fn res_read_value(dm: &DataModel, oid: Oid, iid: Iid, rid: Rid) -> CoreResult<Value> {
    let obj = dm.find(oid).ok_or(CoreError::NotFound)?;
    ensure_resource_supported_and_present(&obj, iid, rid)?;
    let mut capture = CaptureOutput::new();
    capture.set_id(IdKind::Rid, rid)?;
    obj.borrow_mut().resource_read(iid, rid, &mut capture)?;
    capture.value.ok_or(CoreError::Internal)
}

pub fn res_read_i64(dm: &DataModel, oid: Oid, iid: Iid, rid: Rid) -> CoreResult<i64> {
    match res_read_value(dm, oid, iid, rid)? {
        Value::Int(v) => Ok(v),
        _ => Err(CoreError::BadRequest),
    }
}

pub fn res_read_bool(dm: &DataModel, oid: Oid, iid: Iid, rid: Rid) -> CoreResult<bool> {
    match res_read_value(dm, oid, iid, rid)? {
        Value::Bool(v) => Ok(v),
        _ => Err(CoreError::BadRequest),
    }
}

pub fn res_read_string(dm: &DataModel, oid: Oid, iid: Iid, rid: Rid) -> CoreResult<String> {
    match res_read_value(dm, oid, iid, rid)? {
        Value::Str(v) => Ok(v),
        _ => Err(CoreError::BadRequest),
    }
}

/// Reads a resource back as an input context by round-tripping it through
/// the TLV codec; the Access-Control evaluator walks ACL arrays this way.
pub fn read_as_input(dm: &DataModel, oid: Oid, iid: Iid, rid: Rid) -> CoreResult<InputSink> {
    let obj = dm.find(oid).ok_or(CoreError::NotFound)?;
    ensure_resource_supported_and_present(&obj, iid, rid)?;
    let mut out = OutputSink::Tlv(TlvOutput::new());
    out.set_id(IdKind::Rid, rid)?;
    obj.borrow_mut().resource_read(iid, rid, &mut out)?;
    let bytes = out.finish();
    Ok(InputSink::Tlv(TlvInput::parse(&bytes)?))
}
