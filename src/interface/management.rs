// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Management Interface action handlers.
//!
//! `perform` routes a parsed request to the matching data-model action and
//! shapes the response. Write, Create and Delete run inside the target
//! object's transaction hooks; their data-model side effects are replayed
//! into the observation store before the response goes out.

use bytes::Bytes;
use tracing::{debug, error, warn};

use crate::{
    access::{self, ActionInfo},
    client::Lwm2mClient,
    coap::msg::{FORMAT_TLV, MsgDetails},
    dm::{
        self, DataModel, execute::ExecuteCtx, Iid, IID_INVALID,
        notify::NotifyQueue, ObjectRc, Rid, Ssid, UriPath,
    },
    errors::{CoreError, CoreResult},
    interface::{
        discover,
        request::{Action, CoapObserve, Request},
    },
    io::{IdKind, InputCtx, InputSink, OutputCtx, OutputSink, select_read_format},
    observe::{self, ConnKey, ObserveKey, RID_WILDCARD},
};

/// Result of a successfully handled request.
#[derive(Debug, Clone)]
pub struct Response {
    pub details: MsgDetails,
    pub payload: Bytes,
}

impl Response {
    pub fn empty(details: MsgDetails) -> Response {
        Response {
            details,
            payload: Bytes::new(),
        }
    }
}

fn action_info(req: &Request) -> ActionInfo {
    ActionInfo {
        ssid: req.ssid,
        oid: req.uri.oid().unwrap_or(0),
        iid: req.uri.iid(),
        action: req.action,
    }
}

fn check_access(client: &Lwm2mClient, info: &ActionInfo) -> CoreResult<()> {
    if access::action_allowed(&client.dm, client.servers.num_non_bootstrap(), info) {
        Ok(())
    } else {
        Err(CoreError::Unauthorized)
    }
}

fn read_present_resource(
    obj: &ObjectRc,
    iid: Iid,
    rid: Rid,
    out: &mut dyn OutputCtx,
) -> CoreResult<()> {
    if !dm::resource_op_allowed(obj, rid, dm::ResourceOps::READ) {
        error!("Read /{}/*/{rid} is not supported", obj.borrow().oid());
        return Err(CoreError::MethodNotAllowed);
    }
    out.set_id(IdKind::Rid, rid)?;
    obj.borrow_mut().resource_read(iid, rid, out)
}

fn read_resource(
    obj: &ObjectRc,
    iid: Iid,
    rid: Rid,
    out: &mut dyn OutputCtx,
) -> CoreResult<()> {
    dm::ensure_resource_supported_and_present(obj, iid, rid)?;
    read_present_resource(obj, iid, rid, out)
}

fn read_instance(obj: &ObjectRc, iid: Iid, out: &mut dyn OutputCtx) -> CoreResult<()> {
    let rids = obj.borrow().supported_rids().to_vec();
    for rid in rids {
        let result = dm::ensure_resource_supported_and_present(obj, iid, rid)
            .and_then(|()| read_present_resource(obj, iid, rid, out));
        match result {
            Ok(())
            | Err(CoreError::MethodNotAllowed)
            | Err(CoreError::NotFound) => {},
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn read_object(
    dm: &DataModel,
    num_servers: usize,
    obj: &ObjectRc,
    oid: u16,
    ssid: Ssid,
    out: &mut dyn OutputCtx,
) -> CoreResult<()> {
    let instances = obj.borrow_mut().instance_iter()?;
    for iid in instances {
        let info = ActionInfo {
            ssid,
            oid,
            iid: Some(iid),
            action: Action::Read,
        };
        if !access::action_allowed(dm, num_servers, &info) {
            continue;
        }
        out.begin_instance(iid)?;
        read_instance(obj, iid, out)?;
        out.end_instance()?;
    }
    Ok(())
}

/// Reads `uri` into `out`, applying presence and access checks. Shared by
/// the Read action and the observe engine.
pub(crate) fn dm_read_into(
    dm: &DataModel,
    num_servers: usize,
    ssid: Ssid,
    uri: UriPath,
    out: &mut dyn OutputCtx,
) -> CoreResult<()> {
    debug!("Read {uri}");
    let oid = uri.oid().ok_or(CoreError::BadRequest)?;
    let obj = dm.find(oid).ok_or(CoreError::NotFound)?;
    match uri {
        UriPath::Resource(_, iid, rid) => {
            dm::ensure_instance_present(&obj, iid)?;
            let info = ActionInfo {
                ssid,
                oid,
                iid: Some(iid),
                action: Action::Read,
            };
            if !access::action_allowed(dm, num_servers, &info) {
                return Err(CoreError::Unauthorized);
            }
            read_resource(&obj, iid, rid, out)?;
            if !out.produced() {
                error!("no value produced during successful resource read of {uri}");
                return Err(CoreError::Internal);
            }
            Ok(())
        },
        UriPath::Instance(_, iid) => {
            dm::ensure_instance_present(&obj, iid)?;
            let info = ActionInfo {
                ssid,
                oid,
                iid: Some(iid),
                action: Action::Read,
            };
            if !access::action_allowed(dm, num_servers, &info) {
                return Err(CoreError::Unauthorized);
            }
            read_instance(&obj, iid, out)
        },
        UriPath::Object(_) => read_object(dm, num_servers, &obj, oid, ssid, out),
        UriPath::Root => Err(CoreError::BadRequest),
    }
}

fn observe_key_of(req: &Request) -> (ConnKey, ObserveKey) {
    (
        ConnKey {
            ssid: req.ssid,
            conn_type: req.conn_type,
        },
        ObserveKey {
            oid: req.uri.oid().unwrap_or(0),
            iid: req.uri.iid().unwrap_or(IID_INVALID),
            rid: req.uri.rid().map_or(RID_WILDCARD, i32::from),
            format: req.requested_format,
        },
    )
}

fn dm_observe(client: &mut Lwm2mClient, req: &Request) -> CoreResult<Response> {
    debug!("Observe {}", req.uri);
    let (conn, key) = observe_key_of(req);
    let (details, numeric, payload) = observe::read_for_observe(client, req.ssid, &key)?;
    observe::observe_put_entry(
        client,
        conn,
        key,
        &details,
        &req.identity,
        numeric,
        &payload,
    )?;
    Ok(Response { details, payload })
}

fn dm_read(client: &mut Lwm2mClient, req: &Request) -> CoreResult<Response> {
    let format = select_read_format(req.requested_format, req.uri.rid().is_some())?;
    let mut sink = OutputSink::for_format(format)?;
    dm_read_into(
        &client.dm,
        client.servers.num_non_bootstrap(),
        req.ssid,
        req.uri,
        &mut sink,
    )?;
    let payload = sink.finish();
    let mut details = MsgDetails::response(Action::Read.success_code());
    details.format = format;
    Ok(Response { details, payload })
}

fn dm_read_or_observe(client: &mut Lwm2mClient, req: &Request) -> CoreResult<Response> {
    match req.observe {
        CoapObserve::Register => dm_observe(client, req),
        CoapObserve::Deregister => {
            let (conn, key) = observe_key_of(req);
            observe::observe_remove_entry(client, conn, key);
            dm_read(client, req)
        },
        CoapObserve::None => dm_read(client, req),
    }
}

fn write_present_resource(
    obj: &ObjectRc,
    iid: Iid,
    rid: Rid,
    input: &mut dyn InputCtx,
    notify: Option<&mut NotifyQueue>,
) -> CoreResult<()> {
    if !dm::resource_op_allowed(obj, rid, dm::ResourceOps::WRITE) {
        error!("Write /{}/*/{rid} is not supported", obj.borrow().oid());
        return Err(CoreError::MethodNotAllowed);
    }
    obj.borrow_mut().resource_write(iid, rid, input)?;
    if let Some(queue) = notify {
        queue.queue_resource_change(obj.borrow().oid(), iid, rid);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnsupportedRidHint {
    Fail,
    /// Create silently skips RIDs the object does not support.
    Ignore,
}

fn write_instance_impl(
    obj: &ObjectRc,
    iid: Iid,
    input: &mut dyn InputCtx,
    mut notify: Option<&mut NotifyQueue>,
    hint: UnsupportedRidHint,
) -> CoreResult<()> {
    while let Some((kind, id)) = input.get_id()? {
        if kind != IdKind::Rid {
            return Err(CoreError::BadRequest);
        }
        let supported = obj.borrow().resource_supported(id);
        if !supported && hint == UnsupportedRidHint::Fail {
            return Err(CoreError::NotFound);
        }
        if supported {
            write_present_resource(obj, iid, id, input, notify.as_deref_mut())?;
        }
        input.next_entry()?;
    }
    Ok(())
}

fn write_instance(
    obj: &ObjectRc,
    iid: Iid,
    input: &mut dyn InputCtx,
    notify: Option<&mut NotifyQueue>,
    hint: UnsupportedRidHint,
) -> CoreResult<()> {
    match input.get_id()? {
        None => Ok(()),
        Some((IdKind::Iid, id)) => {
            if id != iid {
                warn!(
                    "attempted Write with IID {iid} in Uri-Path but {id} in content header"
                );
                return Err(CoreError::BadRequest);
            }
            input.enter()?;
            write_instance_impl(obj, iid, input, notify, hint)?;
            input.leave()?;
            if input.get_id()?.is_some() {
                return Err(CoreError::BadRequest);
            }
            Ok(())
        },
        Some(_) => write_instance_impl(obj, iid, input, notify, hint),
    }
}

fn check_tlv_rid_matches_uri_rid(input: &mut dyn InputCtx, uri_rid: Rid) -> CoreResult<()> {
    match input.get_id()? {
        Some((IdKind::Rid, id)) if id == uri_rid => Ok(()),
        _ => Err(CoreError::BadRequest),
    }
}

fn dm_write(
    client: &mut Lwm2mClient,
    obj: &ObjectRc,
    req: &Request,
    input: &mut InputSink,
) -> CoreResult<()> {
    debug!("Write {}", req.uri);
    let Some(iid) = req.uri.iid() else {
        return Err(CoreError::MethodNotAllowed);
    };

    let mut queue = NotifyQueue::new();
    dm::ensure_instance_present(obj, iid)?;
    check_access(client, &action_info(req))?;

    if let Some(rid) = req.uri.rid() {
        if req.content_format == FORMAT_TLV {
            check_tlv_rid_matches_uri_rid(input, rid)?;
        }
        if !obj.borrow().resource_supported(rid) {
            return Err(CoreError::NotFound);
        }
        write_present_resource(obj, iid, rid, input, Some(&mut queue))?;
    } else {
        if req.action != Action::WriteUpdate {
            obj.borrow_mut().instance_reset(iid)?;
        }
        write_instance(obj, iid, input, Some(&mut queue), UnsupportedRidHint::Fail)?;
    }

    observe::notify_perform(client, req.ssid, queue.take())
}

fn create_inner(
    obj: &ObjectRc,
    proposed_iid: Option<Iid>,
    ssid: Ssid,
    input: &mut dyn InputCtx,
) -> CoreResult<Iid> {
    let new_iid = obj.borrow_mut().instance_create(proposed_iid, ssid)?;
    if new_iid == IID_INVALID {
        debug!("Instance Create handler for object {} failed", obj.borrow().oid());
        return Err(CoreError::Internal);
    }
    if let Some(proposed) = proposed_iid
        && new_iid != proposed
    {
        debug!(
            "Instance Create handler returned instance {new_iid} while {proposed} was expected"
        );
        return Err(CoreError::Internal);
    }
    write_instance_impl(obj, new_iid, input, None, UnsupportedRidHint::Ignore)?;
    Ok(new_iid)
}

fn dm_create(
    client: &mut Lwm2mClient,
    obj: &ObjectRc,
    req: &Request,
    input: &mut InputSink,
) -> CoreResult<Response> {
    debug!("Create {}", req.uri);
    if req.uri.rid().is_some() {
        return Err(CoreError::MethodNotAllowed);
    }
    check_access(client, &action_info(req))?;

    let oid = req.uri.oid().ok_or(CoreError::BadRequest)?;
    let new_iid = match input.get_id()? {
        Some((IdKind::Iid, proposed)) => {
            if proposed == IID_INVALID {
                return Err(CoreError::BadRequest);
            }
            if obj.borrow_mut().instance_present(proposed)? {
                debug!("instance /{oid}/{proposed} already exists");
                return Err(CoreError::BadRequest);
            }
            input.enter()?;
            let new_iid = create_inner(obj, Some(proposed), req.ssid, input)?;
            input.leave()?;
            if input.get_id()?.is_some() {
                debug!("more than one Object Instance in Object Create payload");
                return Err(CoreError::BadRequest);
            }
            new_iid
        },
        _ => create_inner(obj, None, req.ssid, input)?,
    };
    debug!("created: /{oid}/{new_iid}");

    let mut queue = NotifyQueue::new();
    queue.queue_instance_change(oid);
    observe::notify_perform(client, req.ssid, queue.take())?;

    let mut details = MsgDetails::response(Action::Create.success_code());
    details.location_path = vec![oid.to_string(), new_iid.to_string()];
    Ok(Response::empty(details))
}

fn dm_delete(client: &mut Lwm2mClient, obj: &ObjectRc, req: &Request) -> CoreResult<()> {
    debug!("Delete {}", req.uri);
    let Some(iid) = req.uri.iid() else {
        return Err(CoreError::MethodNotAllowed);
    };
    if req.uri.rid().is_some() {
        return Err(CoreError::MethodNotAllowed);
    }
    dm::ensure_instance_present(obj, iid)?;
    check_access(client, &action_info(req))?;
    obj.borrow_mut().instance_remove(iid)?;

    let mut queue = NotifyQueue::new();
    queue.queue_instance_change(req.uri.oid().ok_or(CoreError::BadRequest)?);
    observe::notify_perform(client, req.ssid, queue.take())
}

fn dm_execute(
    client: &mut Lwm2mClient,
    obj: &ObjectRc,
    req: &Request,
    payload: &Bytes,
) -> CoreResult<()> {
    debug!("Execute {}", req.uri);
    let (Some(iid), Some(rid)) = (req.uri.iid(), req.uri.rid()) else {
        return Err(CoreError::MethodNotAllowed);
    };
    dm::ensure_instance_present(obj, iid)?;
    dm::ensure_resource_supported_and_present(obj, iid, rid)?;
    check_access(client, &action_info(req))?;
    if !dm::resource_op_allowed(obj, rid, dm::ResourceOps::EXECUTE) {
        error!("Execute {} is not supported", req.uri);
        return Err(CoreError::MethodNotAllowed);
    }
    let mut args = ExecuteCtx::new(payload);
    obj.borrow_mut().resource_execute(iid, rid, &mut args)
}

fn dm_write_attributes(client: &mut Lwm2mClient, obj: &ObjectRc, req: &Request) -> CoreResult<()> {
    debug!("Write Attributes {}", req.uri);
    if req.attributes.is_empty() {
        return Ok(());
    }
    if req.uri.rid().is_none() && req.attributes.has_resource_specific() {
        return Err(CoreError::BadRequest);
    }

    if let Some(iid) = req.uri.iid() {
        dm::ensure_instance_present(obj, iid)?;
        if let Some(rid) = req.uri.rid() {
            dm::ensure_resource_supported_and_present(obj, iid, rid)?;
            let mut attrs = obj.borrow_mut().resource_read_attrs(iid, rid, req.ssid)?;
            req.attributes.apply_to(&mut attrs);
            if !attrs.resource_attrs_valid() {
                debug!("attempted to set attributes failing the 'lt + 2*st < gt' precondition");
                return Err(CoreError::BadRequest);
            }
            obj.borrow_mut().resource_write_attrs(iid, rid, req.ssid, &attrs)?;
        } else {
            let mut attrs = obj.borrow_mut().instance_read_default_attrs(iid, req.ssid)?;
            req.attributes.apply_to(&mut attrs);
            obj.borrow_mut()
                .instance_write_default_attrs(iid, req.ssid, &attrs)?;
        }
    } else {
        let mut attrs = obj.borrow_mut().object_read_default_attrs(req.ssid)?;
        req.attributes.apply_to(&mut attrs);
        obj.borrow_mut().object_write_default_attrs(req.ssid, &attrs)?;
    }

    // Let the observe code see the new attributes.
    observe::observe_notify(
        client,
        req.ssid,
        req.uri.oid().ok_or(CoreError::BadRequest)?,
        req.uri.iid(),
        req.uri.rid(),
        false,
    )
}

fn dm_discover(client: &mut Lwm2mClient, obj: &ObjectRc, req: &Request) -> CoreResult<Response> {
    debug!("Discover {}", req.uri);
    // Access Control checks are omitted: Discover is always allowed.
    let payload = discover::discover(&client.dm, obj, req.uri, req.ssid)?;
    let mut details = MsgDetails::response(Action::Discover.success_code());
    details.format = crate::coap::msg::FORMAT_LINK;
    Ok(Response {
        details,
        payload,
    })
}

fn invoke_transactional(
    client: &mut Lwm2mClient,
    obj: &ObjectRc,
    req: &Request,
    input: Option<&mut InputSink>,
) -> CoreResult<Response> {
    obj.borrow_mut().transaction_begin()?;
    let result = match req.action {
        Action::Write | Action::WriteUpdate => {
            let input = input.ok_or(CoreError::Internal)?;
            dm_write(client, obj, req, input)
                .map(|()| Response::empty(MsgDetails::response(req.action.success_code())))
        },
        Action::Create => {
            let input = input.ok_or(CoreError::Internal)?;
            dm_create(client, obj, req, input)
        },
        Action::Delete => dm_delete(client, obj, req)
            .map(|()| Response::empty(MsgDetails::response(req.action.success_code()))),
        _ => {
            error!("invalid transactional action");
            Err(CoreError::MethodNotAllowed)
        },
    };

    match result {
        Ok(response) => {
            let mut validated = obj.borrow_mut().transaction_validate();
            if validated.is_ok() {
                validated = obj.borrow_mut().transaction_commit();
            }
            match validated {
                Ok(()) => Ok(response),
                Err(err) => {
                    let _ = obj.borrow_mut().transaction_rollback();
                    Err(err)
                },
            }
        },
        Err(err) => {
            let _ = obj.borrow_mut().transaction_rollback();
            Err(err)
        },
    }
}

/// Routes a parsed Management Interface request to its handler.
pub fn perform(client: &mut Lwm2mClient, req: &Request, payload: &Bytes) -> CoreResult<Response> {
    let obj = match req.uri.oid() {
        Some(oid) => Some(client.dm.find(oid).ok_or_else(|| {
            error!("object not found: /{oid}");
            CoreError::NotFound
        })?),
        None if req.action != Action::CancelObserve => {
            error!("at least Object ID must be present in Uri-Path");
            return Err(CoreError::BadRequest);
        },
        None => None,
    };

    match req.action {
        Action::Read => dm_read_or_observe(client, req),
        Action::Discover => {
            let obj = obj.ok_or(CoreError::BadRequest)?;
            dm_discover(client, &obj, req)
        },
        Action::Write | Action::WriteUpdate | Action::Create | Action::Delete => {
            let obj = obj.ok_or(CoreError::BadRequest)?;
            let mut input = match req.action {
                Action::Delete => None,
                _ => Some(InputSink::for_format(req.content_format, payload.clone())?),
            };
            invoke_transactional(client, &obj, req, input.as_mut())
        },
        Action::WriteAttributes => {
            let obj = obj.ok_or(CoreError::BadRequest)?;
            dm_write_attributes(client, &obj, req)
                .map(|()| Response::empty(MsgDetails::response(req.action.success_code())))
        },
        Action::Execute => {
            let obj = obj.ok_or(CoreError::BadRequest)?;
            dm_execute(client, &obj, req, payload)
                .map(|()| Response::empty(MsgDetails::response(req.action.success_code())))
        },
        Action::CancelObserve => {
            observe::observe_remove_by_msg_id(client, req.identity.msg_id);
            Ok(Response::empty(MsgDetails::response(req.action.success_code())))
        },
        Action::BootstrapFinish => {
            error!("Bootstrap Finish on the Management Interface");
            Err(CoreError::MethodNotAllowed)
        },
    }
}
