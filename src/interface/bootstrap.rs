// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Bootstrap collaborator seam.
//!
//! Requests arriving on the Bootstrap Server connection bypass the
//! Management Interface and are forwarded here. The built-in policy
//! covers the Delete family (including "delete everything deletable") and
//! Bootstrap Finish; a full bootstrap sequencer can be plugged in through
//! the same trait.

use bytes::Bytes;
use tracing::{debug, info};

use crate::{
    coap::msg::MsgDetails,
    dm::{self, DataModel, notify::NotifyQueue, ObjectRc, UriPath},
    errors::{CoreError, CoreResult},
    interface::{management::Response, request::{Action, Request}},
};

pub trait BootstrapPolicy {
    /// Handles one request received from the Bootstrap Server.
    fn perform(
        &mut self,
        dm: &mut DataModel,
        notify: &mut NotifyQueue,
        req: &Request,
        payload: &Bytes,
    ) -> CoreResult<Response>;

    /// Called when the Bootstrap Server connection was re-established
    /// during a scheduled update.
    fn update_reconnected(&mut self) -> CoreResult<()> {
        Ok(())
    }
}

/// Deletes all instances of one object; objects without an
/// `instance_remove` handler do not count as deletable.
fn delete_object_instances(
    obj: &ObjectRc,
    notify: &mut NotifyQueue,
) -> CoreResult<()> {
    let oid = obj.borrow().oid();
    let instances = obj.borrow_mut().instance_iter()?;
    for iid in instances {
        match obj.borrow_mut().instance_remove(iid) {
            Ok(()) => notify.queue_instance_change(oid),
            Err(CoreError::MethodNotAllowed) => {
                debug!("object /{oid} is not deletable, skipping");
                return Ok(());
            },
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Default bootstrap behaviour: Delete and Bootstrap Finish.
#[derive(Debug, Default)]
pub struct DefaultBootstrap;

impl BootstrapPolicy for DefaultBootstrap {
    fn perform(
        &mut self,
        dm: &mut DataModel,
        notify: &mut NotifyQueue,
        req: &Request,
        _payload: &Bytes,
    ) -> CoreResult<Response> {
        match req.action {
            Action::Delete => {
                match req.uri {
                    UriPath::Root => {
                        info!("Bootstrap Delete /");
                        let objects: Vec<ObjectRc> = dm.objects().cloned().collect();
                        for obj in objects {
                            delete_object_instances(&obj, notify)?;
                        }
                    },
                    UriPath::Object(oid) => {
                        let obj = dm.find(oid).ok_or(CoreError::NotFound)?;
                        delete_object_instances(&obj, notify)?;
                    },
                    UriPath::Instance(oid, iid) => {
                        let obj = dm.find(oid).ok_or(CoreError::NotFound)?;
                        dm::ensure_instance_present(&obj, iid)?;
                        obj.borrow_mut().instance_remove(iid)?;
                        notify.queue_instance_change(oid);
                    },
                    UriPath::Resource(..) => return Err(CoreError::BadRequest),
                }
                Ok(Response::empty(MsgDetails::response(
                    Action::Delete.success_code(),
                )))
            },
            Action::BootstrapFinish => {
                info!("Bootstrap Sequence finished");
                Ok(Response::empty(MsgDetails::response(
                    Action::BootstrapFinish.success_code(),
                )))
            },
            Action::CancelObserve => Ok(Response::empty(MsgDetails::response(
                Action::CancelObserve.success_code(),
            ))),
            _ => {
                debug!("unsupported bootstrap action: {:?}", req.action);
                Err(CoreError::MethodNotAllowed)
            },
        }
    }
}
