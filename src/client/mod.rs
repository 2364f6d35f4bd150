// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The library handle.
//!
//! One [`Lwm2mClient`] owns the scheduler, the data model, the observation
//! store, the server registry and the single shared CoAP channel. All
//! mutations happen either inside [`Lwm2mClient::serve`] or inside
//! [`Lwm2mClient::sched_run`], on the application's polling thread;
//! library entry points must not be re-entered from callbacks.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, warn};

use crate::{
    cfg::{config::Config, enums::SecurityMode},
    coap::{
        msg::{CoapMessage, MsgDetails, MsgIdentity, MsgType, observe_serial_value},
        stream::{CoapChannel, ResponseMessage},
    },
    dm::{
        self, notify::NotifyQueue, DataModel, Iid, ObjectRc, Oid, Rid,
        RID_SECURITY_MODE, Ssid, SSID_ANY, SSID_BOOTSTRAP,
    },
    errors::{CoreError, CoreResult},
    interface::{
        bootstrap::{BootstrapPolicy, DefaultBootstrap},
        management,
        request::{self, CoapObserve, Request},
    },
    net::{DtlsKeys, SocketFactory, StdSocketFactory},
    observe::{self, ConnKey, ObserveKey},
    sched::{Scheduler, TaskHandle},
    servers::{
        connection::ConnectionMode, register as registration, ServerInfo, ServerRegistry,
    },
    time::{Clock, SystemClock},
};

/// Everything the scheduler can be asked to do later. Tasks are plain
/// data; `sched_run` dispatches them against the client, which keeps
/// callbacks from capturing references into the handle.
#[derive(Debug, Clone)]
pub(crate) enum ClientTask {
    FlushNotifyQueue,
    ObserveTrigger { conn: ConnKey, key: ObserveKey },
    ObserveFlush { conn: ConnKey },
    SendUpdate { ssid: Ssid, reconnect: bool },
    Register { ssid: Ssid },
    SuspendSocket { ssid: Ssid },
    ReloadServers,
}

/// Platform collaborators a client is built on: the CoAP channel, the
/// socket factory, the clock and the bootstrap policy.
pub struct Platform {
    pub channel: Box<dyn CoapChannel>,
    pub sockets: Box<dyn SocketFactory>,
    pub clock: Box<dyn Clock>,
    pub bootstrap: Option<Box<dyn BootstrapPolicy>>,
}

impl Platform {
    /// Plain-UDP platform with the system clock and default bootstrap
    /// policy.
    pub fn new(channel: Box<dyn CoapChannel>) -> Platform {
        Platform {
            channel,
            sockets: Box::new(StdSocketFactory),
            clock: Box::new(SystemClock::new()),
            bootstrap: Some(Box::new(DefaultBootstrap)),
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Platform {
        self.clock = clock;
        self
    }

    pub fn with_sockets(mut self, sockets: Box<dyn SocketFactory>) -> Platform {
        self.sockets = sockets;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: Option<Box<dyn BootstrapPolicy>>) -> Platform {
        self.bootstrap = bootstrap;
        self
    }
}

pub struct Lwm2mClient {
    pub(crate) cfg: Config,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) sched: Scheduler<ClientTask>,
    pub(crate) dm: DataModel,
    pub(crate) notify_queue: NotifyQueue,
    pub(crate) notify_task: TaskHandle,
    pub(crate) observe: crate::observe::ObserveState,
    pub(crate) servers: ServerRegistry,
    pub(crate) channel: Box<dyn CoapChannel>,
    pub(crate) sockets: Box<dyn SocketFactory>,
    pub(crate) bootstrap: Option<Box<dyn BootstrapPolicy>>,
    pub(crate) offline: bool,
    pub(crate) reload_task: TaskHandle,
}

impl Lwm2mClient {
    pub fn new(cfg: Config, platform: Platform) -> anyhow::Result<Lwm2mClient> {
        cfg.validate()?;
        Ok(Lwm2mClient {
            cfg,
            clock: platform.clock,
            sched: Scheduler::new(),
            dm: DataModel::new(),
            notify_queue: NotifyQueue::new(),
            notify_task: TaskHandle::new(),
            observe: crate::observe::ObserveState::new(),
            servers: ServerRegistry::new(),
            channel: platform.channel,
            sockets: platform.sockets,
            bootstrap: platform.bootstrap,
            offline: false,
            reload_task: TaskHandle::new(),
        })
    }

    pub fn get_version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Number of active observation entries across all servers.
    pub fn observation_count(&self) -> usize {
        self.observe.entry_count()
    }

    // ── data model ────────────────────────────────────────────────────────

    /// Registers an object. Changes to the Security or Server objects also
    /// trigger a server-registry reload.
    pub fn register_object(&mut self, obj: ObjectRc) -> CoreResult<()> {
        let oid = self.dm.register(obj)?;
        if let Err(err) = self.notify_instances_changed(oid) {
            warn!("notify_instances_changed() failed on /{oid}: {err}");
        }
        if oid == dm::OID_SECURITY || oid == dm::OID_SERVER {
            self.schedule_servers_reload();
        }
        if let Err(err) = self.schedule_registration_update(SSID_ANY) {
            debug!("schedule_registration_update() failed: {err}");
        }
        Ok(())
    }

    /// Unregisters an object found by pointer equality. Connected
    /// observation state is torn down on the next trigger; the Bootstrap
    /// sink is notified synchronously.
    pub fn unregister_object(&mut self, obj: &ObjectRc) -> CoreResult<()> {
        let oid = self.dm.unregister(obj)?;
        if let Err(err) = observe::observe_notify(self, SSID_BOOTSTRAP, oid, None, None, true) {
            warn!("could not perform notifications about removed object /{oid}: {err}");
        }
        self.notify_queue.remove_oid(oid);
        if let Err(err) = self.schedule_registration_update(SSID_ANY) {
            debug!("schedule_registration_update() failed: {err}");
        }
        Ok(())
    }

    // ── notifications ─────────────────────────────────────────────────────

    /// Reports a resource value change to the observation machinery.
    pub fn notify_changed(&mut self, oid: Oid, iid: Iid, rid: Rid) -> CoreResult<()> {
        self.notify_queue.queue_resource_change(oid, iid, rid);
        self.ensure_notify_flush_scheduled();
        Ok(())
    }

    /// Reports that the instance set of an object changed.
    pub fn notify_instances_changed(&mut self, oid: Oid) -> CoreResult<()> {
        self.notify_queue.queue_instance_change(oid);
        self.ensure_notify_flush_scheduled();
        Ok(())
    }

    fn ensure_notify_flush_scheduled(&mut self) {
        if !self.notify_task.is_scheduled() {
            let now = self.clock.now();
            let handle = self.notify_task.clone();
            self.sched
                .schedule_now(now, &handle, ClientTask::FlushNotifyQueue);
        }
    }

    // ── scheduler ─────────────────────────────────────────────────────────

    /// Executes every task whose deadline has passed, in deadline order.
    pub fn sched_run(&mut self) -> CoreResult<i64> {
        let now = self.clock.now();
        let mut executed: i64 = 0;
        while let Some(task) = self.sched.pop_due(now) {
            executed += 1;
            let result = self.run_task(&task.payload);
            if let Err(err) = &result {
                debug!("scheduled task failed: {err}");
            }
            if result.is_err() && task.is_retryable() {
                self.sched.reschedule_retry(self.clock.now(), task);
            }
        }
        if executed > 0 {
            debug!("executed {executed} tasks");
        }
        Ok(executed)
    }

    pub fn sched_time_to_next(&self) -> CoreResult<Duration> {
        self.sched.time_to_next(self.clock.now())
    }

    /// Milliseconds until the next task, bounded by `limit_ms`.
    pub fn sched_calculate_wait_time_ms(&self, limit_ms: i64) -> i64 {
        match self.sched_time_to_next() {
            Ok(delay) => (delay.as_millis() as i64).min(limit_ms),
            Err(_) => limit_ms,
        }
    }

    fn run_task(&mut self, task: &ClientTask) -> CoreResult<()> {
        match task {
            ClientTask::FlushNotifyQueue => {
                let queue = self.notify_queue.take();
                observe::notify_perform(self, SSID_BOOTSTRAP, queue)
            },
            ClientTask::ObserveTrigger { conn, key } => {
                observe::observe_trigger(self, *conn, *key)
            },
            ClientTask::ObserveFlush { conn } => observe::observe_flush(self, *conn),
            ClientTask::SendUpdate { ssid, reconnect } => {
                registration::send_update_job(self, *ssid, *reconnect)
            },
            ClientTask::Register { ssid } => registration::register_job(self, *ssid),
            ClientTask::SuspendSocket { ssid } => {
                if let Some(server) = self.servers.find_mut(*ssid) {
                    server.udp_connection.suspend()?;
                }
                Ok(())
            },
            ClientTask::ReloadServers => registration::reload_servers(self),
        }
    }

    // ── registration ──────────────────────────────────────────────────────

    pub fn schedule_registration_update(&mut self, ssid: Ssid) -> CoreResult<()> {
        if self.offline {
            error!("cannot schedule registration update while being offline");
            return Err(CoreError::BadRequest);
        }
        if ssid == SSID_ANY {
            for active in self.servers.active_ssids() {
                registration::schedule_update(self, active, Duration::ZERO, false)?;
            }
            Ok(())
        } else if self.servers.is_active(ssid) {
            registration::schedule_update(self, ssid, Duration::ZERO, false)
        } else {
            error!("no active server with SSID = {ssid}");
            Err(CoreError::NotFound)
        }
    }

    /// Forces all connections to reconnect and leave offline mode.
    pub fn schedule_reconnect(&mut self) -> CoreResult<()> {
        let ssids = self.servers.active_ssids();
        for ssid in ssids {
            registration::schedule_update(self, ssid, Duration::ZERO, true)?;
        }
        self.offline = false;
        Ok(())
    }

    /// Closes every socket and stops registration traffic until
    /// [`Lwm2mClient::schedule_reconnect`].
    pub fn enter_offline(&mut self) -> CoreResult<()> {
        for server in self.servers.iter_mut() {
            server.udp_connection.suspend()?;
        }
        let handles: Vec<TaskHandle> = self
            .servers
            .iter()
            .map(|s| s.sched_update_handle.clone())
            .collect();
        for handle in handles {
            self.sched.del(&handle);
        }
        self.offline = true;
        Ok(())
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub(crate) fn schedule_servers_reload(&mut self) {
        let now = self.clock.now();
        let handle = self.reload_task.clone();
        self.sched.schedule_now(now, &handle, ClientTask::ReloadServers);
    }

    // ── sockets and the shared stream ─────────────────────────────────────

    /// Connections currently able to receive, for the application's poll
    /// loop.
    pub fn sockets(&self) -> Vec<ConnKey> {
        self.servers
            .iter()
            .filter(|s| s.active && s.udp_connection.is_online())
            .map(|s| ConnKey {
                ssid: s.ssid,
                conn_type: s.primary_conn_type,
            })
            .collect()
    }

    /// Makes sure the server's socket exists and is connected, creating or
    /// resuming it as needed.
    pub(crate) fn prepare_server_socket(&mut self, ssid: Ssid) -> CoreResult<()> {
        let security_iid = self
            .servers
            .find(ssid)
            .ok_or(CoreError::NotFound)?
            .security_iid;

        let mode = dm::res_read_i64(&self.dm, dm::OID_SECURITY, security_iid, RID_SECURITY_MODE)
            .ok()
            .and_then(SecurityMode::from_resource_value)
            .unwrap_or(SecurityMode::NoSec);
        let keys = if mode.is_secure() {
            self.read_dtls_keys(security_iid)
        } else {
            DtlsKeys::default()
        };

        let Lwm2mClient {
            servers,
            sockets,
            cfg,
            ..
        } = self;
        let server = servers.find_mut(ssid).ok_or(CoreError::NotFound)?;
        let ServerInfo {
            uri, udp_connection, ..
        } = server;
        udp_connection.bring_online(sockets.as_mut(), cfg, uri, mode, &keys)
    }

    fn read_dtls_keys(&self, security_iid: Iid) -> DtlsKeys {
        let read_bytes = |rid| {
            match dm::res_read_value(&self.dm, dm::OID_SECURITY, security_iid, rid) {
                Ok(crate::io::Value::Bytes(raw)) => raw,
                Ok(crate::io::Value::Str(raw)) => raw.into_bytes(),
                _ => Vec::new(),
            }
        };
        DtlsKeys {
            identity: read_bytes(dm::RID_SECURITY_PK_OR_IDENTITY),
            server_public_key: read_bytes(dm::RID_SECURITY_SERVER_PK),
            secret_key: read_bytes(dm::RID_SECURITY_SECRET_KEY),
        }
    }

    /// Detaches the shared stream from the server's socket; in queue mode
    /// this also arms the suspension timer.
    pub(crate) fn release_server_stream(&mut self, ssid: Ssid) {
        let Some(server) = self.servers.find_mut(ssid) else {
            return;
        };
        let handle = server.udp_connection.queue_suspend_handle.clone();
        self.sched.del(&handle);
        if server.udp_connection.mode == ConnectionMode::Queue {
            let delay = self.cfg.tx_params.max_transmit_wait();
            let now = self.clock.now();
            self.sched
                .schedule(now, delay, &handle, ClientTask::SuspendSocket { ssid });
        }
    }

    /// One confirmable request/response exchange on the shared stream.
    pub(crate) fn exchange(&mut self, ssid: Ssid, request: &CoapMessage) -> CoreResult<CoapMessage> {
        let Lwm2mClient {
            servers,
            channel,
            cfg,
            ..
        } = self;
        let server = servers.find_mut(ssid).ok_or(CoreError::NotFound)?;
        let sock = server
            .udp_connection
            .socket
            .as_deref_mut()
            .ok_or(CoreError::Internal)?;
        channel.exchange(sock, &cfg.tx_params, request)
    }

    fn send_response(&mut self, ssid: Ssid, response: &ResponseMessage) -> CoreResult<()> {
        let Lwm2mClient {
            servers,
            channel,
            cfg,
            ..
        } = self;
        let server = servers.find_mut(ssid).ok_or(CoreError::NotFound)?;
        let sock = server
            .udp_connection
            .socket
            .as_deref_mut()
            .ok_or(CoreError::Internal)?;
        channel.send_response(sock, &cfg.tx_params, response)
    }

    // ── serving ───────────────────────────────────────────────────────────

    /// Reads and handles exactly one request pending on the given
    /// connection.
    pub fn serve(&mut self, conn: ConnKey) -> CoreResult<()> {
        self.prepare_server_socket(conn.ssid)?;
        let message = {
            let Lwm2mClient {
                servers, channel, ..
            } = self;
            let server = servers.find_mut(conn.ssid).ok_or(CoreError::NotFound)?;
            let sock = server
                .udp_connection
                .socket
                .as_deref_mut()
                .ok_or(CoreError::Internal)?;
            channel.receive(sock)
        };
        let result = match message {
            Ok(message) => self.handle_incoming(conn, &message),
            Err(err) => Err(err),
        };
        self.release_server_stream(conn.ssid);
        result
    }

    fn error_response(&mut self, conn: ConnKey, identity: MsgIdentity, err: &CoreError) {
        let response = ResponseMessage {
            identity,
            details: MsgDetails::response(err.response_code()),
            observe: None,
            payload: Bytes::new(),
        };
        if let Err(send_err) = self.send_response(conn.ssid, &response) {
            warn!("could not send error response: {send_err}");
        }
    }

    fn handle_incoming(&mut self, conn: ConnKey, message: &CoapMessage) -> CoreResult<()> {
        if conn.ssid == SSID_BOOTSTRAP {
            debug!("bootstrap server");
        } else {
            debug!("server ID = {}", conn.ssid);
        }

        let parsed = request::parse_request(message, conn.ssid, conn.conn_type)
            .and_then(|req| request::validate_critical_options(message).map(|()| req));
        let req = match parsed {
            Ok(req) => req,
            Err(err) => {
                error!("could not parse request: {err}");
                if message.msg_type == MsgType::Confirmable {
                    self.error_response(conn, message.identity.clone(), &err);
                }
                return if err.is_client_error() { Ok(()) } else { Err(err) };
            },
        };

        let result = if conn.ssid == SSID_BOOTSTRAP {
            self.perform_bootstrap(&req, &message.payload)
        } else {
            management::perform(self, &req, &message.payload)
        };

        let outcome = match result {
            Ok(response) => {
                if req.msg_type == MsgType::Confirmable {
                    let observe_value = response
                        .details
                        .observe_serial
                        .then(|| observe_serial_value(self.clock.real_now()));
                    let wire = ResponseMessage {
                        identity: req.identity.clone(),
                        details: response.details,
                        observe: observe_value,
                        payload: response.payload,
                    };
                    if let Err(err) = self.send_response(conn.ssid, &wire) {
                        // A freshly installed observation without a
                        // delivered initial response is not an observation.
                        if req.observe == CoapObserve::Register {
                            let (obs_conn, obs_key) = observe_key_for(&req);
                            observe::observe_remove_entry(self, obs_conn, obs_key);
                        }
                        return Err(err);
                    }
                }
                Ok(())
            },
            Err(err) => {
                if err.is_client_error() {
                    debug!("invalid request: {}", req.code);
                } else {
                    error!("could not handle request: {err}");
                }
                if req.msg_type == MsgType::Confirmable {
                    self.error_response(conn, req.identity.clone(), &err);
                }
                if err.is_client_error() { Ok(()) } else { Err(err) }
            },
        };

        if conn.ssid != SSID_BOOTSTRAP {
            observe::observe_sched_flush(self, conn);
        }
        outcome
    }

    fn perform_bootstrap(
        &mut self,
        req: &Request,
        payload: &Bytes,
    ) -> CoreResult<management::Response> {
        let mut bootstrap = self.bootstrap.take();
        let result = match bootstrap.as_mut() {
            Some(policy) => {
                policy.perform(&mut self.dm, &mut self.notify_queue, req, payload)
            },
            None => Err(CoreError::NotImplemented),
        };
        self.bootstrap = bootstrap;
        if !self.notify_queue.is_empty() {
            self.ensure_notify_flush_scheduled();
        }
        result
    }
}

fn observe_key_for(req: &Request) -> (ConnKey, ObserveKey) {
    (
        ConnKey {
            ssid: req.ssid,
            conn_type: req.conn_type,
        },
        ObserveKey {
            oid: req.uri.oid().unwrap_or(0),
            iid: req.uri.iid().unwrap_or(dm::IID_INVALID),
            rid: req.uri.rid().map_or(observe::RID_WILDCARD, i32::from),
            format: req.requested_format,
        },
    )
}

impl Drop for Lwm2mClient {
    fn drop(&mut self) {
        let ssids: Vec<Ssid> = self
            .servers
            .iter()
            .filter(|s| s.active && !s.is_bootstrap() && s.registration.is_some())
            .map(|s| s.ssid)
            .collect();
        for ssid in ssids {
            registration::deregister(self, ssid);
        }
    }
}
