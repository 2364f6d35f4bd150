// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-server UDP connection lifecycle.
//!
//! A connection may outlive its socket: queue mode closes the socket
//! between exchanges, and a later send re-opens it on the same local port
//! so NAT bindings and DTLS session state survive the suspension.

use tracing::{debug, error};

use crate::{
    cfg::{config::Config, enums::SecurityMode},
    errors::{CoreError, CoreResult},
    net::{DtlsKeys, SocketConfig, SocketFactory, UdpTransport},
    sched::TaskHandle,
};

/// Parsed `coap://` / `coaps://` URI of a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUri {
    pub secure: bool,
    pub host: String,
    pub port: u16,
}

impl ServerUri {
    pub fn parse(uri: &str) -> CoreResult<ServerUri> {
        let (secure, rest) = if let Some(rest) = uri.strip_prefix("coaps://") {
            (true, rest)
        } else if let Some(rest) = uri.strip_prefix("coap://") {
            (false, rest)
        } else {
            error!("unsupported server URI scheme: {uri}");
            return Err(CoreError::BadRequest);
        };
        let rest = rest.split('/').next().unwrap_or(rest);
        let (host, port) = if let Some(v6) = rest.strip_prefix('[') {
            let (host, tail) = v6.split_once(']').ok_or(CoreError::BadRequest)?;
            let port = match tail.strip_prefix(':') {
                Some(p) => p.parse().map_err(|_| CoreError::BadRequest)?,
                None => default_port(secure),
            };
            (host.to_string(), port)
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (
                    host.to_string(),
                    port.parse().map_err(|_| CoreError::BadRequest)?,
                ),
                None => (rest.to_string(), default_port(secure)),
            }
        };
        if host.is_empty() {
            return Err(CoreError::BadRequest);
        }
        Ok(ServerUri { secure, host, port })
    }
}

fn default_port(secure: bool) -> u16 {
    if secure { 5684 } else { 5683 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    #[default]
    Disabled,
    Online,
    Queue,
}

/// State that survives socket teardown.
#[derive(Debug, Clone, Default)]
pub struct NontransientState {
    /// Opaque DTLS session blob for resumption across suspensions and
    /// reboots.
    pub dtls_session: Vec<u8>,
    pub last_local_port: Option<u16>,
}

pub struct Connection {
    pub socket: Option<Box<dyn UdpTransport>>,
    pub mode: ConnectionMode,
    pub nontransient: NontransientState,
    pub queue_suspend_handle: TaskHandle,
    /// True iff the last (re)connect resumed a DTLS session.
    pub session_resumed: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("socket", &self.socket.is_some())
            .field("mode", &self.mode)
            .field("nontransient", &self.nontransient)
            .field("queue_suspend_handle", &self.queue_suspend_handle)
            .field("session_resumed", &self.session_resumed)
            .finish()
    }
}

impl Connection {
    pub fn new() -> Self {
        Connection {
            socket: None,
            mode: ConnectionMode::Disabled,
            nontransient: NontransientState::default(),
            queue_suspend_handle: TaskHandle::new(),
            session_resumed: false,
        }
    }

    pub fn is_online(&self) -> bool {
        self.socket.as_ref().is_some_and(|s| s.is_connected())
    }

    /// Brings the socket up, creating it on first use and re-binding a
    /// suspended one. Binds to the cached local port when possible so the
    /// remote sees a stable source.
    pub fn bring_online(
        &mut self,
        factory: &mut dyn SocketFactory,
        config: &Config,
        uri: &ServerUri,
        security: SecurityMode,
        keys: &DtlsKeys,
    ) -> CoreResult<()> {
        if self.is_online() {
            return Ok(());
        }
        if self.socket.is_none() {
            let socket_config = SocketConfig {
                dtls_version: config.dtls_version,
                secure: uri.secure && security.is_secure(),
                keys,
                session_cache: &self.nontransient.dtls_session,
            };
            self.socket = Some(factory.create(&socket_config)?);
        }

        let socket = self.socket.as_mut().ok_or(CoreError::Internal)?;
        let preferred_port = self
            .nontransient
            .last_local_port
            .or((config.udp_listen_port != 0).then_some(config.udp_listen_port));

        let mut result = socket.bind_and_connect(preferred_port, &uri.host, uri.port);
        if let Err(err) = &result
            && preferred_port.is_some()
        {
            // The cached port may be taken after a restart; retry on a
            // wildcard port before reporting.
            debug!("bind to preferred port failed ({err}), retrying on wildcard");
            result = socket.bind_and_connect(None, &uri.host, uri.port);
        }
        if let Err(err) = result {
            error!("could not connect to {}:{}: {err}", uri.host, uri.port);
            self.socket = None;
            return Err(err);
        }

        self.session_resumed = socket.session_resumed();
        self.nontransient.last_local_port = socket.local_port();
        self.nontransient.dtls_session = socket.session_blob();
        Ok(())
    }

    /// Queue-mode suspension: closes the socket, keeping non-transient
    /// state for the next `bring_online`.
    pub fn suspend(&mut self) -> CoreResult<()> {
        if let Some(socket) = self.socket.as_mut() {
            self.nontransient.dtls_session = socket.session_blob();
            socket.close()?;
        }
        Ok(())
    }
}

impl Default for Connection {
    fn default() -> Self {
        Connection::new()
    }
}
