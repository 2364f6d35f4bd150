// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Registry of LwM2M servers known to the client.
//!
//! Servers are derived from Security object instances; each carries one
//! UDP connection and the state of its registration. An inactive server
//! keeps its entry (so observations can be garbage-collected against the
//! full SSID set) but loses its socket.

use crate::{
    dm::{Iid, Ssid, SSID_BOOTSTRAP},
    sched::TaskHandle,
    servers::connection::{Connection, ServerUri},
    time::Timestamp,
};

pub mod connection;
pub mod register;

/// Transport the connection runs on. UDP is the only supported transport
/// in the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnType {
    Udp,
}

/// State of the last successful Register exchange.
#[derive(Debug, Clone)]
pub struct RegistrationInfo {
    /// Location-Path the server assigned to this registration.
    pub location: Vec<String>,
    pub lifetime_s: i64,
    /// Monotonic deadline after which the registration has expired.
    pub expire_at: Timestamp,
}

#[derive(Debug)]
pub struct ServerInfo {
    pub ssid: Ssid,
    pub security_iid: Iid,
    pub uri: ServerUri,
    /// False once the server was deactivated (registration kept failing);
    /// notifications stop flowing until it is reactivated.
    pub active: bool,
    pub udp_connection: Connection,
    pub primary_conn_type: ConnType,
    pub registration: Option<RegistrationInfo>,
    pub sched_update_handle: TaskHandle,
}

impl ServerInfo {
    pub fn new(ssid: Ssid, security_iid: Iid, uri: ServerUri) -> Self {
        ServerInfo {
            ssid,
            security_iid,
            uri,
            active: true,
            udp_connection: Connection::new(),
            primary_conn_type: ConnType::Udp,
            registration: None,
            sched_update_handle: TaskHandle::new(),
        }
    }

    pub fn is_bootstrap(&self) -> bool {
        self.ssid == SSID_BOOTSTRAP
    }
}

#[derive(Default)]
pub struct ServerRegistry {
    servers: Vec<ServerInfo>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        ServerRegistry::default()
    }

    pub fn find(&self, ssid: Ssid) -> Option<&ServerInfo> {
        self.servers.iter().find(|s| s.ssid == ssid)
    }

    pub fn find_mut(&mut self, ssid: Ssid) -> Option<&mut ServerInfo> {
        self.servers.iter_mut().find(|s| s.ssid == ssid)
    }

    pub fn find_active_mut(&mut self, ssid: Ssid) -> Option<&mut ServerInfo> {
        self.find_mut(ssid).filter(|s| s.active)
    }

    pub fn is_active(&self, ssid: Ssid) -> bool {
        self.find(ssid).is_some_and(|s| s.active)
    }

    /// Inserts keeping SSID order; replaces an existing entry for the same
    /// SSID.
    pub fn insert(&mut self, server: ServerInfo) {
        match self.servers.binary_search_by_key(&server.ssid, |s| s.ssid) {
            Ok(pos) => self.servers[pos] = server,
            Err(pos) => self.servers.insert(pos, server),
        }
    }

    pub fn remove(&mut self, ssid: Ssid) -> Option<ServerInfo> {
        let pos = self.servers.iter().position(|s| s.ssid == ssid)?;
        Some(self.servers.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerInfo> {
        self.servers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ServerInfo> {
        self.servers.iter_mut()
    }

    pub fn ssids(&self) -> Vec<Ssid> {
        self.servers.iter().map(|s| s.ssid).collect()
    }

    pub fn active_ssids(&self) -> Vec<Ssid> {
        self.servers
            .iter()
            .filter(|s| s.active)
            .map(|s| s.ssid)
            .collect()
    }

    /// Every known server except the Bootstrap one, active or not.
    pub fn num_non_bootstrap(&self) -> usize {
        self.servers
            .iter()
            .filter(|s| s.ssid != SSID_BOOTSTRAP)
            .count()
    }
}
