// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Socket seam of the connection manager.
//!
//! The core talks to the network through [`UdpTransport`]; plain UDP is
//! provided by [`StdUdpSocket`], DTLS transports plug in through the same
//! [`SocketFactory`] without the core knowing the difference.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use crate::{
    cfg::enums::DtlsVersion,
    errors::{CoreError, CoreResult},
};

/// Pre-shared or certificate material handed to DTLS factories. Plain UDP
/// ignores it.
#[derive(Debug, Clone, Default)]
pub struct DtlsKeys {
    pub identity: Vec<u8>,
    pub secret_key: Vec<u8>,
    pub server_public_key: Vec<u8>,
}

/// Everything a factory needs to build one connected socket.
#[derive(Debug)]
pub struct SocketConfig<'a> {
    pub dtls_version: DtlsVersion,
    pub secure: bool,
    pub keys: &'a DtlsKeys,
    /// Opaque session blob from a previous connection, for DTLS resumption.
    pub session_cache: &'a [u8],
}

pub trait UdpTransport {
    /// Binds to `local_port` (or an OS-assigned port when `None`) and
    /// connects to the remote endpoint. The local address family follows
    /// the remote one, avoiding IPv4-mapped-IPv6 pitfalls on platforms
    /// without dual-stack mapping.
    fn bind_and_connect(
        &mut self,
        local_port: Option<u16>,
        remote_host: &str,
        remote_port: u16,
    ) -> CoreResult<()>;

    fn is_connected(&self) -> bool;

    /// Closes the underlying socket but keeps the transport object alive,
    /// so a later `bind_and_connect` can resume on the same state.
    fn close(&mut self) -> CoreResult<()>;

    fn local_port(&self) -> Option<u16>;

    /// True iff the last connect resumed a previous (D)TLS session.
    fn session_resumed(&self) -> bool;

    /// Serialized session state to persist across suspensions; empty for
    /// plain UDP.
    fn session_blob(&self) -> Vec<u8> {
        Vec::new()
    }
}

pub trait SocketFactory {
    fn create(&mut self, config: &SocketConfig<'_>) -> CoreResult<Box<dyn UdpTransport>>;
}

/// Plain UDP transport over `std::net`.
#[derive(Debug, Default)]
pub struct StdUdpSocket {
    socket: Option<UdpSocket>,
    local_port: Option<u16>,
}

impl StdUdpSocket {
    pub fn new() -> Self {
        StdUdpSocket::default()
    }

    fn resolve(host: &str, port: u16) -> CoreResult<SocketAddr> {
        (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or(CoreError::Transport(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "no address resolved",
            )))
    }
}

impl UdpTransport for StdUdpSocket {
    fn bind_and_connect(
        &mut self,
        local_port: Option<u16>,
        remote_host: &str,
        remote_port: u16,
    ) -> CoreResult<()> {
        let remote = Self::resolve(remote_host, remote_port)?;
        let local: SocketAddr = if remote.is_ipv6() {
            (std::net::Ipv6Addr::UNSPECIFIED, local_port.unwrap_or(0)).into()
        } else {
            (std::net::Ipv4Addr::UNSPECIFIED, local_port.unwrap_or(0)).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(remote)?;
        self.local_port = Some(socket.local_addr()?.port());
        self.socket = Some(socket);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn close(&mut self) -> CoreResult<()> {
        self.socket = None;
        Ok(())
    }

    fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    fn session_resumed(&self) -> bool {
        false
    }
}

/// Factory producing [`StdUdpSocket`]s; rejects secure endpoints since it
/// cannot do DTLS.
#[derive(Debug, Default)]
pub struct StdSocketFactory;

impl SocketFactory for StdSocketFactory {
    fn create(&mut self, config: &SocketConfig<'_>) -> CoreResult<Box<dyn UdpTransport>> {
        if config.secure {
            return Err(CoreError::NotImplemented);
        }
        Ok(Box::new(StdUdpSocket::new()))
    }
}
