// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The shared communication channel.
//!
//! A client owns exactly one [`CoapChannel`]; it is attached to one socket
//! at a time by passing the transport into each call, mirroring the
//! set-socket/detach discipline of a shared stream. Message encoding,
//! retransmission of confirmable messages and blockwise transfers are the
//! channel's problem, not the core's.

use bytes::Bytes;

use crate::{
    coap::{
        msg::{CoapMessage, MsgDetails, MsgIdentity},
        tx_params::CoapTxParams,
    },
    errors::CoreResult,
    net::UdpTransport,
};

/// Response to a previously received request.
#[derive(Debug, Clone)]
pub struct ResponseMessage {
    pub identity: MsgIdentity,
    pub details: MsgDetails,
    /// Observe option value, set when the response confirms an observation.
    pub observe: Option<u32>,
    pub payload: Bytes,
}

/// An asynchronous notification bound to an observation token. The channel
/// assigns the message id.
#[derive(Debug, Clone)]
pub struct NotifyMessage {
    pub token: Bytes,
    pub details: MsgDetails,
    pub observe: u32,
    pub payload: Bytes,
}

/// What came back for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyReply {
    /// Non-confirmable send, nothing to wait for.
    None,
    /// Confirmable send acknowledged with an empty 2.xx.
    Acked,
    /// The peer replied with Reset; the observation is dead.
    Reset,
}

#[derive(Debug, Clone)]
pub struct NotifySendResult {
    /// Message id the channel assigned to the outgoing notification.
    pub msg_id: u16,
    pub reply: NotifyReply,
}

pub trait CoapChannel {
    /// Reads exactly one request pending on `sock`.
    fn receive(&mut self, sock: &mut dyn UdpTransport) -> CoreResult<CoapMessage>;

    /// Sends a response (the ACK carrying the result of a request).
    fn send_response(
        &mut self,
        sock: &mut dyn UdpTransport,
        tx: &CoapTxParams,
        response: &ResponseMessage,
    ) -> CoreResult<()>;

    /// Sends an Observe notification, returning the assigned message id
    /// and, for confirmable sends, the peer's verdict.
    fn send_notify(
        &mut self,
        sock: &mut dyn UdpTransport,
        tx: &CoapTxParams,
        notify: &NotifyMessage,
    ) -> CoreResult<NotifySendResult>;

    /// Performs a confirmable request/response exchange (Register, Update,
    /// De-register).
    fn exchange(
        &mut self,
        sock: &mut dyn UdpTransport,
        tx: &CoapTxParams,
        request: &CoapMessage,
    ) -> CoreResult<CoapMessage>;
}
