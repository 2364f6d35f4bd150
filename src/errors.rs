// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Error taxonomy of the client core.
//!
//! Management Interface handlers report failures as [`CoreError`]; the
//! dispatcher translates them into CoAP response codes through
//! [`CoreError::response_code`]. Client errors (class 4) are valid protocol
//! outcomes and are not treated as transport failures by `serve()`.

use thiserror::Error;

use crate::coap::msg::MsgCode;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed header, Uri-Path or payload (4.00).
    #[error("bad request")]
    BadRequest,

    /// Denied by the Access-Control evaluator (4.01).
    #[error("unauthorized")]
    Unauthorized,

    /// A critical option was rejected for the request method (4.02).
    #[error("bad option")]
    BadOption,

    /// Absent object, instance or resource (4.04).
    #[error("not found")]
    NotFound,

    /// The target does not support the requested action (4.05).
    #[error("method not allowed")]
    MethodNotAllowed,

    /// Requested Content-Format cannot be produced (4.06).
    #[error("not acceptable")]
    NotAcceptable,

    /// Payload arrived in a Content-Format the target cannot consume (4.15).
    #[error("unsupported content format")]
    UnsupportedContentFormat,

    /// Handler produced unusable output or failed in an unknown way (5.00).
    #[error("internal error")]
    Internal,

    /// Feature compiled out or not provided by the collaborator (5.01).
    #[error("not implemented")]
    NotImplemented,

    /// An output context was asked for a value it cannot express in its
    /// Content-Format; maps to 4.06 on the wire.
    #[error("output format mismatch")]
    FormatMismatch,

    /// Object with the same OID is already registered.
    #[error("object already registered")]
    AlreadyRegistered,

    /// Object definition rejected (empty handlers, bad supported RIDs).
    #[error("invalid object definition")]
    BadObject,

    /// The scheduler queue is empty; there is no "next task" to wait for.
    #[error("no scheduled tasks")]
    SchedulerEmpty,

    /// The server responded to an Update with a code meaning it no longer
    /// recognizes our registration; a full Register is required.
    #[error("registration no longer recognized by the server")]
    RegistrationRejected,

    /// Socket-level failure surfaced from the OS.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Failure in the CoAP messaging layer below the core.
    #[error("coap channel error: {0}")]
    Channel(String),
}

impl CoreError {
    /// CoAP response code emitted for this error, per the dispatcher's
    /// `error_response_code` contract: class-4/5 errors keep their code,
    /// a format mismatch becomes 4.06, everything else is 5.00.
    pub fn response_code(&self) -> MsgCode {
        match self {
            CoreError::BadRequest => MsgCode::BAD_REQUEST,
            CoreError::Unauthorized => MsgCode::UNAUTHORIZED,
            CoreError::BadOption => MsgCode::BAD_OPTION,
            CoreError::NotFound => MsgCode::NOT_FOUND,
            CoreError::MethodNotAllowed => MsgCode::METHOD_NOT_ALLOWED,
            CoreError::NotAcceptable | CoreError::FormatMismatch => {
                MsgCode::NOT_ACCEPTABLE
            },
            CoreError::UnsupportedContentFormat => {
                MsgCode::UNSUPPORTED_CONTENT_FORMAT
            },
            CoreError::NotImplemented => MsgCode::NOT_IMPLEMENTED,
            _ => MsgCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for errors whose response code is a client error (class 4).
    /// Those are reported to the peer but do not fail `serve()`.
    pub fn is_client_error(&self) -> bool {
        self.response_code().class() == 4
    }
}
