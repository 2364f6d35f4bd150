// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Parses one CoAP message into a typed Management Interface request.

use tracing::{debug, error};

use crate::{
    coap::msg::{self, CoapMessage, FORMAT_NONE, MsgCode, MsgIdentity, MsgType, opt},
    dm::{attributes::RequestAttributes, IID_INVALID, Ssid, UriPath},
    errors::{CoreError, CoreResult},
    servers::ConnType,
    utils,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Discover,
    Write,
    WriteUpdate,
    WriteAttributes,
    Execute,
    Create,
    Delete,
    CancelObserve,
    BootstrapFinish,
}

impl Action {
    pub fn success_code(self) -> MsgCode {
        match self {
            Action::Read | Action::Discover => MsgCode::CONTENT,
            Action::Write
            | Action::WriteUpdate
            | Action::WriteAttributes
            | Action::Execute => MsgCode::CHANGED,
            Action::Create => MsgCode::CREATED,
            Action::Delete => MsgCode::DELETED,
            Action::CancelObserve => MsgCode::EMPTY,
            Action::BootstrapFinish => MsgCode::CHANGED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoapObserve {
    #[default]
    None,
    Register,
    Deregister,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub ssid: Ssid,
    pub conn_type: ConnType,
    pub msg_type: MsgType,
    pub code: MsgCode,
    pub identity: MsgIdentity,
    /// True for the bootstrap interface URI (single `"bs"` segment).
    pub is_bs: bool,
    pub uri: UriPath,
    pub action: Action,
    pub content_format: u16,
    pub requested_format: u16,
    pub observe: CoapObserve,
    pub attributes: RequestAttributes,
}

fn parse_observe(message: &CoapMessage) -> CoreResult<CoapObserve> {
    let Some(option) = message.first_option(opt::OBSERVE) else {
        return Ok(CoapObserve::None);
    };
    match option.as_uint() {
        Some(0) => Ok(CoapObserve::Register),
        Some(1) => Ok(CoapObserve::Deregister),
        _ => {
            error!("invalid value for Observe request");
            Err(CoreError::BadRequest)
        },
    }
}

fn parse_uri(message: &CoapMessage) -> CoreResult<(bool, UriPath)> {
    let segments: Vec<&str> = message
        .options_of(opt::URI_PATH)
        .map(|o| o.as_str().ok_or(CoreError::BadRequest))
        .collect::<CoreResult<_>>()?;

    if segments.len() == 1 && segments[0] == "bs" {
        return Ok((true, UriPath::Root));
    }
    if segments.len() > 3 {
        error!("prefixed Uri-Path are not supported");
        return Err(CoreError::BadRequest);
    }

    let mut ids = [0u16; 3];
    // IIDs stop one short: 65535 is reserved as the invalid id.
    let max_valid = [u32::from(u16::MAX), u32::from(IID_INVALID) - 1, u32::from(u16::MAX)];
    for (index, segment) in segments.iter().enumerate() {
        let value = utils::parse_decimal_u32(segment)?;
        if value > max_valid[index] {
            error!("invalid Uri-Path segment: {segment}");
            return Err(CoreError::BadRequest);
        }
        ids[index] = value as u16;
    }

    let uri = match segments.len() {
        0 => UriPath::Root,
        1 => UriPath::Object(ids[0]),
        2 => UriPath::Instance(ids[0], ids[1]),
        _ => UriPath::Resource(ids[0], ids[1], ids[2]),
    };
    Ok((false, uri))
}

fn parse_attribute(
    attrs: &mut RequestAttributes,
    key: &str,
    value: Option<&str>,
) -> CoreResult<()> {
    match key {
        "pmin" => {
            attrs.min_period = Some(value.map(utils::parse_attr_period).transpose()?);
        },
        "pmax" => {
            attrs.max_period = Some(value.map(utils::parse_attr_period).transpose()?);
        },
        "gt" => {
            attrs.greater_than = Some(value.map(utils::parse_attr_double).transpose()?);
        },
        "lt" => {
            attrs.less_than = Some(value.map(utils::parse_attr_double).transpose()?);
        },
        "st" => {
            attrs.step = Some(value.map(utils::parse_attr_double).transpose()?);
        },
        _ => {
            error!("unrecognized query string: {key}");
            return Err(CoreError::BadRequest);
        },
    }
    Ok(())
}

fn parse_attributes(message: &CoapMessage) -> CoreResult<RequestAttributes> {
    let mut attrs = RequestAttributes::default();
    for option in message.options_of(opt::URI_QUERY) {
        let segment = option.as_str().ok_or(CoreError::BadRequest)?;
        let (key, value) = utils::split_query(segment);
        parse_attribute(&mut attrs, key, value)?;
    }
    Ok(attrs)
}

#[allow(clippy::too_many_arguments)]
fn derive_action(
    msg_type: MsgType,
    code: MsgCode,
    requested_format: u16,
    is_bs: bool,
    has_iid: bool,
    has_rid: bool,
    has_content_format: bool,
) -> CoreResult<Action> {
    if msg_type == MsgType::Reset {
        return Ok(Action::CancelObserve);
    }
    if msg_type != MsgType::Confirmable {
        error!("invalid CoAP message type for a request");
        return Err(CoreError::BadRequest);
    }
    let action = match code {
        MsgCode::GET => {
            if requested_format == msg::FORMAT_LINK {
                Action::Discover
            } else {
                Action::Read
            }
        },
        MsgCode::POST => {
            if is_bs {
                Action::BootstrapFinish
            } else if has_rid {
                Action::Execute
            } else if has_iid {
                Action::WriteUpdate
            } else {
                Action::Create
            }
        },
        MsgCode::PUT => {
            if has_content_format {
                Action::Write
            } else {
                Action::WriteAttributes
            }
        },
        MsgCode::DELETE => Action::Delete,
        _ => {
            error!("unrecognized CoAP method: {code}");
            return Err(CoreError::BadRequest);
        },
    };
    debug!("LWM2M action: {action:?}");
    Ok(action)
}

/// Parses one request. The caller supplies the connection identity; the
/// rest comes out of the message.
pub fn parse_request(
    message: &CoapMessage,
    ssid: Ssid,
    conn_type: ConnType,
) -> CoreResult<Request> {
    let observe = parse_observe(message)?;
    let (is_bs, uri) = parse_uri(message)?;
    let attributes = parse_attributes(message)?;
    let content_format = message
        .uint_option(opt::CONTENT_FORMAT)
        .map_or(FORMAT_NONE, |v| v as u16);
    let requested_format = message
        .uint_option(opt::ACCEPT)
        .map_or(FORMAT_NONE, |v| v as u16);

    let action = derive_action(
        message.msg_type,
        message.code,
        requested_format,
        is_bs,
        uri.iid().is_some(),
        uri.rid().is_some(),
        content_format != FORMAT_NONE,
    )?;

    Ok(Request {
        ssid,
        conn_type,
        msg_type: message.msg_type,
        code: message.code,
        identity: message.identity.clone(),
        is_bs,
        uri,
        action,
        content_format,
        requested_format,
        observe,
        attributes,
    })
}

/// Critical-option validator: every critical (odd-numbered) option must be
/// allowed for the request method, else the request dies with 4.02.
/// BLOCK options never reach this point; the channel consumes them.
pub fn validate_critical_options(message: &CoapMessage) -> CoreResult<()> {
    let allowed: &[u16] = match message.code {
        MsgCode::GET => &[opt::URI_PATH, opt::ACCEPT],
        MsgCode::PUT | MsgCode::POST => &[opt::URI_PATH, opt::URI_QUERY],
        MsgCode::DELETE => &[opt::URI_PATH],
        _ => &[],
    };
    for option in &message.options {
        if opt::is_critical(option.number) && !allowed.contains(&option.number) {
            error!("rejecting critical option {}", option.number);
            return Err(CoreError::BadOption);
        }
    }
    Ok(())
}
