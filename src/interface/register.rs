// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Register / Update / De-register message codec.
//!
//! Register is `POST /rd?lwm2m=1.0&ep=<name>&lt=<lifetime>&b=<binding>`
//! with a Link-Format object listing; the server answers `2.01 Created`
//! plus a Location-Path identifying the registration. Update POSTs to
//! that location with only the parameters that changed; De-register
//! DELETEs it.

use std::fmt::Write;

use bytes::Bytes;
use rand::RngExt;
use tracing::error;

use crate::{
    coap::msg::{
        CoapMessage, CoapOption, FORMAT_LINK, MsgCode, MsgIdentity, MsgType, opt,
    },
    dm::{DataModel, OID_SECURITY},
    errors::{CoreError, CoreResult},
};

pub const LWM2M_VERSION: &str = "1.0";

/// Generates a fresh 8-byte CoAP token for a registration exchange.
pub fn generate_token() -> Bytes {
    let mut token = [0u8; 8];
    rand::rng().fill(&mut token);
    Bytes::copy_from_slice(&token)
}

/// Link-Format listing of every registered object except Security, with
/// per-instance links for instantiated objects.
pub fn object_links(dm: &DataModel) -> CoreResult<Bytes> {
    let mut out = String::new();
    for obj in dm.objects() {
        let oid = obj.borrow().oid();
        if oid == OID_SECURITY {
            continue;
        }
        let instances = obj.borrow_mut().instance_iter()?;
        if instances.is_empty() {
            if !out.is_empty() {
                out.push(',');
            }
            let _ = write!(out, "</{oid}>");
        } else {
            for iid in instances {
                if !out.is_empty() {
                    out.push(',');
                }
                let _ = write!(out, "</{oid}/{iid}>");
            }
        }
    }
    Ok(Bytes::from(out.into_bytes()))
}

pub struct RegisterParams<'a> {
    pub endpoint_name: &'a str,
    pub lifetime_s: i64,
    pub binding: &'a str,
}

pub fn register_request(params: &RegisterParams<'_>, payload: Bytes) -> CoapMessage {
    let mut msg = CoapMessage::new(MsgType::Confirmable, MsgCode::POST)
        .with_identity(MsgIdentity::new(0, generate_token()))
        .with_option(CoapOption::string(opt::URI_PATH, "rd"))
        .with_option(CoapOption::uint(opt::CONTENT_FORMAT, u32::from(FORMAT_LINK)))
        .with_option(CoapOption::string(
            opt::URI_QUERY,
            &format!("lwm2m={LWM2M_VERSION}"),
        ))
        .with_option(CoapOption::string(
            opt::URI_QUERY,
            &format!("ep={}", params.endpoint_name),
        ))
        .with_option(CoapOption::string(
            opt::URI_QUERY,
            &format!("lt={}", params.lifetime_s),
        ));
    if params.binding != "U" {
        msg = msg.with_option(CoapOption::string(
            opt::URI_QUERY,
            &format!("b={}", params.binding),
        ));
    }
    msg.with_payload(payload)
}

/// Extracts the registration location from a Register response.
pub fn parse_register_response(response: &CoapMessage) -> CoreResult<Vec<String>> {
    if response.code != MsgCode::CREATED {
        error!("server responded to Register with {}", response.code);
        return Err(CoreError::Channel(format!(
            "Register failed with {}",
            response.code
        )));
    }
    let location: Vec<String> = response
        .options_of(opt::LOCATION_PATH)
        .map(|o| {
            o.as_str()
                .map(str::to_string)
                .ok_or(CoreError::BadRequest)
        })
        .collect::<CoreResult<_>>()?;
    if location.is_empty() {
        error!("Register response carries no Location-Path");
        return Err(CoreError::Channel("missing Location-Path".to_string()));
    }
    Ok(location)
}

pub struct UpdateParams<'a> {
    pub location: &'a [String],
    /// Included only when the lifetime changed since the last exchange.
    pub lifetime_s: Option<i64>,
    pub binding: Option<&'a str>,
}

pub fn update_request(params: &UpdateParams<'_>, payload: Bytes) -> CoapMessage {
    let mut msg = CoapMessage::new(MsgType::Confirmable, MsgCode::POST)
        .with_identity(MsgIdentity::new(0, generate_token()));
    for segment in params.location {
        msg = msg.with_option(CoapOption::string(opt::URI_PATH, segment));
    }
    if let Some(lifetime) = params.lifetime_s {
        msg = msg.with_option(CoapOption::string(opt::URI_QUERY, &format!("lt={lifetime}")));
    }
    if let Some(binding) = params.binding {
        msg = msg.with_option(CoapOption::string(opt::URI_QUERY, &format!("b={binding}")));
    }
    if !payload.is_empty() {
        msg = msg
            .with_option(CoapOption::uint(opt::CONTENT_FORMAT, u32::from(FORMAT_LINK)))
            .with_payload(payload);
    }
    msg
}

/// A 4.xx response to an Update means the server forgot us; the caller
/// must fall back to a full Register.
pub fn parse_update_response(response: &CoapMessage) -> CoreResult<()> {
    if response.code.is_success() {
        return Ok(());
    }
    if response.code.is_client_error() {
        return Err(CoreError::RegistrationRejected);
    }
    Err(CoreError::Channel(format!(
        "Update failed with {}",
        response.code
    )))
}

pub fn deregister_request(location: &[String]) -> CoapMessage {
    let mut msg = CoapMessage::new(MsgType::Confirmable, MsgCode::DELETE)
        .with_identity(MsgIdentity::new(0, generate_token()));
    for segment in location {
        msg = msg.with_option(CoapOption::string(opt::URI_PATH, segment));
    }
    msg
}
