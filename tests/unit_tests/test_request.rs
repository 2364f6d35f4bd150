// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::Bytes;
use lwm2m_client_rs::{
    coap::msg::{CoapMessage, CoapOption, MsgCode, MsgIdentity, MsgType, opt},
    dm::UriPath,
    errors::CoreError,
    interface::request::{parse_request, validate_critical_options, Action, CoapObserve},
    servers::ConnType,
};

fn base(msg_type: MsgType, code: MsgCode, path: &[&str]) -> CoapMessage {
    let mut msg = CoapMessage::new(msg_type, code)
        .with_identity(MsgIdentity::new(0xfa3e, Bytes::from_static(b"T")));
    for segment in path {
        msg = msg.with_option(CoapOption::string(opt::URI_PATH, segment));
    }
    msg
}

fn parse(msg: &CoapMessage) -> Result<lwm2m_client_rs::interface::request::Request, CoreError> {
    parse_request(msg, 14, ConnType::Udp)
}

#[test]
fn test_get_is_read_with_full_path() {
    let req = parse(&base(MsgType::Confirmable, MsgCode::GET, &["42", "69", "4"]))
        .expect("parse");
    assert_eq!(req.action, Action::Read);
    assert_eq!(req.uri, UriPath::Resource(42, 69, 4));
    assert_eq!(req.observe, CoapObserve::None);
    assert_eq!(req.identity.msg_id, 0xfa3e);
}

#[test]
fn test_get_with_link_format_accept_is_discover() {
    let msg = base(MsgType::Confirmable, MsgCode::GET, &["42"])
        .with_option(CoapOption::uint(opt::ACCEPT, 40));
    let req = parse(&msg).expect("parse");
    assert_eq!(req.action, Action::Discover);
}

#[test]
fn test_post_action_depends_on_path_depth() {
    assert_eq!(
        parse(&base(MsgType::Confirmable, MsgCode::POST, &["42"])).expect("parse").action,
        Action::Create
    );
    assert_eq!(
        parse(&base(MsgType::Confirmable, MsgCode::POST, &["42", "69"]))
            .expect("parse")
            .action,
        Action::WriteUpdate
    );
    assert_eq!(
        parse(&base(MsgType::Confirmable, MsgCode::POST, &["42", "69", "4"]))
            .expect("parse")
            .action,
        Action::Execute
    );
    let bs = base(MsgType::Confirmable, MsgCode::POST, &["bs"]);
    let req = parse(&bs).expect("parse");
    assert_eq!(req.action, Action::BootstrapFinish);
    assert!(req.is_bs);
}

#[test]
fn test_put_with_content_format_is_write() {
    let msg = base(MsgType::Confirmable, MsgCode::PUT, &["42", "69", "4"])
        .with_option(CoapOption::uint(opt::CONTENT_FORMAT, 0));
    assert_eq!(parse(&msg).expect("parse").action, Action::Write);

    let msg = base(MsgType::Confirmable, MsgCode::PUT, &["42", "69", "4"]);
    assert_eq!(parse(&msg).expect("parse").action, Action::WriteAttributes);
}

#[test]
fn test_reset_is_cancel_observe() {
    let msg = CoapMessage::new(MsgType::Reset, MsgCode::EMPTY)
        .with_identity(MsgIdentity::new(0x1001, Bytes::new()));
    let req = parse(&msg).expect("parse");
    assert_eq!(req.action, Action::CancelObserve);
}

#[test]
fn test_non_confirmable_request_rejected() {
    let msg = base(MsgType::NonConfirmable, MsgCode::GET, &["42"]);
    assert!(matches!(parse(&msg), Err(CoreError::BadRequest)));
}

#[test]
fn test_observe_option_values() {
    let msg = base(MsgType::Confirmable, MsgCode::GET, &["42", "69", "4"])
        .with_option(CoapOption::uint(opt::OBSERVE, 0));
    assert_eq!(parse(&msg).expect("parse").observe, CoapObserve::Register);

    let msg = base(MsgType::Confirmable, MsgCode::GET, &["42", "69", "4"])
        .with_option(CoapOption::uint(opt::OBSERVE, 1));
    assert_eq!(parse(&msg).expect("parse").observe, CoapObserve::Deregister);

    let msg = base(MsgType::Confirmable, MsgCode::GET, &["42", "69", "4"])
        .with_option(CoapOption::uint(opt::OBSERVE, 2));
    assert!(matches!(parse(&msg), Err(CoreError::BadRequest)));
}

#[test]
fn test_query_attributes() {
    let msg = base(MsgType::Confirmable, MsgCode::PUT, &["42", "69", "4"])
        .with_option(CoapOption::string(opt::URI_QUERY, "pmin=5"))
        .with_option(CoapOption::string(opt::URI_QUERY, "pmax"))
        .with_option(CoapOption::string(opt::URI_QUERY, "st=0.5"));
    let req = parse(&msg).expect("parse");
    assert_eq!(req.attributes.min_period, Some(Some(5)));
    // A value-less key unsets the attribute explicitly.
    assert_eq!(req.attributes.max_period, Some(None));
    assert_eq!(req.attributes.step, Some(Some(0.5)));
    assert_eq!(req.attributes.greater_than, None);
}

#[test]
fn test_negative_period_is_bad_option() {
    let msg = base(MsgType::Confirmable, MsgCode::PUT, &["42", "69", "4"])
        .with_option(CoapOption::string(opt::URI_QUERY, "pmin=-5"));
    assert!(matches!(parse(&msg), Err(CoreError::BadOption)));
}

#[test]
fn test_unknown_query_key_rejected() {
    let msg = base(MsgType::Confirmable, MsgCode::PUT, &["42", "69", "4"])
        .with_option(CoapOption::string(opt::URI_QUERY, "bogus=1"));
    assert!(matches!(parse(&msg), Err(CoreError::BadRequest)));
}

#[test]
fn test_uri_path_boundaries() {
    // Four segments.
    let msg = base(MsgType::Confirmable, MsgCode::GET, &["42", "69", "4", "1"]);
    assert!(matches!(parse(&msg), Err(CoreError::BadRequest)));

    // IID 65535 is reserved.
    let msg = base(MsgType::Confirmable, MsgCode::GET, &["42", "65535"]);
    assert!(matches!(parse(&msg), Err(CoreError::BadRequest)));

    // RID overflow.
    let msg = base(MsgType::Confirmable, MsgCode::GET, &["42", "69", "65536"]);
    assert!(matches!(parse(&msg), Err(CoreError::BadRequest)));

    // Highest valid values pass.
    let msg = base(MsgType::Confirmable, MsgCode::GET, &["65535", "65534", "65535"]);
    assert_eq!(
        parse(&msg).expect("parse").uri,
        UriPath::Resource(65535, 65534, 65535)
    );

    // Non-numeric garbage.
    let msg = base(MsgType::Confirmable, MsgCode::GET, &["42", "x"]);
    assert!(matches!(parse(&msg), Err(CoreError::BadRequest)));
}

#[test]
fn test_critical_option_validation() {
    // Uri-Query is not allowed on GET.
    let msg = base(MsgType::Confirmable, MsgCode::GET, &["42"])
        .with_option(CoapOption::string(opt::URI_QUERY, "pmin=5"));
    assert!(matches!(
        validate_critical_options(&msg),
        Err(CoreError::BadOption)
    ));

    // Accept is not allowed on PUT.
    let msg = base(MsgType::Confirmable, MsgCode::PUT, &["42"])
        .with_option(CoapOption::uint(opt::ACCEPT, 0));
    assert!(matches!(
        validate_critical_options(&msg),
        Err(CoreError::BadOption)
    ));

    // Elective options always pass.
    let msg = base(MsgType::Confirmable, MsgCode::GET, &["42"])
        .with_option(CoapOption::uint(opt::OBSERVE, 0))
        .with_option(CoapOption::uint(opt::CONTENT_FORMAT, 0));
    assert!(validate_critical_options(&msg).is_ok());

    let msg = base(MsgType::Confirmable, MsgCode::PUT, &["42", "69"])
        .with_option(CoapOption::string(opt::URI_QUERY, "pmin=5"));
    assert!(validate_critical_options(&msg).is_ok());
}
