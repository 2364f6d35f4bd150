// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::Bytes;
use lwm2m_client_rs::{
    coap::msg::{CoapOption, MsgCode, opt},
    io::{IdKind, OutputCtx, TlvOutput, Value},
};

use crate::unit_tests::common::{
    as_object, con_delete, con_get, con_post, con_put, new_env, serve_one,
    serve_one_lenient, setup_with_ssids, MockObject,
};

#[test]
fn test_read_resource_plaintext() {
    let mut env = new_env();
    setup_with_ssids(&mut env, &[14]);
    let obj = MockObject::new(42, &[4]);
    obj.borrow_mut().set(69, 4, Value::Int(514));
    env.client.register_object(as_object(&obj)).expect("register");

    let response = serve_one(&mut env, 14, con_get(&["42", "69", "4"], 0xfa3e));

    assert_eq!(response.identity.msg_id, 0xfa3e);
    assert_eq!(response.details.code, MsgCode::CONTENT);
    assert_eq!(response.details.format, 0);
    assert_eq!(response.payload.as_ref(), b"514");
}

#[test]
fn test_read_missing_object_and_instance() {
    let mut env = new_env();
    setup_with_ssids(&mut env, &[14]);
    let obj = MockObject::new(42, &[4]);
    obj.borrow_mut().set(69, 4, Value::Int(514));
    env.client.register_object(as_object(&obj)).expect("register");

    let response = serve_one_lenient(&mut env, 14, con_get(&["77"], 1));
    assert_eq!(response.details.code, MsgCode::NOT_FOUND);

    let response = serve_one_lenient(&mut env, 14, con_get(&["42", "70"], 2));
    assert_eq!(response.details.code, MsgCode::NOT_FOUND);
}

#[test]
fn test_write_then_read_roundtrip() {
    let mut env = new_env();
    setup_with_ssids(&mut env, &[14]);
    let obj = MockObject::new(42, &[4]);
    obj.borrow_mut().set(69, 4, Value::Int(514));
    env.client.register_object(as_object(&obj)).expect("register");

    let write = con_put(&["42", "69", "4"], 0x100)
        .with_option(CoapOption::uint(opt::CONTENT_FORMAT, 0))
        .with_payload(Bytes::from_static(b"Hello"));
    let response = serve_one(&mut env, 14, write);
    assert_eq!(response.details.code, MsgCode::CHANGED);

    let response = serve_one(&mut env, 14, con_get(&["42", "69", "4"], 0x101));
    assert_eq!(response.details.code, MsgCode::CONTENT);
    assert_eq!(response.payload.as_ref(), b"Hello");
}

#[test]
fn test_write_tlv_rid_mismatch() {
    let mut env = new_env();
    setup_with_ssids(&mut env, &[14]);
    let obj = MockObject::new(42, &[4, 5]);
    obj.borrow_mut().set(514, 4, Value::Int(1));
    env.client.register_object(as_object(&obj)).expect("register");

    // TLV carries RID 5, Uri-Path says 4.
    let write = con_put(&["42", "514", "4"], 0x200)
        .with_option(CoapOption::uint(opt::CONTENT_FORMAT, 11542))
        .with_payload(Bytes::from_static(b"\xc5\x05Hello"));
    let response = serve_one_lenient(&mut env, 14, write);
    assert_eq!(response.details.code, MsgCode::BAD_REQUEST);
}

fn instance_payload(iid: u16, rid: u16, value: Value) -> Bytes {
    let mut out = TlvOutput::new();
    out.begin_instance(iid).expect("begin");
    out.set_id(IdKind::Rid, rid).expect("rid");
    out.ret(value).expect("value");
    out.end_instance().expect("end");
    out.finish()
}

#[test]
fn test_create_with_explicit_iid_then_read() {
    let mut env = new_env();
    setup_with_ssids(&mut env, &[14]);
    let obj = MockObject::new(42, &[4]);
    env.client.register_object(as_object(&obj)).expect("register");

    let create = con_post(&["42"], 0x300)
        .with_option(CoapOption::uint(opt::CONTENT_FORMAT, 11542))
        .with_payload(instance_payload(514, 4, Value::Str("abc".to_string())));
    let response = serve_one(&mut env, 14, create);
    assert_eq!(response.details.code, MsgCode::CREATED);
    assert_eq!(response.details.location_path, vec!["42", "514"]);

    let response = serve_one(&mut env, 14, con_get(&["42", "514", "4"], 0x301));
    assert_eq!(response.payload.as_ref(), b"abc");
}

#[test]
fn test_create_existing_iid_rejected() {
    let mut env = new_env();
    setup_with_ssids(&mut env, &[14]);
    let obj = MockObject::new(42, &[4]);
    obj.borrow_mut().set(69, 4, Value::Int(1));
    env.client.register_object(as_object(&obj)).expect("register");

    let create = con_post(&["42"], 0x310)
        .with_option(CoapOption::uint(opt::CONTENT_FORMAT, 11542))
        .with_payload(instance_payload(69, 4, Value::Int(2)));
    let response = serve_one_lenient(&mut env, 14, create);
    assert_eq!(response.details.code, MsgCode::BAD_REQUEST);
}

#[test]
fn test_delete_instance() {
    let mut env = new_env();
    setup_with_ssids(&mut env, &[14]);
    let obj = MockObject::new(42, &[4]);
    obj.borrow_mut().set(69, 4, Value::Int(514));
    env.client.register_object(as_object(&obj)).expect("register");

    let response = serve_one(&mut env, 14, con_delete(&["42", "69"], 0x400));
    assert_eq!(response.details.code, MsgCode::DELETED);
    assert!(obj.borrow().instances.is_empty());

    let response = serve_one_lenient(&mut env, 14, con_get(&["42", "69"], 0x401));
    assert_eq!(response.details.code, MsgCode::NOT_FOUND);
}

#[test]
fn test_delete_requires_instance_path() {
    let mut env = new_env();
    setup_with_ssids(&mut env, &[14]);
    let obj = MockObject::new(42, &[4]);
    obj.borrow_mut().set(69, 4, Value::Int(514));
    env.client.register_object(as_object(&obj)).expect("register");

    let response = serve_one_lenient(&mut env, 14, con_delete(&["42"], 0x410));
    assert_eq!(response.details.code, MsgCode::METHOD_NOT_ALLOWED);
    let response = serve_one_lenient(&mut env, 14, con_delete(&["42", "69", "4"], 0x411));
    assert_eq!(response.details.code, MsgCode::METHOD_NOT_ALLOWED);
}

#[test]
fn test_execute_with_arguments() {
    let mut env = new_env();
    setup_with_ssids(&mut env, &[14]);
    let obj = MockObject::new(42, &[4]);
    obj.borrow_mut().set(69, 4, Value::Int(514));
    env.client.register_object(as_object(&obj)).expect("register");

    let execute = con_post(&["42", "69", "4"], 0x500)
        .with_payload(Bytes::from_static(b"2='abc',5"));
    let response = serve_one(&mut env, 14, execute);
    assert_eq!(response.details.code, MsgCode::CHANGED);

    let mock = obj.borrow();
    assert_eq!(mock.executed.len(), 1);
    let (iid, rid, args) = &mock.executed[0];
    assert_eq!((*iid, *rid), (69, 4));
    assert_eq!(args.as_slice(), &[(2, b"abc".to_vec()), (5, Vec::new())]);
}

#[test]
fn test_discover_resource_lists_attributes() {
    let mut env = new_env();
    setup_with_ssids(&mut env, &[14]);
    let obj = MockObject::new(42, &[4]);
    {
        let mut mock = obj.borrow_mut();
        mock.set(69, 4, Value::Int(514));
        mock.resource_attrs.insert(
            (69, 4, 14),
            lwm2m_client_rs::dm::attributes::Attributes {
                min_period: Some(5),
                max_period: Some(10),
                ..Default::default()
            },
        );
    }
    env.client.register_object(as_object(&obj)).expect("register");

    let discover =
        con_get(&["42", "69", "4"], 0x600).with_option(CoapOption::uint(opt::ACCEPT, 40));
    let response = serve_one(&mut env, 14, discover);
    assert_eq!(response.details.code, MsgCode::CONTENT);
    assert_eq!(response.details.format, 40);
    assert_eq!(response.payload.as_ref(), b"</42/69/4>;pmin=5;pmax=10");
}

#[test]
fn test_write_attributes_stores_and_validates() {
    let mut env = new_env();
    setup_with_ssids(&mut env, &[14]);
    let obj = MockObject::new(42, &[4]);
    obj.borrow_mut().set(69, 4, Value::Int(514));
    env.client.register_object(as_object(&obj)).expect("register");

    let write = con_put(&["42", "69", "4"], 0x700)
        .with_option(CoapOption::string(opt::URI_QUERY, "pmin=5"))
        .with_option(CoapOption::string(opt::URI_QUERY, "pmax=20"));
    let response = serve_one(&mut env, 14, write);
    assert_eq!(response.details.code, MsgCode::CHANGED);
    {
        let stored = obj.borrow().resource_attrs[&(69, 4, 14)];
        assert_eq!(stored.min_period, Some(5));
        assert_eq!(stored.max_period, Some(20));
    }

    // lt + 2*st >= gt fails validation.
    let write = con_put(&["42", "69", "4"], 0x701)
        .with_option(CoapOption::string(opt::URI_QUERY, "lt=10"))
        .with_option(CoapOption::string(opt::URI_QUERY, "gt=5"))
        .with_option(CoapOption::string(opt::URI_QUERY, "st=4"));
    let response = serve_one_lenient(&mut env, 14, write);
    assert_eq!(response.details.code, MsgCode::BAD_REQUEST);

    // Resource-specific attributes on a non-resource path.
    let write = con_put(&["42", "69"], 0x702)
        .with_option(CoapOption::string(opt::URI_QUERY, "gt=5"));
    let response = serve_one_lenient(&mut env, 14, write);
    assert_eq!(response.details.code, MsgCode::BAD_REQUEST);

    // An entirely empty attribute set is a success no-op.
    let write = con_put(&["42", "69", "4"], 0x703);
    let response = serve_one(&mut env, 14, write);
    assert_eq!(response.details.code, MsgCode::CHANGED);
}

#[test]
fn test_uri_boundaries_produce_bad_request() {
    let mut env = new_env();
    setup_with_ssids(&mut env, &[14]);

    let response = serve_one_lenient(&mut env, 14, con_get(&["42", "69", "4", "1"], 1));
    assert_eq!(response.details.code, MsgCode::BAD_REQUEST);

    let response = serve_one_lenient(&mut env, 14, con_get(&["42", "65535"], 2));
    assert_eq!(response.details.code, MsgCode::BAD_REQUEST);

    let response = serve_one_lenient(&mut env, 14, con_get(&["42", "69", "65536"], 3));
    assert_eq!(response.details.code, MsgCode::BAD_REQUEST);
}

#[test]
fn test_rejected_critical_option_is_bad_option() {
    let mut env = new_env();
    setup_with_ssids(&mut env, &[14]);
    let obj = MockObject::new(42, &[4]);
    obj.borrow_mut().set(69, 4, Value::Int(514));
    env.client.register_object(as_object(&obj)).expect("register");

    let read = con_get(&["42", "69", "4"], 0x800)
        .with_option(CoapOption::string(opt::URI_QUERY, "pmin=5"));
    let response = serve_one_lenient(&mut env, 14, read);
    assert_eq!(response.details.code, MsgCode::BAD_OPTION);
}

#[test]
fn test_bootstrap_delete_all() {
    let mut env = new_env();
    let core = setup_with_ssids(&mut env, &[0]);
    let obj = MockObject::new(42, &[4]);
    obj.borrow_mut().set(69, 4, Value::Int(514));
    obj.borrow_mut().set(70, 4, Value::Int(515));
    env.client.register_object(as_object(&obj)).expect("register");

    let response = serve_one(&mut env, 0, con_delete(&[], 0x900));
    assert_eq!(response.details.code, MsgCode::DELETED);
    assert!(obj.borrow().instances.is_empty());
    assert!(core.security.borrow().instances.is_empty());
}
