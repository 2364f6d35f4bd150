// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use lwm2m_client_rs::{
    access::{action_allowed, ActionInfo},
    dm::DataModel,
    interface::request::Action,
    io::Value,
};

use crate::unit_tests::common::{as_object, MockObject};

fn info(ssid: u16, oid: u16, iid: Option<u16>, action: Action) -> ActionInfo {
    ActionInfo {
        ssid,
        oid,
        iid,
        action,
    }
}

/// Access Control instance: /2/<ac_iid> with target, owner and ACL.
fn add_ac_instance(
    ac: &std::rc::Rc<std::cell::RefCell<MockObject>>,
    ac_iid: u16,
    target_oid: u16,
    target_iid: u16,
    owner: u16,
    acl: &[(u16, i64)],
) {
    let mut obj = ac.borrow_mut();
    obj.set(ac_iid, 0, Value::Int(i64::from(target_oid)));
    obj.set(ac_iid, 1, Value::Int(i64::from(target_iid)));
    obj.set(ac_iid, 3, Value::Int(i64::from(owner)));
    obj.arrays.insert(
        (ac_iid, 2),
        acl.iter().map(|(key, mask)| (*key, Value::Int(*mask))).collect(),
    );
}

#[test]
fn test_security_object_always_denied() {
    let dm = DataModel::new();
    assert!(!action_allowed(&dm, 0, &info(14, 0, Some(0), Action::Read)));
    assert!(!action_allowed(&dm, 5, &info(14, 0, None, Action::Create)));
}

#[test]
fn test_no_access_control_or_single_server_allows() {
    let dm = DataModel::new();
    assert!(action_allowed(&dm, 2, &info(14, 42, Some(1), Action::Write)));

    let mut dm = DataModel::new();
    let ac = MockObject::new(2, &[0, 1, 2, 3]);
    dm.register(as_object(&ac)).expect("register AC");
    // Access Control registered, but a single-server environment.
    assert!(action_allowed(&dm, 1, &info(14, 42, Some(1), Action::Delete)));
}

#[test]
fn test_acl_mask_decides() {
    let mut dm = DataModel::new();
    let ac = MockObject::new(2, &[0, 1, 2, 3]);
    // READ|WRITE for SSID 14 on /42/69, owned by server 1.
    add_ac_instance(&ac, 0, 42, 69, 1, &[(14, 3)]);
    dm.register(as_object(&ac)).expect("register AC");

    assert!(action_allowed(&dm, 2, &info(14, 42, Some(69), Action::Read)));
    assert!(action_allowed(&dm, 2, &info(14, 42, Some(69), Action::Write)));
    assert!(!action_allowed(&dm, 2, &info(14, 42, Some(69), Action::Execute)));
    assert!(!action_allowed(&dm, 2, &info(14, 42, Some(69), Action::Delete)));
    // Write-Attributes is never subject to ACLs.
    assert!(action_allowed(
        &dm,
        2,
        &info(14, 42, Some(69), Action::WriteAttributes)
    ));
}

#[test]
fn test_default_acl_entry_applies_to_other_ssids() {
    let mut dm = DataModel::new();
    let ac = MockObject::new(2, &[0, 1, 2, 3]);
    // Default entry (key 0) grants READ only.
    add_ac_instance(&ac, 0, 42, 69, 1, &[(0, 1), (14, 15)]);
    dm.register(as_object(&ac)).expect("register AC");

    assert!(action_allowed(&dm, 2, &info(99, 42, Some(69), Action::Read)));
    assert!(!action_allowed(&dm, 2, &info(99, 42, Some(69), Action::Write)));
    // The exact entry still wins for its SSID.
    assert!(action_allowed(&dm, 2, &info(14, 42, Some(69), Action::Delete)));
}

#[test]
fn test_empty_acl_falls_back_to_owner() {
    let mut dm = DataModel::new();
    let ac = MockObject::new(2, &[0, 1, 2, 3]);
    add_ac_instance(&ac, 0, 42, 69, 14, &[]);
    dm.register(as_object(&ac)).expect("register AC");

    // The owner gets everything but Create.
    assert!(action_allowed(&dm, 2, &info(14, 42, Some(69), Action::Read)));
    assert!(action_allowed(&dm, 2, &info(14, 42, Some(69), Action::Delete)));
    // Other servers get nothing.
    assert!(!action_allowed(&dm, 2, &info(15, 42, Some(69), Action::Read)));
}

#[test]
fn test_create_uses_bootstrap_owned_instance() {
    let mut dm = DataModel::new();
    let ac = MockObject::new(2, &[0, 1, 2, 3]);
    // Bootstrap-owned (owner 0) instance with OIID 65535 carries Create
    // rights for SSID 14.
    add_ac_instance(&ac, 0, 42, 65535, 0, &[(14, 16)]);
    dm.register(as_object(&ac)).expect("register AC");

    assert!(action_allowed(&dm, 2, &info(14, 42, None, Action::Create)));
    assert!(!action_allowed(&dm, 2, &info(15, 42, None, Action::Create)));
}

#[test]
fn test_access_control_object_itself() {
    let mut dm = DataModel::new();
    let ac = MockObject::new(2, &[0, 1, 2, 3]);
    add_ac_instance(&ac, 3, 42, 69, 14, &[]);
    dm.register(as_object(&ac)).expect("register AC");

    assert!(action_allowed(&dm, 2, &info(14, 2, Some(3), Action::Read)));
    assert!(!action_allowed(&dm, 2, &info(14, 2, None, Action::Create)));
    assert!(!action_allowed(&dm, 2, &info(14, 2, Some(3), Action::Delete)));
    // Write only for the instance owner.
    assert!(action_allowed(&dm, 2, &info(14, 2, Some(3), Action::Write)));
    assert!(!action_allowed(&dm, 2, &info(15, 2, Some(3), Action::Write)));
}
