// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use lwm2m_client_rs::{
    dm::{
        attributes::{Attributes, AttrsQuery, effective_attrs, RequestAttributes},
        DataModel,
    },
    io::Value,
};

use crate::unit_tests::common::{as_object, MockObject};

fn dm_with_server(ssid: u16, pmin: Option<i64>, pmax: Option<i64>) -> DataModel {
    let mut dm = DataModel::new();
    let server = MockObject::new(1, &[0, 1, 2, 3]);
    {
        let mut srv = server.borrow_mut();
        srv.set(0, 0, Value::Int(i64::from(ssid)));
        srv.set(0, 1, Value::Int(86400));
        if let Some(pmin) = pmin {
            srv.set(0, 2, Value::Int(pmin));
        }
        if let Some(pmax) = pmax {
            srv.set(0, 3, Value::Int(pmax));
        }
    }
    dm.register(as_object(&server)).expect("register Server");
    dm
}

#[test]
fn test_inheritance_chain_resource_to_server() {
    let dm = dm_with_server(14, Some(2), Some(120));
    let target = MockObject::new(42, &[4]);
    {
        let mut obj = target.borrow_mut();
        obj.set(69, 4, Value::Int(514));
        obj.resource_attrs.insert(
            (69, 4, 14),
            Attributes {
                min_period: Some(5),
                ..Attributes::default()
            },
        );
        obj.instance_attrs.insert(
            (69, 14),
            Attributes {
                max_period: Some(60),
                ..Attributes::default()
            },
        );
        obj.object_attrs.insert(
            14,
            Attributes {
                greater_than: Some(1.5),
                ..Attributes::default()
            },
        );
    }
    let obj = as_object(&target);

    let attrs = effective_attrs(
        &dm,
        &AttrsQuery {
            obj: &obj,
            iid: Some(69),
            rid: Some(4),
            ssid: 14,
            with_server_defaults: true,
        },
    )
    .expect("effective attrs");

    // Resource pmin beats the server default; the instance supplies pmax.
    assert_eq!(attrs.min_period, Some(5));
    assert_eq!(attrs.max_period, Some(60));
    assert_eq!(attrs.greater_than, Some(1.5));
    assert_eq!(attrs.less_than, None);
    assert_eq!(attrs.step, None);
}

#[test]
fn test_server_defaults_fill_unset_periods() {
    let dm = dm_with_server(14, Some(2), Some(120));
    let target = MockObject::new(42, &[4]);
    target.borrow_mut().set(69, 4, Value::Int(514));
    let obj = as_object(&target);

    let attrs = effective_attrs(
        &dm,
        &AttrsQuery {
            obj: &obj,
            iid: Some(69),
            rid: Some(4),
            ssid: 14,
            with_server_defaults: true,
        },
    )
    .expect("effective attrs");

    assert_eq!(attrs.min_period, Some(2));
    assert_eq!(attrs.max_period, Some(120));
}

#[test]
fn test_pmin_defaults_to_one_second() {
    // No Server object at all: the resolver still ends with pmin == 1.
    let dm = DataModel::new();
    let target = MockObject::new(42, &[4]);
    target.borrow_mut().set(69, 4, Value::Int(514));
    let obj = as_object(&target);

    let attrs = effective_attrs(
        &dm,
        &AttrsQuery {
            obj: &obj,
            iid: Some(69),
            rid: Some(4),
            ssid: 14,
            with_server_defaults: true,
        },
    )
    .expect("effective attrs");

    assert_eq!(attrs.min_period, Some(1));
    assert_eq!(attrs.max_period, None);
}

#[test]
fn test_combine_is_first_set_wins() {
    let a = Attributes {
        min_period: Some(5),
        less_than: Some(0.5),
        ..Attributes::default()
    };
    let b = Attributes {
        min_period: Some(99),
        max_period: Some(60),
        step: Some(2.0),
        ..Attributes::default()
    };

    // combine(combine(out, a), b) == combine(out, union-first-set-wins).
    let mut sequential = Attributes::default();
    sequential.combine(&a);
    sequential.combine(&b);

    let union = Attributes {
        min_period: Some(5),
        max_period: Some(60),
        greater_than: None,
        less_than: Some(0.5),
        step: Some(2.0),
    };
    assert_eq!(sequential, union);
}

#[test]
fn test_request_attributes_apply_and_clear() {
    let mut attrs = Attributes {
        min_period: Some(5),
        max_period: Some(60),
        ..Attributes::default()
    };
    let update = RequestAttributes {
        min_period: Some(Some(10)),
        // `pmax` with no value clears the stored attribute.
        max_period: Some(None),
        step: Some(Some(0.5)),
        ..RequestAttributes::default()
    };
    update.apply_to(&mut attrs);

    assert_eq!(attrs.min_period, Some(10));
    assert_eq!(attrs.max_period, None);
    assert_eq!(attrs.step, Some(0.5));
}

#[test]
fn test_resource_attrs_validity() {
    let valid = Attributes {
        less_than: Some(1.0),
        greater_than: Some(10.0),
        step: Some(2.0),
        ..Attributes::default()
    };
    assert!(valid.resource_attrs_valid());

    // lt + 2*st >= gt
    let invalid = Attributes {
        less_than: Some(5.0),
        greater_than: Some(10.0),
        step: Some(4.0),
        ..Attributes::default()
    };
    assert!(!invalid.resource_attrs_valid());

    let negative_step = Attributes {
        step: Some(-1.0),
        ..Attributes::default()
    };
    assert!(!negative_step.resource_attrs_valid());
}
