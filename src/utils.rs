// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::errors::{CoreError, CoreResult};

/// Strict decimal parser for Uri-Path and Uri-Query values: no sign, no
/// leading `+`, no surrounding whitespace, no empty input.
pub fn parse_decimal_u32(s: &str) -> CoreResult<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoreError::BadRequest);
    }
    s.parse::<u32>().map_err(|_| CoreError::BadRequest)
}

/// Parses a non-negative integer attribute value (`pmin`/`pmax`).
pub fn parse_attr_period(s: &str) -> CoreResult<i64> {
    let value: i64 = s.parse().map_err(|_| CoreError::BadOption)?;
    if value < 0 {
        return Err(CoreError::BadOption);
    }
    Ok(value)
}

/// Parses a floating-point attribute value (`gt`/`lt`/`st`); NaN is
/// rejected because it doubles as the "unset" sentinel on the wire.
pub fn parse_attr_double(s: &str) -> CoreResult<f64> {
    let value: f64 = s.parse().map_err(|_| CoreError::BadOption)?;
    if value.is_nan() {
        return Err(CoreError::BadOption);
    }
    Ok(value)
}

/// Splits a Uri-Query segment on the first `=`. A missing `=` yields a
/// `None` value, which attribute parsing treats as "unset explicitly".
pub fn split_query(segment: &str) -> (&str, Option<&str>) {
    match segment.split_once('=') {
        Some((key, value)) => (key, Some(value)),
        None => (segment, None),
    }
}
