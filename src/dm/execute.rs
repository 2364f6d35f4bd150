// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Execute argument parser.
//!
//! Argument syntax: `arg[=value][,arg[=value]...]` where `arg` is a single
//! digit 0..9 and `value` is single-quoted, unescaped bytes. Values can be
//! streamed out through a caller-supplied buffer; skipping to the next
//! argument discards any unread remainder.

use crate::errors::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Positioned at the start of an argument.
    ReadArgument,
    /// Inside a quoted value.
    ReadValue,
    /// Value fully consumed, a `,` separator already swallowed.
    FinishedArgument,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecArg {
    pub number: u8,
    pub has_value: bool,
}

#[derive(Debug)]
pub struct ExecuteCtx<'a> {
    data: &'a [u8],
    pos: usize,
    state: State,
}

impl<'a> ExecuteCtx<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ExecuteCtx {
            data,
            pos: 0,
            state: if data.is_empty() {
                State::Eof
            } else {
                State::ReadArgument
            },
        }
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.data.get(self.pos).copied()?;
        self.pos += 1;
        Some(b)
    }

    /// Consumes the separator following a complete argument or value.
    fn finish_argument(&mut self) -> CoreResult<()> {
        match self.bump() {
            None => {
                self.state = State::Eof;
                Ok(())
            },
            Some(b',') => {
                self.state = State::FinishedArgument;
                Ok(())
            },
            Some(_) => Err(CoreError::BadRequest),
        }
    }

    fn skip_value(&mut self) -> CoreResult<()> {
        loop {
            match self.bump() {
                Some(b'\'') => return self.finish_argument(),
                Some(_) => continue,
                None => return Err(CoreError::BadRequest),
            }
        }
    }

    /// Advances to the next argument, discarding any unread value bytes.
    /// Returns `None` once the argument list is exhausted.
    pub fn next_arg(&mut self) -> CoreResult<Option<ExecArg>> {
        match self.state {
            State::Eof => return Ok(None),
            State::ReadValue => self.skip_value()?,
            State::ReadArgument | State::FinishedArgument => {},
        }
        if self.state == State::Eof {
            return Ok(None);
        }

        let digit = self.bump().ok_or(CoreError::BadRequest)?;
        if !digit.is_ascii_digit() {
            return Err(CoreError::BadRequest);
        }
        let number = digit - b'0';

        match self.bump() {
            None => {
                self.state = State::Eof;
                Ok(Some(ExecArg {
                    number,
                    has_value: false,
                }))
            },
            Some(b',') => {
                self.state = State::ReadArgument;
                Ok(Some(ExecArg {
                    number,
                    has_value: false,
                }))
            },
            Some(b'=') => {
                if self.bump() != Some(b'\'') {
                    return Err(CoreError::BadRequest);
                }
                self.state = State::ReadValue;
                Ok(Some(ExecArg {
                    number,
                    has_value: true,
                }))
            },
            Some(_) => Err(CoreError::BadRequest),
        }
    }

    /// Reads up to `buf.len() - 1` bytes of the current argument's value.
    /// Returns the number of bytes read; 0 once the value is exhausted.
    /// The buffer must hold at least 2 bytes.
    pub fn get_arg_value(&mut self, buf: &mut [u8]) -> CoreResult<usize> {
        if buf.len() < 2 {
            return Err(CoreError::Internal);
        }
        if self.state != State::ReadValue {
            return Ok(0);
        }
        let mut read = 0;
        while read < buf.len() - 1 {
            match self.bump() {
                Some(b'\'') => {
                    self.finish_argument()?;
                    break;
                },
                Some(b) => {
                    buf[read] = b;
                    read += 1;
                },
                None => return Err(CoreError::BadRequest),
            }
        }
        Ok(read)
    }
}
