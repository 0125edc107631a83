// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Pluggable wire-format parsing.
//!
//! A [`ParserFactory`] is shared by every connection of a listener and hands
//! out one [`Parser`] per connection, so a parser may keep per-session state.

use std::fmt::Debug;

use super::frame::MessageHeader;
use super::message::{Message, Payload};
use super::WireMode;
use crate::service::{ErrorCode, ErrorRegistry};

/// What the inbound loop does when [`Parser::parse_inbound`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseErrorPolicy {
    /// reply with a remind message and keep reading
    #[default]
    SendRemind,
    /// stop the connection
    Close,
    /// dispatch the message without a payload
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parse error {code}: {message}")]
pub struct ParseError {
    pub code: u16,
    pub message: String,
}

impl ParseError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        ParseError {
            code,
            message: message.into(),
        }
    }

    /// Error carrying the code registered for `name`, or
    /// [`ErrorCode::ErrorIdNotFound`] when the name is unknown.
    pub fn registered(registry: &ErrorRegistry, name: &str, message: impl Into<String>) -> Self {
        ParseError::new(registry.code_of(name), message)
    }
}

impl From<ErrorCode> for ParseError {
    fn from(code: ErrorCode) -> Self {
        ParseError::new(code.code(), code.message())
    }
}

pub trait Parser: Send {
    fn parse_inbound(&mut self, msg: &Message) -> Result<Payload, ParseError>;

    fn error_policy(&self) -> ParseErrorPolicy {
        ParseErrorPolicy::SendRemind
    }

    /// Reply sent back to the peer for a recoverable parse failure.
    fn remind_message(&self, err: &ParseError, mode: WireMode) -> Message {
        match mode {
            WireMode::Framed => Message::header_only(MessageHeader::with_error(err.code)),
            WireMode::Line => Message::raw(format!("error {}\n", err.code)),
        }
    }
}

pub trait ParserFactory: Send + Sync + Debug {
    fn get(&self) -> Box<dyn Parser>;
}

/// Runs `parser` over `msg` and decides how the inbound loop continues.
pub(crate) enum ParseOutcome {
    Dispatch(Message),
    Remind(Message),
    Close,
}

pub(crate) fn apply_parser(
    parser: Option<&mut Box<dyn Parser>>,
    mut msg: Message,
    mode: WireMode,
) -> ParseOutcome {
    let Some(parser) = parser else {
        return ParseOutcome::Dispatch(msg);
    };
    match parser.parse_inbound(&msg) {
        Ok(payload) => {
            msg.set_payload(payload);
            ParseOutcome::Dispatch(msg)
        }
        Err(err) => match parser.error_policy() {
            ParseErrorPolicy::SendRemind => {
                ParseOutcome::Remind(parser.remind_message(&err, mode).copy_tag(&msg))
            }
            ParseErrorPolicy::Close => ParseOutcome::Close,
            ParseErrorPolicy::Ignore => ParseOutcome::Dispatch(msg),
        },
    }
}
