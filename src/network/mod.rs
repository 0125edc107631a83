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

//! Network Module Implementation
//!
//! This module turns TCP sockets into message queues: connections that accept
//! messages for delivery and hand every message received from the peer to a
//! [`Handler`].
//!
//! # Components
//!
//! - `MessageHeader`: the fixed 12 byte frame header and its codec
//! - `Message`: header, body and parser payload of one unit of data
//! - `Parser` / `ParserFactory`: pluggable wire-format parsing with a
//!   per-parser error policy
//! - `Connection`: one socket with an inbound and an outbound task, or one
//!   listening socket with an accept task
//! - `ConnectionRegistry`: live connections by id
//!
//! # Features
//!
//! - Framed (header + body) and line-delimited wire modes
//! - Read and write deadlines on every socket operation
//! - Bounded outbound buffer with backpressure
//! - Partial writes resumed without resending bytes
//! - Recoverable parse errors answered with remind frames

pub use connection::{Connection, Role, WireMode, OUTBOUND_BUFFER_SIZE};
pub use frame::{frame_len, MessageHeader, HEADER_SIZE};
pub use handler::{Handler, MessageFuture, MessageHandlerFn, MessageRouter};
pub use message::{Message, Payload};
pub use parser::{ParseError, ParseErrorPolicy, Parser, ParserFactory};
pub use registry::ConnectionRegistry;

mod connection;
mod frame;
mod handler;
mod message;
mod parser;
mod registry;
