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

use std::any::Any;
use std::fmt::{Debug, Formatter};

use bytes::Bytes;

use super::frame::{frame_len, MessageHeader, HEADER_SIZE};

/// Parser output attached to an inbound message, opaque to the engine.
pub type Payload = Box<dyn Any + Send + Sync>;

/// Unit of data exchanged over a connection.
///
/// Framed messages always carry a header whose `len` equals the body length;
/// line messages have no header. The constructors keep that invariant.
#[derive(Default)]
pub struct Message {
    head: Option<MessageHeader>,
    body: Option<Bytes>,
    payload: Option<Payload>,
}

impl Message {
    /// Framed message; the header length is taken from `body`.
    ///
    /// A body too long for the length field saturates it, such a message is
    /// refused by every send.
    pub fn new(mut head: MessageHeader, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        head.len = frame_len(body.len()).unwrap_or(u32::MAX);
        Message {
            head: Some(head),
            body: if body.is_empty() { None } else { Some(body) },
            payload: None,
        }
    }

    pub fn with_cmd(cmd: u8, act: u8, body: impl Into<Bytes>) -> Self {
        Self::new(MessageHeader::new(cmd, act, 0), body)
    }

    /// Control frame without a body.
    pub fn header_only(mut head: MessageHeader) -> Self {
        head.len = 0;
        Message {
            head: Some(head),
            body: None,
            payload: None,
        }
    }

    /// Headerless message as used on line connections.
    pub fn raw(body: impl Into<Bytes>) -> Self {
        Message {
            head: None,
            body: Some(body.into()),
            payload: None,
        }
    }

    pub fn head(&self) -> Option<&MessageHeader> {
        self.head.as_ref()
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Body bytes, empty for header-only messages.
    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_deref().unwrap_or_default()
    }

    /// Correlation tag, the header `index` field.
    pub fn tag(&self) -> Option<u16> {
        self.head.map(|h| h.index)
    }

    /// Copies the correlation tag of `other` into this message.
    pub fn copy_tag(mut self, other: &Message) -> Self {
        if let (Some(head), Some(tag)) = (self.head.as_mut(), other.tag()) {
            head.index = tag;
        }
        self
    }

    pub fn set_payload(&mut self, payload: Payload) {
        self.payload = Some(payload);
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref().and_then(|p| p.downcast_ref::<T>())
    }

    pub fn take_payload(&mut self) -> Option<Payload> {
        self.payload.take()
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Whether the body length fits a frame header.
    pub fn fits_frame(&self) -> bool {
        frame_len(self.body_bytes().len()).is_some()
    }

    /// Number of bytes this message occupies on the wire.
    pub fn wire_len(&self) -> usize {
        let head = if self.head.is_some() { HEADER_SIZE } else { 0 };
        head + self.body_bytes().len()
    }
}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("head", &self.head)
            .field("body_len", &self.body.as_ref().map(|b| b.len()))
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sets_length() {
        let msg = Message::with_cmd(1, 2, &b"hello"[..]);
        assert_eq!(msg.head().unwrap().len, 5);
        assert_eq!(msg.wire_len(), HEADER_SIZE + 5);
    }

    #[test]
    fn test_empty_body_is_header_only() {
        let msg = Message::new(MessageHeader::new(1, 1, 99), Bytes::new());
        assert_eq!(msg.head().unwrap().len, 0);
        assert!(msg.body().is_none());
        assert_eq!(msg.wire_len(), HEADER_SIZE);
    }

    #[test]
    fn test_copy_tag() {
        let mut head = MessageHeader::new(3, 4, 0);
        head.index = 77;
        let request = Message::header_only(head);
        let reply = Message::header_only(MessageHeader::with_error(4)).copy_tag(&request);
        assert_eq!(reply.tag(), Some(77));
        assert_eq!(reply.head().unwrap().error, 4);

        // raw messages carry no tag
        let line = Message::raw("ping").copy_tag(&request);
        assert_eq!(line.tag(), None);
    }

    #[test]
    fn test_payload_downcast() {
        let mut msg = Message::raw("x");
        msg.set_payload(Box::new(42u32));
        assert_eq!(msg.payload::<u32>(), Some(&42));
        assert_eq!(msg.payload::<String>(), None);
        assert!(msg.take_payload().is_some());
        assert!(!msg.has_payload());
    }
}
