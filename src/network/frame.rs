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

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size in bytes of an encoded [`MessageHeader`].
pub const HEADER_SIZE: usize = 12;

/// Length a header declares for a body of `len` bytes, `None` when the body
/// does not fit the 32-bit length field.
pub fn frame_len(len: usize) -> Option<u32> {
    u32::try_from(len).ok()
}

/// Fixed-size frame header, encoded little-endian:
///
/// ```text
/// | len: u32 | error: u16 | cmd: u8 | act: u8 | index: u16 | flags: u16 |
/// ```
///
/// `len` is the number of body bytes following the header. A zero `len`
/// marks a header-only control frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHeader {
    pub len: u32,
    pub error: u16,
    pub cmd: u8,
    pub act: u8,
    pub index: u16,
    pub flags: u16,
}

impl MessageHeader {
    pub fn new(cmd: u8, act: u8, len: u32) -> Self {
        MessageHeader {
            len,
            cmd,
            act,
            ..Default::default()
        }
    }

    /// Header of a remind frame carrying only an error code.
    pub fn with_error(error: u16) -> Self {
        MessageHeader {
            error,
            ..Default::default()
        }
    }

    /// Decodes a header, returning `None` unless `bytes` is exactly
    /// [`HEADER_SIZE`] long.
    pub fn decode(bytes: &[u8]) -> Option<MessageHeader> {
        if bytes.len() != HEADER_SIZE {
            return None;
        }
        let mut buf = bytes;
        Some(MessageHeader {
            len: buf.get_u32_le(),
            error: buf.get_u16_le(),
            cmd: buf.get_u8(),
            act: buf.get_u8(),
            index: buf.get_u16_le(),
            flags: buf.get_u16_le(),
        })
    }

    pub fn body_len(&self) -> u32 {
        self.len
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_SIZE);
        buf.put_u32_le(self.len);
        buf.put_u16_le(self.error);
        buf.put_u8(self.cmd);
        buf.put_u8(self.act);
        buf.put_u16_le(self.index);
        buf.put_u16_le(self.flags);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Combined command/action routing key.
    pub fn cmd_act(&self) -> u16 {
        ((self.cmd as u16) << 8) | self.act as u16
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(MessageHeader::default())]
    #[case(MessageHeader::new(1, 2, 5))]
    #[case(MessageHeader { len: u32::MAX, error: u16::MAX, cmd: 0xff, act: 0xff, index: u16::MAX, flags: u16::MAX })]
    #[case(MessageHeader { len: 0x0102_0304, error: 4, cmd: 7, act: 9, index: 513, flags: 0x8001 })]
    fn test_header_round_trip(#[case] header: MessageHeader) {
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(MessageHeader::decode(&bytes), Some(header));
    }

    #[test]
    fn test_layout_is_little_endian() {
        let header = MessageHeader {
            len: 5,
            error: 0x0102,
            cmd: 3,
            act: 4,
            index: 0x0506,
            flags: 0x0708,
        };
        assert_eq!(
            header.to_bytes().as_ref(),
            &[5, 0, 0, 0, 0x02, 0x01, 3, 4, 0x06, 0x05, 0x08, 0x07]
        );
    }

    #[rstest]
    #[case(0)]
    #[case(HEADER_SIZE - 1)]
    #[case(HEADER_SIZE + 1)]
    fn test_decode_rejects_wrong_size(#[case] size: usize) {
        let bytes = vec![0u8; size];
        assert_eq!(MessageHeader::decode(&bytes), None);
    }

    #[rstest]
    #[case(0, Some(0))]
    #[case(5, Some(5))]
    #[case(u32::MAX as usize, Some(u32::MAX))]
    fn test_frame_len(#[case] len: usize, #[case] expected: Option<u32>) {
        assert_eq!(frame_len(len), expected);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_frame_len_rejects_oversized_body() {
        assert_eq!(frame_len(u32::MAX as usize + 1), None);
    }

    #[test]
    fn test_cmd_act() {
        assert_eq!(MessageHeader::new(1, 2, 0).cmd_act(), 0x0102);
    }
}
