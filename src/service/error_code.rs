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

//! Numeric error codes carried in the `error` field of remind frames.
//!
//! Codes below [`MIN_USER_ERROR`] belong to the engine and its codecs,
//! everything from [`MIN_USER_ERROR`] upwards is registered by the caller.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{AppError, AppResult};

/// first code available to callers
pub const MIN_USER_ERROR: u16 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    None = 0,
    DbError = 1,

    /// codec pack/unpack errors
    ProtoPack = 2,
    ProtoUnpack = 3,
    MsgPackPack = 4,
    MsgPackUnpack = 5,
    PbPack = 6,
    PbUnpack = 7,
    JsonPack = 8,
    JsonUnpack = 9,
    CmdUnpack = 10,

    FileRead = 100,
    ErrorIdNotFound = 255,
}

impl ErrorCode {
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::None => "",
            ErrorCode::DbError => "database error",
            ErrorCode::ProtoPack => "failed to pack protocol message",
            ErrorCode::ProtoUnpack => "failed to unpack protocol message",
            ErrorCode::MsgPackPack => "failed to pack msgpack message",
            ErrorCode::MsgPackUnpack => "failed to unpack msgpack message",
            ErrorCode::PbPack => "failed to pack protobuf message",
            ErrorCode::PbUnpack => "failed to unpack protobuf message",
            ErrorCode::JsonPack => "failed to pack json message",
            ErrorCode::JsonUnpack => "failed to unpack json message",
            ErrorCode::CmdUnpack => "failed to unpack command line",
            ErrorCode::FileRead => "failed to read file",
            ErrorCode::ErrorIdNotFound => "no code registered for this error",
        }
    }

    pub fn code(&self) -> u16 {
        *self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(ErrorCode::None),
            1 => Some(ErrorCode::DbError),
            2 => Some(ErrorCode::ProtoPack),
            3 => Some(ErrorCode::ProtoUnpack),
            4 => Some(ErrorCode::MsgPackPack),
            5 => Some(ErrorCode::MsgPackUnpack),
            6 => Some(ErrorCode::PbPack),
            7 => Some(ErrorCode::PbUnpack),
            8 => Some(ErrorCode::JsonPack),
            9 => Some(ErrorCode::JsonUnpack),
            10 => Some(ErrorCode::CmdUnpack),
            100 => Some(ErrorCode::FileRead),
            255 => Some(ErrorCode::ErrorIdNotFound),
            _ => None,
        }
    }
}

/// Bidirectional mapping between caller-defined error names and codes.
#[derive(Debug, Default)]
pub struct ErrorRegistry {
    inner: RwLock<RegistryMaps>,
}

#[derive(Debug, Default)]
struct RegistryMaps {
    by_code: HashMap<u16, String>,
    by_name: HashMap<String, u16>,
}

impl ErrorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` under `code`. Codes below [`MIN_USER_ERROR`] are reserved.
    pub fn register(&self, name: impl Into<String>, code: u16) -> AppResult<()> {
        if code < MIN_USER_ERROR {
            return Err(AppError::InvalidValue(format!(
                "error code {} is reserved, user codes start at {}",
                code, MIN_USER_ERROR
            )));
        }
        let name = name.into();
        let mut maps = self.inner.write();
        if let Some(old) = maps.by_code.insert(code, name.clone()) {
            maps.by_name.remove(&old);
        }
        maps.by_name.insert(name, code);
        Ok(())
    }

    /// Looks up the code of a registered error, falling back to
    /// [`ErrorCode::ErrorIdNotFound`].
    pub fn code_of(&self, name: &str) -> u16 {
        self.inner
            .read()
            .by_name
            .get(name)
            .copied()
            .unwrap_or(ErrorCode::ErrorIdNotFound.code())
    }

    pub fn error_of(&self, code: u16) -> Option<String> {
        if let Some(builtin) = ErrorCode::from_code(code) {
            return Some(builtin.message().to_string());
        }
        self.inner.read().by_code.get(&code).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_codes() {
        assert_eq!(ErrorCode::MsgPackPack.code(), 4);
        assert_eq!(ErrorCode::from_code(100), Some(ErrorCode::FileRead));
        assert_eq!(ErrorCode::from_code(11), None);
    }

    #[test]
    fn test_register_user_error() {
        let registry = ErrorRegistry::new();
        registry.register("bad login", 300).unwrap();
        assert_eq!(registry.code_of("bad login"), 300);
        assert_eq!(registry.error_of(300).as_deref(), Some("bad login"));
        assert_eq!(registry.code_of("never registered"), 255);
    }

    #[test]
    fn test_reserved_code_rejected() {
        let registry = ErrorRegistry::new();
        assert!(registry.register("clash", 12).is_err());
    }

    #[test]
    fn test_reregister_replaces_name() {
        let registry = ErrorRegistry::new();
        registry.register("first", 400).unwrap();
        registry.register("second", 400).unwrap();
        assert_eq!(registry.code_of("first"), 255);
        assert_eq!(registry.code_of("second"), 400);
    }
}
