pub mod network;
pub mod service;

pub use network::{
    Connection, Handler, Message, MessageHeader, MessageRouter, ParseError, ParseErrorPolicy,
    Parser, ParserFactory, Payload, Role, WireMode, HEADER_SIZE,
};
pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, Engine, EngineConfig, ErrorCode,
    NetworkConfig, Stats,
};
