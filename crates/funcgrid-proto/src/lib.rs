//! Wire protocol and shared identities for FuncGrid.
//!
//! Everything a gateway and a watchdog must agree on lives here: the
//! packed call identity, the fixed-size control frames exchanged over
//! the IPC stream, and the function config registry loaded at startup.
//! Payload bytes never travel inline — they go through shared memory
//! (see `funcgrid-shm`); these frames only carry identities.

mod call;
mod func_config;
mod message;

pub use call::FuncCall;
pub use func_config::{FuncConfig, FuncConfigError, FuncEntry};
pub use message::{
    HandshakeMessage, HandshakeResponse, HandshakeStatus, Message, MessageType, Role, WireError,
    HANDSHAKE_RESPONSE_WIRE_SIZE, HANDSHAKE_WIRE_SIZE, MESSAGE_WIRE_SIZE,
};
