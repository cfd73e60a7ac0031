//! Fixed-size control frames for the watchdog IPC stream.
//!
//! Little-endian throughout. A connecting peer sends one
//! `HandshakeMessage`, receives one `HandshakeResponse`, then the
//! stream carries `Message` frames in both directions. Frame sizes are
//! locked by tests; changing them is a protocol break.

use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::FuncCall;

/// Wire size of a [`Message`] frame.
pub const MESSAGE_WIRE_SIZE: usize = 24;
/// Wire size of a [`HandshakeMessage`] frame.
pub const HANDSHAKE_WIRE_SIZE: usize = 4;
/// Wire size of a [`HandshakeResponse`] frame.
pub const HANDSHAKE_RESPONSE_WIRE_SIZE: usize = 4;

/// Errors from decoding a control frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("frame truncated: expected {expected} bytes, got {got}")]
    ShortFrame { expected: usize, got: usize },

    #[error("unknown message type {0}")]
    UnknownMessageType(u16),

    #[error("unknown peer role {0}")]
    UnknownRole(u16),

    #[error("unknown handshake status {0}")]
    UnknownStatus(u16),
}

/// Role announced by a connecting IPC peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Per-function supervisor that accepts invocations.
    Watchdog,
    /// Co-located engine worker issuing nested calls.
    EngineWorker,
}

impl Role {
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Watchdog => 1,
            Self::EngineWorker => 2,
        }
    }

    pub fn from_u16(v: u16) -> Result<Self, WireError> {
        match v {
            1 => Ok(Self::Watchdog),
            2 => Ok(Self::EngineWorker),
            other => Err(WireError::UnknownRole(other)),
        }
    }
}

/// Handshake outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    Ok,
    /// Another watchdog already serves this `func_id`.
    WatchdogExists,
}

impl HandshakeStatus {
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Ok => 0,
            Self::WatchdogExists => 1,
        }
    }

    pub fn from_u16(v: u16) -> Result<Self, WireError> {
        match v {
            0 => Ok(Self::Ok),
            1 => Ok(Self::WatchdogExists),
            other => Err(WireError::UnknownStatus(other)),
        }
    }
}

/// First frame on a new IPC connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub role: Role,
    /// Only meaningful for `Role::Watchdog`.
    pub func_id: u16,
}

impl HandshakeMessage {
    pub fn encode(&self) -> [u8; HANDSHAKE_WIRE_SIZE] {
        let mut buf = [0u8; HANDSHAKE_WIRE_SIZE];
        let mut w = &mut buf[..];
        w.put_u16_le(self.role.to_u16());
        w.put_u16_le(self.func_id);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < HANDSHAKE_WIRE_SIZE {
            return Err(WireError::ShortFrame {
                expected: HANDSHAKE_WIRE_SIZE,
                got: data.len(),
            });
        }
        let mut r = data;
        let role = Role::from_u16(r.get_u16_le())?;
        let func_id = r.get_u16_le();
        Ok(Self { role, func_id })
    }
}

/// Reply to a [`HandshakeMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub status: HandshakeStatus,
    pub client_id: u16,
}

impl HandshakeResponse {
    pub fn encode(&self) -> [u8; HANDSHAKE_RESPONSE_WIRE_SIZE] {
        let mut buf = [0u8; HANDSHAKE_RESPONSE_WIRE_SIZE];
        let mut w = &mut buf[..];
        w.put_u16_le(self.status.to_u16());
        w.put_u16_le(self.client_id);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < HANDSHAKE_RESPONSE_WIRE_SIZE {
            return Err(WireError::ShortFrame {
                expected: HANDSHAKE_RESPONSE_WIRE_SIZE,
                got: data.len(),
            });
        }
        let mut r = data;
        let status = HandshakeStatus::from_u16(r.get_u16_le())?;
        let client_id = r.get_u16_le();
        Ok(Self { status, client_id })
    }
}

/// Control frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Gateway → watchdog: run the named call, input is in shared memory.
    InvokeFunc,
    /// Watchdog → gateway: output region is ready.
    FuncCallComplete,
    /// Watchdog → gateway: the call failed, no output.
    FuncCallFailed,
}

impl MessageType {
    pub fn to_u16(self) -> u16 {
        match self {
            Self::InvokeFunc => 1,
            Self::FuncCallComplete => 2,
            Self::FuncCallFailed => 3,
        }
    }

    pub fn from_u16(v: u16) -> Result<Self, WireError> {
        match v {
            1 => Ok(Self::InvokeFunc),
            2 => Ok(Self::FuncCallComplete),
            3 => Ok(Self::FuncCallFailed),
            other => Err(WireError::UnknownMessageType(other)),
        }
    }
}

/// One control frame on an established IPC connection.
///
/// `send_timestamp` and `processing_time` carry profiling data end to
/// end; they are zero when the sender does not measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub message_type: MessageType,
    pub func_call: FuncCall,
    /// Monotonic micros at send time, for delay accounting.
    pub send_timestamp: i64,
    /// Callee-side processing micros, echoed on completions.
    pub processing_time: u32,
}

impl Message {
    pub fn invoke_func(func_call: FuncCall) -> Self {
        Self::new(MessageType::InvokeFunc, func_call)
    }

    pub fn func_call_complete(func_call: FuncCall) -> Self {
        Self::new(MessageType::FuncCallComplete, func_call)
    }

    pub fn func_call_failed(func_call: FuncCall) -> Self {
        Self::new(MessageType::FuncCallFailed, func_call)
    }

    fn new(message_type: MessageType, func_call: FuncCall) -> Self {
        Self {
            message_type,
            func_call,
            send_timestamp: 0,
            processing_time: 0,
        }
    }

    pub fn with_send_timestamp(mut self, micros: i64) -> Self {
        self.send_timestamp = micros;
        self
    }

    pub fn with_processing_time(mut self, micros: u32) -> Self {
        self.processing_time = micros;
        self
    }

    /// Layout: type u16, reserved u16, full_call_id u64,
    /// send_timestamp i64, processing_time u32.
    pub fn encode(&self) -> [u8; MESSAGE_WIRE_SIZE] {
        let mut buf = [0u8; MESSAGE_WIRE_SIZE];
        let mut w = &mut buf[..];
        w.put_u16_le(self.message_type.to_u16());
        w.put_u16_le(0);
        w.put_u64_le(self.func_call.full_call_id());
        w.put_i64_le(self.send_timestamp);
        w.put_u32_le(self.processing_time);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < MESSAGE_WIRE_SIZE {
            return Err(WireError::ShortFrame {
                expected: MESSAGE_WIRE_SIZE,
                got: data.len(),
            });
        }
        let mut r = data;
        let message_type = MessageType::from_u16(r.get_u16_le())?;
        let _reserved = r.get_u16_le();
        let func_call = FuncCall::from_full_call_id(r.get_u64_le());
        let send_timestamp = r.get_i64_le();
        let processing_time = r.get_u32_le();
        Ok(Self {
            message_type,
            func_call,
            send_timestamp,
            processing_time,
        })
    }
}
