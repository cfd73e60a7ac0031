//! Process-wide id allocation.

use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// Owner of every monotonic counter the gateway hands out.
///
/// `client_id` starts at 1: 0 is reserved for "external" in the
/// packed call identity.
#[derive(Debug)]
pub struct IdAllocator {
    next_client_id: AtomicU16,
    next_call_id: AtomicU32,
    next_http_connection_id: AtomicU64,
    next_grpc_connection_id: AtomicU64,
    next_message_connection_id: AtomicU64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self {
            next_client_id: AtomicU16::new(1),
            next_call_id: AtomicU32::new(0),
            next_http_connection_id: AtomicU64::new(0),
            next_grpc_connection_id: AtomicU64::new(0),
            next_message_connection_id: AtomicU64::new(0),
        }
    }
}

impl IdAllocator {
    pub fn next_client_id(&self) -> u16 {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_call_id(&self) -> u32 {
        self.next_call_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_http_connection_id(&self) -> u64 {
        self.next_http_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_grpc_connection_id(&self) -> u64 {
        self.next_grpc_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_message_connection_id(&self) -> u64 {
        self.next_message_connection_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Monotonic microsecond timestamp, for message delay accounting.
pub fn monotonic_micros() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_micros() as i64
}
