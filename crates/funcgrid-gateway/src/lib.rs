//! FuncGrid gateway: the control-plane core that accepts external
//! function invocations over HTTP and gRPC, dispatches them to local
//! watchdog processes through shared memory and a framed IPC channel,
//! and correlates completions back to the suspended client responses.
//!
//! Architecture in one paragraph: a dispatcher event loop owns the
//! listeners and transfers every accepted socket to an I/O worker
//! (each a single-threaded reactor pinned to its own OS thread).
//! Workers drive connections to completion; the dispatch core's
//! tables — client table, watchdog registry, external-call table —
//! are the only cross-thread state, each guarded by a narrow mutex.

mod call_table;
mod config;
mod conn;
mod core;
mod error;
mod grpc;
mod http;
mod ids;
mod server;
mod worker;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use grpc::{GrpcCallContext, GrpcStatus};
pub use http::{
    AsyncRequestHandler, HttpCallContext, HttpSyncContext, RequestMatcher, SyncRequestHandler,
};
pub use ids::{monotonic_micros, IdAllocator};
pub use server::{Server, State, StopHandle};
