//! Gateway error types.

use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Fatal gateway failures. Client-visible routing misses (unknown
/// function, missing watchdog, failed call) are not errors at this
/// level — they terminate as HTTP/gRPC status responses.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway is in state {actual:?}, operation requires {required:?}")]
    InvalidState {
        required: crate::server::State,
        actual: crate::server::State,
    },

    #[error("failed to load function config: {0}")]
    FuncConfig(#[from] funcgrid_proto::FuncConfigError),

    #[error("shared memory setup failed: {0}")]
    SharedMemory(#[from] funcgrid_shm::ShmError),

    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}
