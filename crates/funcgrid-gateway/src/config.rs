//! Gateway configuration surface.
//!
//! One flag set travels across engine builds, so reactor-tuning knobs
//! are carried even by subsystems that only log them. Defaults match
//! the deployed engine.

use std::path::PathBuf;

/// Full configuration for one gateway process.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address for both TCP listeners.
    pub address: String,
    /// HTTP/1.1 listener port.
    pub http_port: u16,
    /// gRPC (HTTP/2) listener port.
    pub grpc_port: u16,
    /// Unix-domain stream for watchdog and engine-worker IPC.
    pub ipc_path: PathBuf,
    /// JSON function registry, loaded once at start.
    pub func_config_file: PathBuf,
    /// Directory backing shared-memory payload regions; wiped at start.
    pub shared_mem_path: PathBuf,

    pub num_http_workers: usize,
    pub num_ipc_workers: usize,
    pub listen_backlog: u32,

    /// Connections each worker keeps to the gateway in engine builds.
    pub gateway_conn_per_worker: usize,
    /// Route nested calls through the engine socket instead of IPC.
    pub func_worker_use_engine_socket: bool,
    /// Use FIFOs rather than shared memory for nested-call payloads.
    pub use_fifo_for_nested_call: bool,
    /// Let function workers write pipe payloads without staging.
    pub func_worker_pipe_direct_write: bool,

    // Reactor ring tuning, applied where the runtime exposes a knob
    // and logged otherwise.
    pub io_uring_entries: u32,
    pub io_uring_fd_slots: u32,
    pub io_uring_sqpoll: bool,
    pub io_uring_sq_thread_idle_ms: u32,
    pub io_uring_cq_nr_wait: u32,
    pub io_uring_cq_wait_timeout_us: u32,

    // Shared log layer.
    pub enable_shared_log: bool,
    pub shared_log_num_replicas: usize,
    pub shared_log_local_cut_interval_us: u64,
    pub shared_log_global_cut_interval_us: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            http_port: 8080,
            grpc_port: 50051,
            ipc_path: PathBuf::from("/tmp/funcgrid/ipc.sock"),
            func_config_file: PathBuf::from("func_config.json"),
            shared_mem_path: PathBuf::from("/dev/shm/funcgrid"),
            num_http_workers: 1,
            num_ipc_workers: 1,
            listen_backlog: 64,
            gateway_conn_per_worker: 2,
            func_worker_use_engine_socket: false,
            use_fifo_for_nested_call: false,
            func_worker_pipe_direct_write: false,
            io_uring_entries: 128,
            io_uring_fd_slots: 128,
            io_uring_sqpoll: false,
            io_uring_sq_thread_idle_ms: 1,
            io_uring_cq_nr_wait: 1,
            io_uring_cq_wait_timeout_us: 0,
            enable_shared_log: false,
            shared_log_num_replicas: 2,
            shared_log_local_cut_interval_us: 1000,
            shared_log_global_cut_interval_us: 1000,
        }
    }
}
