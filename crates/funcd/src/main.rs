//! funcd — the FuncGrid gateway daemon.
//!
//! Binds the HTTP, gRPC, and watchdog IPC endpoints, then serves
//! until `POST /shutdown` or Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! funcd --func-config-file func_config.json \
//!       --shared-mem-path /dev/shm/funcgrid \
//!       --ipc-path /tmp/funcgrid/ipc.sock \
//!       --port 8080 --grpc-port 50051
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use funcgrid_gateway::{GatewayConfig, Server};

#[derive(Parser)]
#[command(name = "funcd", about = "FuncGrid gateway daemon")]
struct Cli {
    /// Bind address for the TCP listeners.
    #[arg(long, default_value = "0.0.0.0")]
    address: String,

    /// HTTP/1.1 port.
    #[arg(long, default_value = "8080")]
    port: u16,

    /// gRPC (HTTP/2) port.
    #[arg(long, default_value = "50051")]
    grpc_port: u16,

    /// Unix-domain socket for watchdog IPC.
    #[arg(long, default_value = "/tmp/funcgrid/ipc.sock")]
    ipc_path: PathBuf,

    /// JSON function registry.
    #[arg(long)]
    func_config_file: PathBuf,

    /// Directory backing shared-memory payload regions (wiped at start).
    #[arg(long, default_value = "/dev/shm/funcgrid")]
    shared_mem_path: PathBuf,

    /// HTTP worker pool size.
    #[arg(long, default_value = "1")]
    num_http_workers: usize,

    /// IPC worker pool size.
    #[arg(long, default_value = "1")]
    num_ipc_workers: usize,

    #[arg(long, default_value = "64")]
    listen_backlog: u32,

    #[arg(long, default_value = "2")]
    gateway_conn_per_worker: usize,

    #[arg(long)]
    func_worker_use_engine_socket: bool,

    #[arg(long)]
    use_fifo_for_nested_call: bool,

    #[arg(long)]
    func_worker_pipe_direct_write: bool,

    #[arg(long, default_value = "128")]
    io_uring_entries: u32,

    #[arg(long, default_value = "128")]
    io_uring_fd_slots: u32,

    #[arg(long)]
    io_uring_sqpoll: bool,

    #[arg(long, default_value = "1")]
    io_uring_sq_thread_idle_ms: u32,

    #[arg(long, default_value = "1")]
    io_uring_cq_nr_wait: u32,

    #[arg(long, default_value = "0")]
    io_uring_cq_wait_timeout_us: u32,

    #[arg(long)]
    enable_shared_log: bool,

    #[arg(long, default_value = "2")]
    shared_log_num_replicas: usize,

    #[arg(long, default_value = "1000")]
    shared_log_local_cut_interval_us: u64,

    #[arg(long, default_value = "1000")]
    shared_log_global_cut_interval_us: u64,
}

impl Cli {
    fn into_config(self) -> GatewayConfig {
        GatewayConfig {
            address: self.address,
            http_port: self.port,
            grpc_port: self.grpc_port,
            ipc_path: self.ipc_path,
            func_config_file: self.func_config_file,
            shared_mem_path: self.shared_mem_path,
            num_http_workers: self.num_http_workers,
            num_ipc_workers: self.num_ipc_workers,
            listen_backlog: self.listen_backlog,
            gateway_conn_per_worker: self.gateway_conn_per_worker,
            func_worker_use_engine_socket: self.func_worker_use_engine_socket,
            use_fifo_for_nested_call: self.use_fifo_for_nested_call,
            func_worker_pipe_direct_write: self.func_worker_pipe_direct_write,
            io_uring_entries: self.io_uring_entries,
            io_uring_fd_slots: self.io_uring_fd_slots,
            io_uring_sqpoll: self.io_uring_sqpoll,
            io_uring_sq_thread_idle_ms: self.io_uring_sq_thread_idle_ms,
            io_uring_cq_nr_wait: self.io_uring_cq_nr_wait,
            io_uring_cq_wait_timeout_us: self.io_uring_cq_wait_timeout_us,
            enable_shared_log: self.enable_shared_log,
            shared_log_num_replicas: self.shared_log_num_replicas,
            shared_log_local_cut_interval_us: self.shared_log_local_cut_interval_us,
            shared_log_global_cut_interval_us: self.shared_log_global_cut_interval_us,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,funcd=debug,funcgrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.into_config();
    info!(
        address = %config.address,
        http_port = config.http_port,
        grpc_port = config.grpc_port,
        "FuncGrid gateway starting"
    );
    if config.enable_shared_log {
        info!(
            num_replicas = config.shared_log_num_replicas,
            local_cut_interval_us = config.shared_log_local_cut_interval_us,
            global_cut_interval_us = config.shared_log_global_cut_interval_us,
            "shared log enabled"
        );
    }

    let mut server = Server::new(config);
    server.start()?;

    // Ctrl-C maps to the same stop path as POST /shutdown.
    let stop = server.stop_handle();
    std::thread::Builder::new()
        .name("Signal-Handler".to_string())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build();
            if let Ok(runtime) = runtime {
                runtime.block_on(async {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("shutdown signal received");
                        stop.schedule_stop();
                    }
                });
            }
        })?;

    server.wait_for_finish();
    info!("FuncGrid gateway stopped");
    Ok(())
}
