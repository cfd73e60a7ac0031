//! I/O workers and the connection transfer bus.
//!
//! Each worker owns a dedicated OS thread running a single-threaded
//! reactor (current-thread runtime plus `LocalSet`). The dispatcher
//! accepts sockets on its own event loop, deregisters them from its
//! reactor, and hands the raw socket plus a connection id across the
//! worker's transfer channel; the worker re-registers the socket with
//! its own reactor and pins the connection there for its lifetime.
//! Exactly one worker owns any given socket at any instant.
//!
//! Every pinned connection is represented dispatcher-side only by its
//! id; when it closes — or when the worker drains on stop — a
//! [`ConnGuard`] posts the connection back on the return channel so
//! the dispatcher can reclaim table entries.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use funcgrid_proto::Role;

use crate::conn::serve_message_connection;
use crate::core::GatewayCore;
use crate::grpc::serve_grpc_connection;
use crate::http::{serve_http_connection, HandlerEntry};

/// One freshly accepted socket crossing to its owner worker.
pub(crate) enum Transfer {
    Http {
        conn_id: u64,
        stream: std::net::TcpStream,
    },
    Grpc {
        conn_id: u64,
        stream: std::net::TcpStream,
    },
    Message {
        conn_id: u64,
        stream: std::os::unix::net::UnixStream,
    },
    Stop,
}

/// A connection handed back to the dispatcher for reclamation.
#[derive(Debug)]
pub(crate) enum ReturnedConnection {
    Http {
        conn_id: u64,
    },
    Grpc {
        conn_id: u64,
    },
    Message {
        conn_id: u64,
        client_id: Option<u16>,
        role: Option<Role>,
        func_id: u16,
    },
}

/// Shared environment each worker serves connections with.
#[derive(Clone)]
pub(crate) struct WorkerEnv {
    pub core: Arc<GatewayCore>,
    pub handlers: Arc<Vec<HandlerEntry>>,
    return_tx: mpsc::UnboundedSender<ReturnedConnection>,
}

impl WorkerEnv {
    pub fn new(
        core: Arc<GatewayCore>,
        handlers: Arc<Vec<HandlerEntry>>,
        return_tx: mpsc::UnboundedSender<ReturnedConnection>,
    ) -> Self {
        Self {
            core,
            handlers,
            return_tx,
        }
    }

    fn return_connection(&self, returned: ReturnedConnection) {
        let _ = self.return_tx.send(returned);
    }
}

/// Posts its payload on the return channel exactly once — at natural
/// connection close, or when the worker drops the serving task while
/// draining on stop.
pub(crate) struct ConnGuard {
    env: WorkerEnv,
    payload: Option<ReturnedConnection>,
}

impl ConnGuard {
    pub fn new(env: WorkerEnv, payload: ReturnedConnection) -> Self {
        Self {
            env,
            payload: Some(payload),
        }
    }

    /// Replace the payload once more is known about the connection
    /// (a message connection learns its client id at handshake).
    pub fn set(&mut self, payload: ReturnedConnection) {
        self.payload = Some(payload);
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        if let Some(payload) = self.payload.take() {
            self.env.return_connection(payload);
        }
    }
}

/// Executor handing hyper's HTTP/2 stream tasks to the worker-local
/// scheduler.
#[derive(Clone)]
pub(crate) struct LocalExec;

impl<F> hyper::rt::Executor<F> for LocalExec
where
    F: std::future::Future + 'static,
{
    fn execute(&self, future: F) {
        tokio::task::spawn_local(future);
    }
}

/// Handle to one I/O worker thread.
pub(crate) struct IoWorker {
    name: String,
    transfer_tx: mpsc::UnboundedSender<Transfer>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl IoWorker {
    /// Spawn the worker thread and start its reactor.
    pub fn start(name: String, env: WorkerEnv) -> std::io::Result<Self> {
        let (transfer_tx, transfer_rx) = mpsc::unbounded_channel();
        let thread_name = name.clone();
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_main(thread_name, transfer_rx, env))?;
        Ok(Self {
            name,
            transfer_tx,
            thread: Some(thread),
        })
    }

    /// Sender side of this worker's transfer channel, for the
    /// dispatcher's event loop.
    pub fn transfer_sender(&self) -> mpsc::UnboundedSender<Transfer> {
        self.transfer_tx.clone()
    }

    pub fn schedule_stop(&self) {
        let _ = self.transfer_tx.send(Transfer::Stop);
    }

    pub fn wait_for_finish(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(worker = %self.name, "worker thread panicked");
            }
        }
    }
}

fn worker_main(name: String, mut transfer_rx: mpsc::UnboundedReceiver<Transfer>, env: WorkerEnv) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(worker = %name, error = %e, "failed to build worker reactor");
            return;
        }
    };
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async {
        info!(worker = %name, "I/O worker started");
        while let Some(transfer) = transfer_rx.recv().await {
            match transfer {
                Transfer::Stop => break,
                Transfer::Http { conn_id, stream } => {
                    tokio::task::spawn_local(serve_http_connection(env.clone(), conn_id, stream));
                }
                Transfer::Grpc { conn_id, stream } => {
                    tokio::task::spawn_local(serve_grpc_connection(env.clone(), conn_id, stream));
                }
                Transfer::Message { conn_id, stream } => {
                    tokio::task::spawn_local(serve_message_connection(
                        env.clone(),
                        conn_id,
                        stream,
                    ));
                }
            }
        }
        info!(worker = %name, "I/O worker draining");
    });
    // Dropping the local set closes every still-pinned connection;
    // their guards post the returns.
    drop(local);
    info!(worker = %name, "I/O worker finished");
}

/// Round-robin cursor over a worker pool.
#[derive(Debug, Default)]
pub(crate) struct RoundRobin {
    next: usize,
}

impl RoundRobin {
    pub fn pick(&mut self, len: usize) -> usize {
        debug_assert!(len > 0);
        let index = self.next % len;
        self.next = (index + 1) % len;
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_cycles_in_order() {
        let mut cursor = RoundRobin::default();
        let picks: Vec<usize> = (0..7).map(|_| cursor.pick(3)).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn round_robin_single_worker() {
        let mut cursor = RoundRobin::default();
        assert_eq!(cursor.pick(1), 0);
        assert_eq!(cursor.pick(1), 0);
    }
}
