//! Gateway server: lifecycle, listeners, and the event-loop thread.
//!
//! The server owns three listeners (HTTP TCP, gRPC TCP, IPC unix
//! socket) and accepts on a dedicated event-loop thread with its own
//! reactor. Accepted sockets are immediately transferred to an I/O
//! worker picked round-robin from the matching pool; the event loop
//! itself never reads from a connection. Handler registration is only
//! legal before `start`, so the frozen handler list needs no locking
//! once workers run.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use funcgrid_proto::FuncConfig;
use funcgrid_shm::SharedMemory;

use crate::config::GatewayConfig;
use crate::core::GatewayCore;
use crate::error::{GatewayError, GatewayResult};
use crate::http::{
    AsyncRequestHandler, HandlerEntry, RequestHandlerKind, RequestMatcher, SyncRequestHandler,
};
use crate::worker::{IoWorker, ReturnedConnection, RoundRobin, Transfer, WorkerEnv};

/// Gateway lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Running => 1,
            Self::Stopping => 2,
            Self::Stopped => 3,
        }
    }
}

/// Cloneable handle for requesting shutdown from another thread
/// (signal handlers, test harnesses).
#[derive(Clone)]
pub struct StopHandle {
    stop_tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn schedule_stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

pub struct Server {
    config: GatewayConfig,
    state: Arc<AtomicU8>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    handlers: Vec<HandlerEntry>,
    http_workers: Vec<IoWorker>,
    ipc_workers: Vec<IoWorker>,
    event_loop: Option<std::thread::JoinHandle<()>>,
    http_addr: Option<SocketAddr>,
    grpc_addr: Option<SocketAddr>,
}

impl Server {
    pub fn new(config: GatewayConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            config,
            state: Arc::new(AtomicU8::new(State::Created.to_u8())),
            stop_tx,
            stop_rx,
            handlers: Vec::new(),
            http_workers: Vec::new(),
            ipc_workers: Vec::new(),
            event_loop: None,
            http_addr: None,
            grpc_addr: None,
        }
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Bound HTTP address, available once started. Useful with port 0.
    pub fn http_local_addr(&self) -> Option<SocketAddr> {
        self.http_addr
    }

    pub fn grpc_local_addr(&self) -> Option<SocketAddr> {
        self.grpc_addr
    }

    pub fn ipc_path(&self) -> &std::path::Path {
        &self.config.ipc_path
    }

    /// Register a handler producing its full response inline.
    /// Handlers match in registration order; only legal before start.
    pub fn register_sync_request_handler(
        &mut self,
        matcher: RequestMatcher,
        handler: SyncRequestHandler,
    ) -> GatewayResult<()> {
        self.check_state(State::Created)?;
        self.handlers.push(HandlerEntry {
            matcher,
            handler: RequestHandlerKind::Sync(handler),
        });
        Ok(())
    }

    /// Register a handler that may hold its context across
    /// suspensions; it must eventually finish the context.
    pub fn register_async_request_handler(
        &mut self,
        matcher: RequestMatcher,
        handler: AsyncRequestHandler,
    ) -> GatewayResult<()> {
        self.check_state(State::Created)?;
        self.handlers.push(HandlerEntry {
            matcher,
            handler: RequestHandlerKind::Async(handler),
        });
        Ok(())
    }

    /// Load the function config, reset the shared-memory directory,
    /// spawn the worker pools, bind all listeners, and start the
    /// event loop. Any failure here is fatal initialization.
    pub fn start(&mut self) -> GatewayResult<()> {
        self.check_state(State::Created)?;

        let func_config = FuncConfig::load(&self.config.func_config_file)?;
        let shared_memory = SharedMemory::new(&self.config.shared_mem_path)?;
        let core = Arc::new(GatewayCore::new(
            self.config.clone(),
            func_config,
            shared_memory,
        ));

        // Built-in routes go after user handlers: first match wins
        // and callers may override.
        self.register_internal_request_handlers(&core);
        let handlers = Arc::new(std::mem::take(&mut self.handlers));

        let http_std = bind_tcp(&self.config.address, self.config.http_port)?;
        self.http_addr = Some(http_std.local_addr().map_err(GatewayError::Io)?);
        info!(addr = ?self.http_addr, "listening for HTTP requests");

        let grpc_std = bind_tcp(&self.config.address, self.config.grpc_port)?;
        self.grpc_addr = Some(grpc_std.local_addr().map_err(GatewayError::Io)?);
        info!(addr = ?self.grpc_addr, "listening for gRPC requests");

        let ipc_std = bind_ipc(&self.config.ipc_path)?;
        info!(path = %self.config.ipc_path.display(), "listening for IPC with watchdog processes");
        debug!(
            backlog = self.config.listen_backlog,
            io_uring_entries = self.config.io_uring_entries,
            "listener tuning"
        );

        let (return_tx, return_rx) = mpsc::unbounded_channel();
        for i in 0..self.config.num_http_workers.max(1) {
            let env = WorkerEnv::new(Arc::clone(&core), Arc::clone(&handlers), return_tx.clone());
            self.http_workers
                .push(IoWorker::start(format!("HttpWorker-{i}"), env)?);
        }
        for i in 0..self.config.num_ipc_workers.max(1) {
            let env = WorkerEnv::new(Arc::clone(&core), Arc::clone(&handlers), return_tx.clone());
            self.ipc_workers
                .push(IoWorker::start(format!("IpcWorker-{i}"), env)?);
        }
        drop(return_tx);

        let http_pool: Vec<_> = self.http_workers.iter().map(IoWorker::transfer_sender).collect();
        let ipc_pool: Vec<_> = self.ipc_workers.iter().map(IoWorker::transfer_sender).collect();

        let state = Arc::clone(&self.state);
        let loop_core = Arc::clone(&core);
        let stop_rx = self.stop_rx.clone();
        let event_loop = std::thread::Builder::new()
            .name("Gateway-EventLoop".to_string())
            .spawn(move || {
                event_loop_main(
                    loop_core, http_std, grpc_std, ipc_std, http_pool, ipc_pool, return_rx,
                    stop_rx, state,
                )
            })
            .map_err(GatewayError::Io)?;

        self.event_loop = Some(event_loop);
        self.state
            .store(State::Running.to_u8(), Ordering::Release);
        Ok(())
    }

    /// Post a stop wake to the event loop. Safe to call repeatedly.
    pub fn schedule_stop(&self) {
        info!("scheduled to stop");
        let _ = self.stop_tx.send(true);
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop_tx: self.stop_tx.clone(),
        }
    }

    /// Join the worker pools, then the event-loop thread.
    pub fn wait_for_finish(&mut self) {
        debug_assert!(self.state() != State::Created);
        for worker in self.http_workers.iter_mut().chain(self.ipc_workers.iter_mut()) {
            worker.wait_for_finish();
        }
        if let Some(thread) = self.event_loop.take() {
            if thread.join().is_err() {
                error!("event loop thread panicked");
            }
        }
        debug_assert!(self.state() == State::Stopped);
        info!("gateway stopped");
    }

    fn check_state(&self, required: State) -> GatewayResult<()> {
        let actual = self.state();
        if actual != required {
            return Err(GatewayError::InvalidState { required, actual });
        }
        Ok(())
    }

    fn register_internal_request_handlers(&mut self, core: &Arc<GatewayCore>) {
        // POST /shutdown
        let stop_tx = self.stop_tx.clone();
        self.handlers.push(HandlerEntry {
            matcher: Arc::new(|method, path| method == "POST" && path == "/shutdown"),
            handler: RequestHandlerKind::Sync(Arc::new(move |context| {
                context.append_to_response_body("Server is shutting down\n");
                let _ = stop_tx.send(true);
            })),
        });
        // GET /hello
        self.handlers.push(HandlerEntry {
            matcher: Arc::new(|method, path| method == "GET" && path == "/hello"),
            handler: RequestHandlerKind::Sync(Arc::new(|context| {
                context.append_to_response_body("Hello world\n");
            })),
        });
        // POST /function/<name> — matches only configured functions,
        // so unknown names fall through to the built-in 404.
        let matcher_core = Arc::clone(core);
        let handler_core = Arc::clone(core);
        self.handlers.push(HandlerEntry {
            matcher: Arc::new(move |method, path| {
                method == "POST"
                    && path
                        .strip_prefix("/function/")
                        .is_some_and(|name| matcher_core.func_config.find_by_func_name(name).is_some())
            }),
            handler: RequestHandlerKind::Async(Arc::new(move |context| {
                let func_id = context
                    .path()
                    .strip_prefix("/function/")
                    .and_then(|name| handler_core.func_config.find_by_func_name(name))
                    .map(|entry| entry.func_id);
                match func_id {
                    Some(func_id) => handler_core.on_external_func_call(func_id, context),
                    None => {
                        context.set_response_status(http::StatusCode::NOT_FOUND);
                        context.finish();
                    }
                }
            })),
        });
    }
}

fn bind_tcp(address: &str, port: u16) -> GatewayResult<std::net::TcpListener> {
    let endpoint = format!("{address}:{port}");
    let listener = std::net::TcpListener::bind(&endpoint).map_err(|source| GatewayError::Bind {
        endpoint: endpoint.clone(),
        source,
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|source| GatewayError::Bind { endpoint, source })?;
    Ok(listener)
}

fn bind_ipc(path: &std::path::Path) -> GatewayResult<std::os::unix::net::UnixListener> {
    let endpoint = path.display().to_string();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| GatewayError::Bind {
            endpoint: endpoint.clone(),
            source,
        })?;
    }
    // A stale socket file from a crashed run would fail the bind.
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(GatewayError::Bind {
                endpoint,
                source,
            })
        }
    }
    let listener =
        std::os::unix::net::UnixListener::bind(path).map_err(|source| GatewayError::Bind {
            endpoint: endpoint.clone(),
            source,
        })?;
    listener
        .set_nonblocking(true)
        .map_err(|source| GatewayError::Bind { endpoint, source })?;
    Ok(listener)
}

#[allow(clippy::too_many_arguments)]
fn event_loop_main(
    core: Arc<GatewayCore>,
    http_std: std::net::TcpListener,
    grpc_std: std::net::TcpListener,
    ipc_std: std::os::unix::net::UnixListener,
    http_pool: Vec<mpsc::UnboundedSender<Transfer>>,
    ipc_pool: Vec<mpsc::UnboundedSender<Transfer>>,
    mut return_rx: mpsc::UnboundedReceiver<ReturnedConnection>,
    mut stop_rx: watch::Receiver<bool>,
    state: Arc<AtomicU8>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build event loop reactor");
            state.store(State::Stopped.to_u8(), Ordering::Release);
            return;
        }
    };

    runtime.block_on(async {
        let (http_listener, grpc_listener, ipc_listener) = match (
            tokio::net::TcpListener::from_std(http_std),
            tokio::net::TcpListener::from_std(grpc_std),
            tokio::net::UnixListener::from_std(ipc_std),
        ) {
            (Ok(http), Ok(grpc), Ok(ipc)) => (http, grpc, ipc),
            _ => {
                error!("failed to register listeners with event loop reactor");
                return;
            }
        };
        info!("event loop started");

        let mut http_cursor = RoundRobin::default();
        let mut ipc_cursor = RoundRobin::default();
        loop {
            tokio::select! {
                result = http_listener.accept() => match result {
                    Ok((stream, _peer)) => {
                        let conn_id = core.ids.next_http_connection_id();
                        transfer_tcp(&http_pool, &mut http_cursor, stream, |stream| {
                            Transfer::Http { conn_id, stream }
                        });
                    }
                    Err(e) => warn!(error = %e, "failed to accept HTTP connection"),
                },
                result = grpc_listener.accept() => match result {
                    Ok((stream, _peer)) => {
                        let conn_id = core.ids.next_grpc_connection_id();
                        // gRPC sockets share the HTTP worker pool.
                        transfer_tcp(&http_pool, &mut http_cursor, stream, |stream| {
                            Transfer::Grpc { conn_id, stream }
                        });
                    }
                    Err(e) => warn!(error = %e, "failed to accept gRPC connection"),
                },
                result = ipc_listener.accept() => match result {
                    Ok((stream, _addr)) => {
                        let conn_id = core.ids.next_message_connection_id();
                        info!(conn_id, "new message connection");
                        match stream.into_std() {
                            Ok(stream) => {
                                let index = ipc_cursor.pick(ipc_pool.len());
                                if ipc_pool[index]
                                    .send(Transfer::Message { conn_id, stream })
                                    .is_err()
                                {
                                    error!("IPC worker transfer channel closed");
                                }
                            }
                            Err(e) => error!(error = %e, "failed to detach IPC socket"),
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to accept message connection"),
                },
                Some(returned) = return_rx.recv() => on_connection_returned(&core, returned),
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        let previous = state.swap(State::Stopping.to_u8(), Ordering::AcqRel);
                        if previous == State::Stopping.to_u8() {
                            warn!("already in stopping state");
                            continue;
                        }
                        info!("start stopping process");
                        for sender in http_pool.iter().chain(ipc_pool.iter()) {
                            let _ = sender.send(Transfer::Stop);
                        }
                        break;
                    }
                }
            }
        }

        // Listeners close here; drain worker returns until every
        // worker has finished and dropped its sender.
        drop(http_listener);
        drop(grpc_listener);
        drop(ipc_listener);
        while let Some(returned) = return_rx.recv().await {
            on_connection_returned(&core, returned);
        }
    });

    state.store(State::Stopped.to_u8(), Ordering::Release);
    info!("event loop finished");
}

fn transfer_tcp(
    pool: &[mpsc::UnboundedSender<Transfer>],
    cursor: &mut RoundRobin,
    stream: tokio::net::TcpStream,
    make: impl FnOnce(std::net::TcpStream) -> Transfer,
) {
    match stream.into_std() {
        Ok(stream) => {
            let index = cursor.pick(pool.len());
            if pool[index].send(make(stream)).is_err() {
                error!("worker transfer channel closed");
            }
        }
        Err(e) => error!(error = %e, "failed to detach accepted socket"),
    }
}

fn on_connection_returned(core: &Arc<GatewayCore>, returned: ReturnedConnection) {
    match returned {
        ReturnedConnection::Http { conn_id } => {
            debug!(conn_id, "HTTP connection returned");
        }
        ReturnedConnection::Grpc { conn_id } => {
            debug!(conn_id, "gRPC connection returned");
        }
        ReturnedConnection::Message {
            conn_id,
            client_id,
            role,
            func_id,
        } => {
            info!(conn_id, "message connection returned");
            if let Some(client_id) = client_id {
                core.on_message_connection_closed(conn_id, client_id, role, func_id);
            }
        }
    }
}
