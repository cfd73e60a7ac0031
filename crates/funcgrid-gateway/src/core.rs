//! Dispatch core: peer tables, external-call table, message routing.
//!
//! Shared between the event-loop thread and every I/O worker. Two
//! mutexes guard the cross-thread state: one over the client table
//! plus watchdog registry, one over the external-call table. Each is
//! held only across the map mutation and the outbound enqueue — the
//! actual socket write happens on the connection's owner worker,
//! which its channel sender posts to safely from any thread.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use funcgrid_proto::{
    FuncCall, FuncConfig, HandshakeMessage, HandshakeResponse, HandshakeStatus, Message,
    MessageType, Role,
};
use funcgrid_shm::SharedMemory;

use crate::call_table::{ExternalCall, Responder};
use crate::config::GatewayConfig;
use crate::grpc::{GrpcCallContext, GrpcStatus};
use crate::http::HttpCallContext;
use crate::ids::{monotonic_micros, IdAllocator};

/// Cheap cloneable reference to one live message connection. Writes
/// enqueue onto the owner worker's reactor.
#[derive(Clone)]
pub(crate) struct MessageConnectionHandle {
    pub conn_id: u64,
    pub client_id: u16,
    pub role: Role,
    pub func_id: u16,
    sender: mpsc::UnboundedSender<Message>,
}

impl MessageConnectionHandle {
    pub fn write_message(&self, message: Message) -> bool {
        self.sender.send(message).is_ok()
    }
}

#[derive(Default)]
struct PeerTables {
    /// Every connected peer, watchdogs and engine workers alike.
    clients: HashMap<u16, MessageConnectionHandle>,
    /// At most one watchdog per func_id.
    watchdogs: HashMap<u16, MessageConnectionHandle>,
}

pub(crate) struct GatewayCore {
    pub config: GatewayConfig,
    pub func_config: FuncConfig,
    pub shared_memory: SharedMemory,
    pub ids: IdAllocator,
    peers: Mutex<PeerTables>,
    external_calls: Mutex<HashMap<u64, ExternalCall>>,
}

impl GatewayCore {
    pub fn new(config: GatewayConfig, func_config: FuncConfig, shared_memory: SharedMemory) -> Self {
        Self {
            config,
            func_config,
            shared_memory,
            ids: IdAllocator::default(),
            peers: Mutex::new(PeerTables::default()),
            external_calls: Mutex::new(HashMap::new()),
        }
    }

    // ── Handshake ───────────────────────────────────────────────────

    /// First inbound frame of a message connection: assign a client
    /// id, register the peer, and for watchdogs claim the func_id
    /// slot. A collision answers `WatchdogExists`; the connection
    /// stays registered as a client but serves no invocations.
    pub fn on_new_handshake(
        &self,
        conn_id: u64,
        handshake: HandshakeMessage,
        sender: mpsc::UnboundedSender<Message>,
    ) -> HandshakeResponse {
        let client_id = self.ids.next_client_id();
        let handle = MessageConnectionHandle {
            conn_id,
            client_id,
            role: handshake.role,
            func_id: handshake.func_id,
            sender,
        };
        let mut status = HandshakeStatus::Ok;
        {
            let mut peers = self.peers.lock().unwrap();
            peers.clients.insert(client_id, handle.clone());
            if handshake.role == Role::Watchdog {
                if peers.watchdogs.contains_key(&handshake.func_id) {
                    error!(
                        func_id = handshake.func_id,
                        "watchdog for func_id already exists"
                    );
                    status = HandshakeStatus::WatchdogExists;
                } else {
                    peers.watchdogs.insert(handshake.func_id, handle);
                }
            }
        }
        info!(client_id, role = ?handshake.role, "new handshake");
        HandshakeResponse { status, client_id }
    }

    /// Reclaim table entries for a closed message connection. The
    /// registry entry is only erased when it still refers to the
    /// closing connection — a collided duplicate never evicts the
    /// registered watchdog.
    pub fn on_message_connection_closed(
        &self,
        conn_id: u64,
        client_id: u16,
        role: Option<Role>,
        func_id: u16,
    ) {
        let mut peers = self.peers.lock().unwrap();
        if peers
            .clients
            .get(&client_id)
            .is_some_and(|handle| handle.conn_id == conn_id)
        {
            peers.clients.remove(&client_id);
        }
        if role == Some(Role::Watchdog) {
            match peers.watchdogs.get(&func_id) {
                Some(handle) if handle.conn_id == conn_id => {
                    peers.watchdogs.remove(&func_id);
                    info!(func_id, "watchdog connection removed");
                }
                Some(_) => {}
                None => {
                    warn!(func_id, "cannot find watchdog connection of func_id");
                }
            }
        }
    }

    // ── Message routing ─────────────────────────────────────────────

    /// Route one inbound control frame from a message connection.
    pub fn on_recv_message(&self, message: Message) {
        if message.send_timestamp > 0 {
            debug!(
                delay_micros = monotonic_micros() - message.send_timestamp,
                "message delay"
            );
        }
        match message.message_type {
            MessageType::InvokeFunc => self.route_invoke(message),
            MessageType::FuncCallComplete | MessageType::FuncCallFailed => {
                self.route_completion(message)
            }
        }
    }

    /// A peer invokes a function through its co-located gateway: the
    /// destination is the registry's watchdog for the callee func_id,
    /// never the calling connection.
    fn route_invoke(&self, message: Message) {
        let func_id = message.func_call.func_id;
        let peers = self.peers.lock().unwrap();
        match peers.watchdogs.get(&func_id) {
            Some(watchdog) => {
                watchdog.write_message(
                    Message::invoke_func(message.func_call)
                        .with_send_timestamp(monotonic_micros()),
                );
            }
            None => {
                error!(func_id, "cannot find watchdog message connection for func_id");
            }
        }
    }

    fn route_completion(&self, message: Message) {
        let client_id = message.func_call.client_id;
        if client_id > 0 {
            // Nested call: hand the completion to the caller's peer
            // connection.
            let peers = self.peers.lock().unwrap();
            match peers.clients.get(&client_id) {
                Some(connection) => {
                    connection.write_message(
                        Message {
                            message_type: message.message_type,
                            func_call: message.func_call,
                            send_timestamp: monotonic_micros(),
                            processing_time: message.processing_time,
                        },
                    );
                }
                None => {
                    error!(client_id, "cannot find message connection with client_id");
                }
            }
            return;
        }
        let full_call_id = message.func_call.full_call_id();
        let removed = self.external_calls.lock().unwrap().remove(&full_call_id);
        let Some(mut call) = removed else {
            error!(call = %message.func_call, "cannot find external call");
            return;
        };
        match message.message_type {
            MessageType::FuncCallComplete => match call.write_output(&self.shared_memory) {
                Ok(()) => call.finish(),
                Err(e) => {
                    error!(call = %message.func_call, error = %e, "failed to read output region");
                    call.finish_with_error();
                }
            },
            MessageType::FuncCallFailed => call.finish_with_error(),
            MessageType::InvokeFunc => unreachable!("routed above"),
        }
        // Dropping the record closes and unlinks both regions.
    }

    // ── External call dispatch ──────────────────────────────────────

    pub fn on_external_func_call(&self, func_id: u16, context: std::sync::Arc<HttpCallContext>) {
        let call = self.new_func_call(func_id);
        self.new_external_func_call(ExternalCall::new(call, Responder::Http(context)));
    }

    /// Resolve a gRPC call through the function config; unknown
    /// service or method answers `Unimplemented` without touching any
    /// state.
    pub fn on_new_grpc_call(&self, context: std::sync::Arc<GrpcCallContext>) {
        let entry = self.func_config.find_grpc_service(context.service_name());
        match entry {
            Some(entry) if entry.has_grpc_method(context.method_name()) => {
                let call = self.new_func_call(entry.func_id);
                self.new_external_func_call(ExternalCall::new(call, Responder::Grpc(context)));
            }
            _ => {
                context.set_grpc_status(GrpcStatus::Unimplemented);
                context.finish();
            }
        }
    }

    fn new_func_call(&self, func_id: u16) -> FuncCall {
        FuncCall::new(func_id, 0, self.ids.next_call_id())
    }

    fn new_external_func_call(&self, mut call: ExternalCall) {
        if !call.check_input_not_empty() {
            return;
        }
        if let Err(e) = call.create_input_region(&self.shared_memory) {
            error!(call = %call.call(), error = %e, "failed to create input region");
            call.finish_with_error();
            return;
        }
        let func_call = call.call();
        // Insert before the invoke goes out, so a completion can
        // never outrun the table entry.
        self.external_calls
            .lock()
            .unwrap()
            .insert(func_call.full_call_id(), call);
        let delivered = {
            let peers = self.peers.lock().unwrap();
            match peers.watchdogs.get(&func_call.func_id) {
                Some(watchdog) => watchdog.write_message(
                    Message::invoke_func(func_call).with_send_timestamp(monotonic_micros()),
                ),
                None => false,
            }
        };
        if !delivered {
            warn!(func_id = func_call.func_id, "watchdog for func_id not found");
            if let Some(call) = self
                .external_calls
                .lock()
                .unwrap()
                .remove(&func_call.full_call_id())
            {
                call.finish_with_watchdog_not_found();
            }
        }
    }

    // ── Introspection (tests and logging) ───────────────────────────

    pub fn watchdog_count(&self) -> usize {
        self.peers.lock().unwrap().watchdogs.len()
    }

    pub fn client_count(&self) -> usize {
        self.peers.lock().unwrap().clients.len()
    }

    pub fn external_call_count(&self) -> usize {
        self.external_calls.lock().unwrap().len()
    }

    pub fn has_watchdog_for(&self, func_id: u16) -> bool {
        self.peers.lock().unwrap().watchdogs.contains_key(&func_id)
    }
}
