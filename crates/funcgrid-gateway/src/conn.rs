//! Message connection serving on the IPC worker.
//!
//! Wire discipline: one `HandshakeMessage`, one `HandshakeResponse`,
//! then fixed-size `Message` frames both ways until EOF. Inbound
//! frames are handed to the dispatch core on the worker thread;
//! outbound frames arrive over the connection's channel from whichever
//! thread routed them and are serialized here, preserving per-
//! connection ordering.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use funcgrid_proto::{HandshakeMessage, Message, HANDSHAKE_WIRE_SIZE, MESSAGE_WIRE_SIZE};

use crate::worker::{ConnGuard, ReturnedConnection, WorkerEnv};

pub(crate) async fn serve_message_connection(
    env: WorkerEnv,
    conn_id: u64,
    stream: std::os::unix::net::UnixStream,
) {
    let mut guard = ConnGuard::new(
        env.clone(),
        ReturnedConnection::Message {
            conn_id,
            client_id: None,
            role: None,
            func_id: 0,
        },
    );
    let stream = match tokio::net::UnixStream::from_std(stream) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(conn_id, error = %e, "failed to register transferred IPC socket");
            return;
        }
    };
    let (mut reader, mut writer) = stream.into_split();

    let mut handshake_buf = [0u8; HANDSHAKE_WIRE_SIZE];
    if reader.read_exact(&mut handshake_buf).await.is_err() {
        debug!(conn_id, "IPC peer closed before handshake");
        return;
    }
    let handshake = match HandshakeMessage::decode(&handshake_buf) {
        Ok(handshake) => handshake,
        Err(e) => {
            warn!(conn_id, error = %e, "malformed handshake, closing connection");
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let response = env.core.on_new_handshake(conn_id, handshake, tx);
    guard.set(ReturnedConnection::Message {
        conn_id,
        client_id: Some(response.client_id),
        role: Some(handshake.role),
        func_id: handshake.func_id,
    });
    if writer.write_all(&response.encode()).await.is_err() {
        warn!(conn_id, "failed to send handshake response");
        return;
    }

    // Outbound frames are drained by a sibling task pinned to this
    // same worker, so reads never stall writes.
    let writer_task = tokio::task::spawn_local(async move {
        while let Some(message) = rx.recv().await {
            if writer.write_all(&message.encode()).await.is_err() {
                break;
            }
        }
    });

    let mut frame = [0u8; MESSAGE_WIRE_SIZE];
    loop {
        if reader.read_exact(&mut frame).await.is_err() {
            info!(conn_id, client_id = response.client_id, "IPC peer disconnected");
            break;
        }
        match Message::decode(&frame) {
            Ok(message) => env.core.on_recv_message(message),
            Err(e) => {
                warn!(conn_id, error = %e, "malformed message frame, closing connection");
                break;
            }
        }
    }
    writer_task.abort();
}
