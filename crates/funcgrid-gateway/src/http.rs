//! HTTP adapter: handler registry and per-connection serving.
//!
//! The gateway treats hyper as a byte-in/byte-out HTTP/1.1 parser.
//! Requests are matched against the registered handler list in
//! registration order; the first matching handler serves the request.
//! Sync handlers produce their whole response inline. Async handlers
//! receive a shared [`HttpCallContext`] they may hold across
//! suspensions; its terminal `finish` resolves the response exactly
//! once.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::worker::{ConnGuard, ReturnedConnection, WorkerEnv};

/// Predicate deciding whether a handler serves `(method, path)`.
pub type RequestMatcher = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Handler producing its full response in the callback.
pub type SyncRequestHandler = Arc<dyn Fn(&mut HttpSyncContext) + Send + Sync>;

/// Handler that may suspend; it must eventually call
/// [`HttpCallContext::finish`].
pub type AsyncRequestHandler = Arc<dyn Fn(Arc<HttpCallContext>) + Send + Sync>;

pub(crate) enum RequestHandlerKind {
    Sync(SyncRequestHandler),
    Async(AsyncRequestHandler),
}

pub(crate) struct HandlerEntry {
    pub matcher: RequestMatcher,
    pub handler: RequestHandlerKind,
}

/// Request/response context for sync handlers.
pub struct HttpSyncContext {
    method: String,
    path: String,
    body: Bytes,
    status: StatusCode,
    response_body: Vec<u8>,
}

impl HttpSyncContext {
    fn new(method: String, path: String, body: Bytes) -> Self {
        Self {
            method,
            path,
            body,
            status: StatusCode::OK,
            response_body: Vec::new(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn append_to_response_body(&mut self, data: impl AsRef<[u8]>) {
        self.response_body.extend_from_slice(data.as_ref());
    }

    fn into_response(self) -> Response<Full<Bytes>> {
        plain_response(self.status, self.response_body)
    }
}

struct HttpResponseState {
    status: StatusCode,
    body: Vec<u8>,
}

/// Shared context for async handlers, held in the external-call table
/// until the call completes.
///
/// The completion channel is taken on the first `finish`; later calls
/// are no-ops, as is finishing after the client disconnected.
pub struct HttpCallContext {
    method: String,
    path: String,
    body: Bytes,
    response: Mutex<HttpResponseState>,
    completion: Mutex<Option<oneshot::Sender<Response<Full<Bytes>>>>>,
}

impl HttpCallContext {
    fn new(
        method: String,
        path: String,
        body: Bytes,
    ) -> (Arc<Self>, oneshot::Receiver<Response<Full<Bytes>>>) {
        let (tx, rx) = oneshot::channel();
        let context = Arc::new(Self {
            method,
            path,
            body,
            response: Mutex::new(HttpResponseState {
                status: StatusCode::OK,
                body: Vec::new(),
            }),
            completion: Mutex::new(Some(tx)),
        });
        (context, rx)
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(
        method: String,
        path: String,
        body: Bytes,
    ) -> (Arc<Self>, oneshot::Receiver<Response<Full<Bytes>>>) {
        Self::new(method, path, body)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_response_status(&self, status: StatusCode) {
        self.response.lock().unwrap().status = status;
    }

    pub fn append_to_response_body(&self, data: impl AsRef<[u8]>) {
        self.response
            .lock()
            .unwrap()
            .body
            .extend_from_slice(data.as_ref());
    }

    /// Terminal: resolve the suspended response. Safe to call after
    /// cancellation and safe to call twice; only the first call with a
    /// live client sends anything.
    pub fn finish(&self) {
        let Some(tx) = self.completion.lock().unwrap().take() else {
            return;
        };
        let response = {
            let state = self.response.lock().unwrap();
            plain_response(state.status, state.body.clone())
        };
        if tx.send(response).is_err() {
            debug!(path = %self.path, "client disconnected before completion");
        }
    }
}

fn plain_response(status: StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

/// Drive one transferred HTTP socket to completion on this worker.
pub(crate) async fn serve_http_connection(env: WorkerEnv, conn_id: u64, stream: std::net::TcpStream) {
    let _guard = ConnGuard::new(env.clone(), ReturnedConnection::Http { conn_id });
    let stream = match tokio::net::TcpStream::from_std(stream) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(conn_id, error = %e, "failed to register transferred HTTP socket");
            return;
        }
    };
    let io = TokioIo::new(stream);
    let service_env = env.clone();
    let service = service_fn(move |req: Request<Incoming>| {
        let env = service_env.clone();
        async move { handle_http_request(env, req).await }
    });
    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
        debug!(conn_id, error = %e, "HTTP connection ended with error");
    }
}

async fn handle_http_request(
    env: WorkerEnv,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let matched = env
        .handlers
        .iter()
        .position(|entry| (entry.matcher)(&method, &path));
    let Some(index) = matched else {
        return Ok(plain_response(StatusCode::NOT_FOUND, Vec::new()));
    };

    let body = req.into_body().collect().await?.to_bytes();
    match &env.handlers[index].handler {
        RequestHandlerKind::Sync(handler) => {
            let mut context = HttpSyncContext::new(method, path, body);
            handler(&mut context);
            Ok(context.into_response())
        }
        RequestHandlerKind::Async(handler) => {
            let (context, rx) = HttpCallContext::new(method, path, body);
            handler(context);
            match rx.await {
                Ok(response) => Ok(response),
                // The call context was dropped without finishing —
                // only happens when the gateway is tearing down.
                Err(_) => Ok(plain_response(StatusCode::INTERNAL_SERVER_ERROR, Vec::new())),
            }
        }
    }
}
