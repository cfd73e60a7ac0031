//! gRPC adapter: byte-in/byte-out HTTP/2 serving.
//!
//! The gateway does not host generated services. It parses
//! `/<service>/<method>` from the request path, strips the 5-byte
//! gRPC message prefix, and routes the raw bytes through the function
//! config registry. Responses carry one prefixed message plus the
//! `grpc-status` trailer.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{HeaderMap, HeaderValue};
use http::StatusCode;
use http_body_util::BodyExt;
use hyper::body::{Body, Frame, Incoming};
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::worker::{ConnGuard, LocalExec, ReturnedConnection, WorkerEnv};

const GRPC_MESSAGE_PREFIX_LEN: usize = 5;

/// The subset of gRPC status codes the gateway emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrpcStatus {
    Ok,
    Unknown,
    NotFound,
    Unimplemented,
}

impl GrpcStatus {
    pub fn code(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::Unknown => 2,
            Self::NotFound => 5,
            Self::Unimplemented => 12,
        }
    }
}

/// Response body emitting one data frame then the gRPC trailers.
pub struct GrpcBody {
    data: Option<Bytes>,
    trailers: Option<HeaderMap>,
}

impl GrpcBody {
    fn new(message: Bytes, status: GrpcStatus) -> Self {
        let mut trailers = HeaderMap::new();
        trailers.insert(
            "grpc-status",
            HeaderValue::from_str(&status.code().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("2")),
        );
        Self {
            data: if message.is_empty() {
                None
            } else {
                Some(message)
            },
            trailers: Some(trailers),
        }
    }
}

impl Body for GrpcBody {
    type Data = Bytes;
    type Error = std::convert::Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        if let Some(data) = self.data.take() {
            return Poll::Ready(Some(Ok(Frame::data(data))));
        }
        if let Some(trailers) = self.trailers.take() {
            return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
        }
        Poll::Ready(None)
    }
}

struct GrpcResponseState {
    status: GrpcStatus,
    body: Vec<u8>,
}

/// Shared context for one in-flight gRPC call, held in the
/// external-call table until completion.
pub struct GrpcCallContext {
    service_name: String,
    method_name: String,
    request_body: Bytes,
    response: Mutex<GrpcResponseState>,
    completion: Mutex<Option<oneshot::Sender<Response<GrpcBody>>>>,
}

impl GrpcCallContext {
    pub(crate) fn new(
        service_name: String,
        method_name: String,
        request_body: Bytes,
    ) -> (Arc<Self>, oneshot::Receiver<Response<GrpcBody>>) {
        let (tx, rx) = oneshot::channel();
        let context = Arc::new(Self {
            service_name,
            method_name,
            request_body,
            response: Mutex::new(GrpcResponseState {
                status: GrpcStatus::Ok,
                body: Vec::new(),
            }),
            completion: Mutex::new(Some(tx)),
        });
        (context, rx)
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn request_body(&self) -> &[u8] {
        &self.request_body
    }

    pub fn set_grpc_status(&self, status: GrpcStatus) {
        self.response.lock().unwrap().status = status;
    }

    pub fn append_to_response_body(&self, data: impl AsRef<[u8]>) {
        self.response
            .lock()
            .unwrap()
            .body
            .extend_from_slice(data.as_ref());
    }

    /// Terminal: resolve the suspended HTTP/2 response. Idempotent
    /// and safe after client disconnect.
    pub fn finish(&self) {
        let Some(tx) = self.completion.lock().unwrap().take() else {
            return;
        };
        let (status, body) = {
            let state = self.response.lock().unwrap();
            (state.status, state.body.clone())
        };
        let message = if body.is_empty() && status != GrpcStatus::Ok {
            Bytes::new()
        } else {
            encode_grpc_message(&body)
        };
        let mut response = Response::new(GrpcBody::new(message, status));
        *response.status_mut() = StatusCode::OK;
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/grpc"),
        );
        if tx.send(response).is_err() {
            debug!(
                service = %self.service_name,
                method = %self.method_name,
                "gRPC client disconnected before completion"
            );
        }
    }
}

/// Trailers-only response carrying just a status code.
fn status_only_response(status: GrpcStatus) -> Response<GrpcBody> {
    let mut response = Response::new(GrpcBody::new(Bytes::new(), status));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/grpc"),
    );
    response
}

/// Prefix a message with the gRPC wire framing (flag + BE length).
fn encode_grpc_message(message: &[u8]) -> Bytes {
    let mut framed = BytesMut::with_capacity(GRPC_MESSAGE_PREFIX_LEN + message.len());
    framed.put_u8(0);
    framed.put_u32(message.len() as u32);
    framed.put_slice(message);
    framed.freeze()
}

/// Strip the gRPC message prefix; an empty body stays empty.
fn decode_grpc_message(body: &[u8]) -> Bytes {
    if body.len() < GRPC_MESSAGE_PREFIX_LEN {
        return Bytes::new();
    }
    let declared = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    let payload = &body[GRPC_MESSAGE_PREFIX_LEN..];
    Bytes::copy_from_slice(&payload[..declared.min(payload.len())])
}

/// Split `/pkg.Service/Method` into service and method names.
fn parse_rpc_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix('/')?;
    let (service, method) = rest.split_once('/')?;
    if service.is_empty() || method.is_empty() || method.contains('/') {
        return None;
    }
    Some((service, method))
}

/// Drive one transferred gRPC socket on this worker.
pub(crate) async fn serve_grpc_connection(env: WorkerEnv, conn_id: u64, stream: std::net::TcpStream) {
    let _guard = ConnGuard::new(env.clone(), ReturnedConnection::Grpc { conn_id });
    let stream = match tokio::net::TcpStream::from_std(stream) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(conn_id, error = %e, "failed to register transferred gRPC socket");
            return;
        }
    };
    let io = TokioIo::new(stream);
    let service_env = env.clone();
    let service = service_fn(move |req: Request<Incoming>| {
        let env = service_env.clone();
        async move { handle_grpc_request(env, req).await }
    });
    if let Err(e) = http2::Builder::new(LocalExec).serve_connection(io, service).await {
        debug!(conn_id, error = %e, "gRPC connection ended with error");
    }
}

async fn handle_grpc_request(
    env: WorkerEnv,
    req: Request<Incoming>,
) -> Result<Response<GrpcBody>, hyper::Error> {
    let path = req.uri().path().to_string();
    let Some((service, method)) = parse_rpc_path(&path) else {
        return Ok(status_only_response(GrpcStatus::Unimplemented));
    };
    let service = service.to_string();
    let method = method.to_string();

    let body = req.into_body().collect().await?.to_bytes();
    let payload = decode_grpc_message(&body);

    let (context, rx) = GrpcCallContext::new(service, method, payload);
    env.core.on_new_grpc_call(Arc::clone(&context));
    match rx.await {
        Ok(response) => Ok(response),
        // Context dropped unfinished — gateway teardown.
        Err(_) => Ok(status_only_response(GrpcStatus::Unknown)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_path_parsing() {
        assert_eq!(
            parse_rpc_path("/foo.Bar/Baz"),
            Some(("foo.Bar", "Baz"))
        );
        assert_eq!(parse_rpc_path("/foo.Bar"), None);
        assert_eq!(parse_rpc_path("/"), None);
        assert_eq!(parse_rpc_path("/a//b"), None);
    }

    #[test]
    fn grpc_message_framing_round_trips() {
        let framed = encode_grpc_message(b"hello");
        assert_eq!(framed.len(), GRPC_MESSAGE_PREFIX_LEN + 5);
        assert_eq!(framed[0], 0);
        assert_eq!(decode_grpc_message(&framed), Bytes::from_static(b"hello"));
    }

    #[test]
    fn empty_body_decodes_empty() {
        assert!(decode_grpc_message(&[]).is_empty());
    }

    #[tokio::test]
    async fn finish_carries_status_trailer() {
        let (context, rx) =
            GrpcCallContext::new("foo.Bar".to_string(), "Baz".to_string(), Bytes::new());
        context.append_to_response_body(b"out");
        context.finish();
        let response = rx.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/grpc"
        );
    }

    #[tokio::test]
    async fn unimplemented_finish_is_trailers_only() {
        let (context, rx) =
            GrpcCallContext::new("foo.Bar".to_string(), "Nope".to_string(), Bytes::new());
        context.set_grpc_status(GrpcStatus::Unimplemented);
        context.finish();
        let response = rx.await.unwrap();
        let body = response.into_body();
        assert!(body.data.is_none());
        assert_eq!(
            body.trailers.as_ref().unwrap().get("grpc-status").unwrap(),
            "12"
        );
    }
}
