//! In-flight external call records.
//!
//! One [`ExternalCall`] lives in the table from dispatch until the
//! watchdog reports completion, the client vanishes, or the gateway
//! stops. It owns both shared-memory regions; dropping the record
//! closes and unlinks them on every exit path.

use std::sync::Arc;

use http::StatusCode;

use funcgrid_proto::FuncCall;
use funcgrid_shm::{Region, SharedMemory, ShmResult};

use crate::grpc::{GrpcCallContext, GrpcStatus};
use crate::http::HttpCallContext;

/// The suspended client response a call resolves into.
pub(crate) enum Responder {
    Http(Arc<HttpCallContext>),
    Grpc(Arc<GrpcCallContext>),
}

pub(crate) struct ExternalCall {
    call: FuncCall,
    responder: Responder,
    input_region: Option<Region>,
    output_region: Option<Region>,
}

impl ExternalCall {
    pub fn new(call: FuncCall, responder: Responder) -> Self {
        Self {
            call,
            responder,
            input_region: None,
            output_region: None,
        }
    }

    pub fn call(&self) -> FuncCall {
        self.call
    }

    /// Reject empty HTTP bodies up front, before any region exists.
    /// gRPC bodies may be empty: the method name is always prepended
    /// to the input region.
    pub fn check_input_not_empty(&self) -> bool {
        match &self.responder {
            Responder::Http(context) => {
                if context.body().is_empty() {
                    context.set_response_status(StatusCode::BAD_REQUEST);
                    context.append_to_response_body("Request body cannot be empty!\n");
                    context.finish();
                    false
                } else {
                    true
                }
            }
            Responder::Grpc(_) => true,
        }
    }

    /// Create and fill `<full_call_id>.i`. HTTP copies the body
    /// verbatim; gRPC writes `method_name \0 body`.
    pub fn create_input_region(&mut self, shared_memory: &SharedMemory) -> ShmResult<()> {
        let name = self.call.input_region_name();
        let region = match &self.responder {
            Responder::Http(context) => {
                let body = context.body();
                let mut region = shared_memory.create(&name, body.len())?;
                if let Some(buf) = region.as_mut_slice() {
                    buf.copy_from_slice(body);
                }
                region
            }
            Responder::Grpc(context) => {
                let method = context.method_name().as_bytes();
                let body = context.request_body();
                let mut region = shared_memory.create(&name, method.len() + 1 + body.len())?;
                if let Some(buf) = region.as_mut_slice() {
                    buf[..method.len()].copy_from_slice(method);
                    buf[method.len()] = 0;
                    buf[method.len() + 1..].copy_from_slice(body);
                }
                region
            }
        };
        self.input_region = Some(region);
        Ok(())
    }

    /// Open `<full_call_id>.o` and append its contents to the
    /// response body.
    pub fn write_output(&mut self, shared_memory: &SharedMemory) -> ShmResult<()> {
        let region = shared_memory.open_read_only(&self.call.output_region_name())?;
        match &self.responder {
            Responder::Http(context) => context.append_to_response_body(region.as_slice()),
            Responder::Grpc(context) => context.append_to_response_body(region.as_slice()),
        }
        self.output_region = Some(region);
        Ok(())
    }

    pub fn finish(&self) {
        match &self.responder {
            Responder::Http(context) => context.finish(),
            Responder::Grpc(context) => context.finish(),
        }
    }

    pub fn finish_with_error(&self) {
        match &self.responder {
            Responder::Http(context) => {
                context.set_response_status(StatusCode::INTERNAL_SERVER_ERROR);
                context.append_to_response_body("Function call failed\n");
                context.finish();
            }
            Responder::Grpc(context) => {
                context.set_grpc_status(GrpcStatus::Unknown);
                context.finish();
            }
        }
    }

    pub fn finish_with_watchdog_not_found(&self) {
        match &self.responder {
            Responder::Http(context) => {
                context.set_response_status(StatusCode::NOT_FOUND);
                context.append_to_response_body(format!(
                    "Cannot find watchdog for func_id {}\n",
                    self.call.func_id
                ));
                context.finish();
            }
            Responder::Grpc(context) => {
                context.set_grpc_status(GrpcStatus::Unimplemented);
                context.finish();
            }
        }
    }
}

impl Drop for ExternalCall {
    fn drop(&mut self) {
        if let Some(region) = self.input_region.take() {
            region.close(true);
        }
        if let Some(region) = self.output_region.take() {
            region.close(true);
        }
    }
}
