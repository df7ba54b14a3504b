//! The proxy's tower service: gate first, then local endpoint or backend.
//!
//! # Request Flow
//!
//! ```text
//! Request<B> ──► PolicyGate::check()
//!                     │
//!      ┌──────────────┼──────────────────────┐
//!      │              │                      │
//!   Reject      Exempt / Allow          Exempt / Allow
//!      │        (local route)           (anything else)
//!      ▼              ▼                      ▼
//!  400 / 403     admin::router()     ForwardingClient::forward()
//! ```

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Service, ServiceExt};
use tracing::debug;
use usegate_core::policy::{Decision, PolicyGate, Rejection, RequestInfo};

use crate::admin::is_local_route;
use crate::error::{ProxyError, ProxyResult, json_response};
use crate::forwarding::{ForwardingClient, UnifiedBody};
use crate::server::PeerAddr;

/// Gate plus dispatch. Cheap to clone: every field is shared.
#[derive(Clone)]
pub struct GateService {
    gate: PolicyGate,
    forwarding: ForwardingClient,
    local: axum::Router,
}

impl GateService {
    pub fn new(gate: PolicyGate, forwarding: ForwardingClient, local: axum::Router) -> Self {
        Self {
            gate,
            forwarding,
            local,
        }
    }

    async fn handle<B>(self, req: Request<B>) -> ProxyResult<Response<UnifiedBody>>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + std::fmt::Display,
    {
        let peer = req.extensions().get::<PeerAddr>().map(|p| p.0);

        let decision = self.gate.check(&RequestInfo {
            method: req.method(),
            path: req.uri().path(),
            headers: req.headers(),
            peer,
        });

        if let Decision::Reject(rejection) = decision {
            return Ok(rejection_response(&rejection));
        }

        if is_local_route(req.method(), req.uri().path()) {
            debug!(method = %req.method(), path = req.uri().path(), "Serving local endpoint");
            return self.serve_local(req).await;
        }

        self.forwarding.forward(req, peer).await
    }

    /// Run the request through the local router. Local bodies are small JSON
    /// or metrics text, so they are collected before boxing.
    async fn serve_local<B>(self, req: Request<B>) -> ProxyResult<Response<UnifiedBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let req = req.map(axum::body::Body::new);
        let response = match self.local.oneshot(req).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        let (parts, body) = response.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| ProxyError::Connection(format!("Local endpoint body error: {e}")))?
            .to_bytes();

        Ok(Response::from_parts(parts, full_body(bytes)))
    }
}

/// JSON rejection with the status the reason maps to.
fn rejection_response(rejection: &Rejection) -> Response<UnifiedBody> {
    let status = StatusCode::from_u16(rejection.status()).unwrap_or(StatusCode::FORBIDDEN);
    json_response(status, &rejection.to_json())
        .map(|body| body.map_err(|never| match never {}).boxed())
}

fn full_body(bytes: Bytes) -> UnifiedBody {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}

impl<B> Service<Request<B>> for GateService
where
    B: Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + std::fmt::Display,
{
    type Response = Response<UnifiedBody>;
    type Error = ProxyError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { service.handle(req).await })
    }
}

impl std::fmt::Debug for GateService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateService")
            .field("backend_url", &self.forwarding.backend_url())
            .finish_non_exhaustive()
    }
}
