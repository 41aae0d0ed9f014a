//! # Axum Middleware Adapter
//!
//! Wires the [`Dispatcher`] into an axum request pipeline. The middleware runs
//! once per incoming request, before normal handling:
//!
//! - unmatched requests proceed untouched;
//! - a blocked request is short-circuited with a fixed `429 Too Many Requests`
//!   and a short plain-text body, and no further processing happens;
//! - an admitted request proceeds with the admission guard held across the
//!   downstream call, so tracking is released exactly once no matter how the
//!   handler exits. A 5xx downstream status is recorded against the matched
//!   resource for accounting.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::debug;

use crate::core::types::IncomingRequest;
use crate::dispatch::{DispatchDecision, Dispatcher, BLOCKED_MESSAGE};

/// Build the dispatcher's request view from framework request parts
fn incoming_view(request: &Request<Body>) -> IncomingRequest {
    IncomingRequest::new(
        request.method().clone(),
        request.uri().clone(),
        request.version(),
        request.headers().clone(),
        None,
    )
}

/// Flow-control middleware, for use with `axum::middleware::from_fn_with_state`
///
/// ```ignore
/// let app = Router::new()
///     .route("/", get(handler))
///     .layer(middleware::from_fn_with_state(dispatcher.clone(), flow_control))
///     .with_state(());
/// ```
pub async fn flow_control(
    State(dispatcher): State<Arc<Dispatcher>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let incoming = incoming_view(&request);
    match dispatcher.decide(&incoming) {
        DispatchDecision::Pass => next.run(request).await,
        DispatchDecision::Blocked { resource } => {
            debug!(resource, path = incoming.path(), "Request blocked");
            (StatusCode::TOO_MANY_REQUESTS, BLOCKED_MESSAGE).into_response()
        }
        DispatchDecision::Admitted(guard) => {
            let response = next.run(request).await;
            if response.status().is_server_error() {
                guard.record_error(&format!("downstream status {}", response.status()));
            }
            response
            // guard dropped here: tracking released exactly once
        }
    }
}
