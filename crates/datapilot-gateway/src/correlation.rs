// crates/datapilot-gateway/src/correlation.rs
// ============================================================================
// Module: Gateway Request Correlation
// Description: Request identifier issuance and propagation.
// Purpose: Copy one request id into every event a request produces.
// Dependencies: axum, rand
// ============================================================================

//! ## Overview
//! Every request gets exactly one request identifier: the caller's
//! `X-Request-Id` when present, otherwise a freshly generated one. The
//! identifier rides through the handler as an extension, is stamped onto the
//! response, and is copied into every audit and lineage event the request
//! appends.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use datapilot_core::RequestId;
use rand::RngCore;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Request identifier header name.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Maximum accepted length of a caller-provided request identifier.
const MAX_REQUEST_ID_LENGTH: usize = 128;

// ============================================================================
// SECTION: Middleware
// ============================================================================

/// Extracts or issues the request id, then echoes it on the response.
pub async fn correlation_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty() && value.len() <= MAX_REQUEST_ID_LENGTH)
        .map_or_else(generate_request_id, ToString::to_string);

    request.extensions_mut().insert(RequestId::new(request_id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Generates a random 16-byte lowercase hex request identifier.
#[must_use]
pub fn generate_request_id() -> String {
    let mut bytes = [0_u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(32);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
