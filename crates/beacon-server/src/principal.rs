//! Principal extraction.

use axum::http::HeaderMap;
use beacon_core::{Principal, UserId};

/// Header carrying the authenticated user id, set by the upstream proxy.
pub const USER_HEADER: &str = "x-beacon-user";

/// The principal a request acts as. A missing or malformed header means
/// anonymous.
pub fn principal_from_headers(headers: &HeaderMap) -> Principal {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<UserId>().ok())
        .into()
}
