//! Request gating: what a caller presented, and the gatekeeper check each
//! handler runs before touching the store

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{HeaderMap, header::AUTHORIZATION, request::Parts};
use std::convert::Infallible;
use std::net::SocketAddr;

use super::error::ApiError;
use crate::access::{AccessRequest, ApiKey, Gatekeeper, Permission};

pub const API_KEY_HEADER: &str = "x-api-key";
/// Free-form label for logs. Only honoured next to a valid key and never
/// used for rate limiting or blocking.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Credentials and origin of one request
#[derive(Debug, Clone, Default)]
pub struct Presented {
    pub api_key: Option<String>,
    pub label: Option<String>,
    /// Peer IP, when the server was started with connect info
    pub origin: Option<String>,
}

impl<S: Send + Sync> FromRequestParts<S> for Presented {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            api_key: presented_key(&parts.headers).map(str::to_string),
            label: header_str(&parts.headers, CLIENT_ID_HEADER).map(str::to_string),
            // The port changes per connection, so only the address counts
            origin: parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string()),
        })
    }
}

/// Who made an admitted request
#[derive(Debug, Clone)]
pub struct Caller {
    /// Key owner, else the origin
    pub client_id: String,
    pub label: Option<String>,
    pub key: Option<ApiKey>,
}

impl std::fmt::Display for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{}/{label}", self.client_id),
            None => f.write_str(&self.client_id),
        }
    }
}

/// Key from `x-api-key`, else from `Authorization: Bearer <key>`
pub fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = header_str(headers, API_KEY_HEADER) {
        return Some(key);
    }
    header_str(headers, AUTHORIZATION.as_str())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|key| !key.is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Run the gatekeeper for one request. Writes and admin calls always need
/// a key; reads only when `auth.protect_reads` is set.
pub fn admit(
    gatekeeper: &Gatekeeper,
    presented: &Presented,
    permission: Permission,
) -> Result<Caller, ApiError> {
    let require_key = permission != Permission::Read || gatekeeper.config().protect_reads;
    let (client_id, key) = gatekeeper.admit(AccessRequest {
        origin: presented.origin.as_deref(),
        api_key: presented.api_key.as_deref(),
        permission,
        require_key,
    })?;
    let label = key.as_ref().and(presented.label.clone());
    Ok(Caller {
        client_id,
        label,
        key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};

    #[test]
    fn test_presented_key_prefers_api_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("tsk_a"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tsk_b"));
        assert_eq!(presented_key(&headers), Some("tsk_a"));
    }

    #[test]
    fn test_presented_key_from_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tsk_b"));
        assert_eq!(presented_key(&headers), Some("tsk_b"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(presented_key(&headers), None);
    }

    #[tokio::test]
    async fn test_origin_comes_from_peer_address_only() {
        let mut request = Request::builder()
            .header(CLIENT_ID_HEADER, "someone-else")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 7], 51234))));
        let (mut parts, _) = request.into_parts();

        let presented = Presented::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(presented.origin.as_deref(), Some("203.0.113.7"));
        assert_eq!(presented.label.as_deref(), Some("someone-else"));
    }
}
