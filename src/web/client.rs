//! Client identity extraction.

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use crate::ratelimit::UNKNOWN_IDENTITY;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// The address a request is attributed to for rate limiting.
///
/// The trusted proxy in front of the service appends the real client address
/// as the last `X-Forwarded-For` entry; earlier entries are client-controlled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(Self(client_identity(&parts.headers, peer)))
    }
}

/// Rightmost `X-Forwarded-For` entry, else the peer address, else `"unknown"`.
pub fn client_identity(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    let forwarded = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .last()
        .and_then(|value| value.rsplit(',').next())
        .map(str::trim)
        .filter(|entry| !entry.is_empty());

    match (forwarded, peer) {
        (Some(entry), _) => entry.to_string(),
        (None, Some(ip)) => ip.to_string(),
        (None, None) => UNKNOWN_IDENTITY.to_string(),
    }
}
