//! Client address resolution.
//!
//! The peer address comes from the listener's connect info. Behind a
//! trusted TLS-terminating proxy the first `X-Forwarded-For` entry names the
//! real client instead.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap};

pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Peer address of the TCP connection, when the server recorded one.
#[derive(Debug, Clone, Copy)]
pub struct RemoteAddr(pub Option<SocketAddr>);

impl RemoteAddr {
    #[must_use]
    pub fn from_extensions(extensions: &Extensions) -> Self {
        Self(
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        )
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RemoteAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_extensions(&parts.extensions))
    }
}

/// Client IP for logs. `X-Forwarded-For` is honoured only when
/// `trust_proxy` is set.
#[must_use]
pub fn client_ip(headers: &HeaderMap, remote: RemoteAddr, trust_proxy: bool) -> Option<String> {
    if trust_proxy {
        let forwarded = headers
            .get(FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return Some(ip.to_string());
        }
    }
    remote.0.map(|addr| addr.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(forwarded: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, forwarded.parse().unwrap());
        headers
    }

    fn peer() -> RemoteAddr {
        RemoteAddr(Some("10.0.0.9:51234".parse().unwrap()))
    }

    #[test]
    fn forwarded_header_used_only_behind_trusted_proxy() {
        let headers = headers("203.0.113.7, 10.0.0.1");
        assert_eq!(
            client_ip(&headers, peer(), true).as_deref(),
            Some("203.0.113.7")
        );
        assert_eq!(client_ip(&headers, peer(), false).as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn falls_back_to_peer_address() {
        assert_eq!(
            client_ip(&HeaderMap::new(), peer(), true).as_deref(),
            Some("10.0.0.9")
        );
        assert_eq!(client_ip(&HeaderMap::new(), RemoteAddr(None), true), None);
    }

    #[test]
    fn reads_connect_info_extension() {
        let mut extensions = Extensions::new();
        assert!(RemoteAddr::from_extensions(&extensions).0.is_none());
        extensions.insert(ConnectInfo::<SocketAddr>("127.0.0.1:9000".parse().unwrap()));
        assert_eq!(
            RemoteAddr::from_extensions(&extensions).0,
            Some("127.0.0.1:9000".parse().unwrap())
        );
    }
}
