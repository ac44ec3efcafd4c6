use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, Request};
use std::net::SocketAddr;

use crate::core::RequestMeta;

/// Role asserted by the upstream authentication layer
pub const ROLE_HEADER: &str = "x-user-role";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Collect what the admission check needs from an inbound request.
///
/// The peer address comes from `ConnectInfo`, so the server must be started
/// with `into_make_service_with_connect_info::<SocketAddr>()`; without it the
/// source address is `unknown`.
///
/// `X-Forwarded-For` and `X-Real-IP` take precedence over the peer and are
/// trusted as sent. Deploy behind a proxy that strips or overwrites them,
/// otherwise any client can claim a whitelisted address such as `127.0.0.1`.
pub fn request_meta<B>(req: &Request<B>) -> RequestMeta {
    let source = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(peer)| peer.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let headers = req.headers();

    let mut meta = RequestMeta::new(source, req.uri().path()).with_method(req.method().as_str());
    meta.forwarded_address =
        header_value(headers, FORWARDED_FOR_HEADER).or_else(|| header_value(headers, REAL_IP_HEADER));
    meta.user_agent = header_value(headers, header::USER_AGENT.as_str());
    meta.accept = header_value(headers, header::ACCEPT.as_str());
    meta.role = header_value(headers, ROLE_HEADER);
    meta
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
