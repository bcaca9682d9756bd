use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use std::{convert::Infallible, net::IpAddr, net::SocketAddr};

use crate::audit::ClientInfo;

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";
const DEVICE_ID: &str = "x-device-id";

/// Caller metadata for rate-limit keys and audit events.
#[derive(Clone, Debug)]
pub struct Client(pub ClientInfo);

impl<S> FromRequestParts<S> for Client
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(Self(client_info(&parts.headers, peer)))
    }
}

/// The first `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer.
pub(crate) fn client_info(headers: &HeaderMap, peer: Option<IpAddr>) -> ClientInfo {
    let forwarded = header_str(headers, FORWARDED_FOR)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let ip = forwarded
        .or_else(|| header_str(headers, REAL_IP).map(str::trim))
        .map(ToString::to_string)
        .or_else(|| peer.map(|ip| ip.to_string()));

    ClientInfo {
        ip,
        user_agent: header_str(headers, axum::http::header::USER_AGENT.as_str())
            .map(ToString::to_string),
        device_id: header_str(headers, DEVICE_ID).map(ToString::to_string),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
