//! Generic streaming reverse proxy.
//!
//! One `forward` call serves plain HTTP forwarding, SSH-over-HTTP
//! tunneling, and upgrade-based terminal streaming alike: the request is
//! replayed byte-for-byte against a runner-side URL, the response is
//! streamed back without buffering whole bodies, and `101 Switching
//! Protocols` responses splice the two connections together.

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::Response;
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Error, Debug)]
pub enum ProxyError {
    /// The second hop was unreachable, timed out, or dropped mid-stream.
    /// Callers map this to a clear user-facing message, never to an
    /// ambiguous success.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("invalid forward target: {0}")]
    BadTarget(String),
}

/// Connect and response-header timeouts for the second hop. Streaming
/// after the headers arrive is not bounded; forwarded terminals stay
/// open for hours.
#[derive(Debug, Clone, Copy)]
pub struct ForwardTimeouts {
    pub connect: Duration,
    pub response: Duration,
}

impl Default for ForwardTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            response: Duration::from_secs(30),
        }
    }
}

/// Headers that are connection-scoped and must not be replayed on the
/// second hop.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.iter().any(|h| name.as_str().eq_ignore_ascii_case(h))
}

/// Pooled clients, one per distinct connect timeout. The timeout comes
/// from configuration, so a process normally holds a single client and
/// its connection pool.
fn shared_client(connect: Duration) -> Result<reqwest::Client> {
    static CLIENTS: OnceLock<Mutex<HashMap<u128, reqwest::Client>>> = OnceLock::new();

    let mut cache = CLIENTS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|e| e.into_inner());

    if let Some(client) = cache.get(&connect.as_millis()) {
        return Ok(client.clone());
    }

    let client = reqwest::Client::builder()
        .connect_timeout(connect)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| ProxyError::BadTarget(e.to_string()))?;
    cache.insert(connect.as_millis(), client.clone());

    Ok(client)
}

/// Proxy `request` to `target_url`, injecting `extra_headers` on the
/// second hop (e.g. the runner token).
pub async fn forward(
    target_url: &str,
    extra_headers: HeaderMap,
    timeouts: ForwardTimeouts,
    request: Request,
) -> Result<Response> {
    let url = reqwest::Url::parse(target_url)
        .map_err(|e| ProxyError::BadTarget(format!("{target_url}: {e}")))?;

    let (mut parts, body) = request.into_parts();

    // Taken before the request body is consumed; present only when the
    // client actually asked for an upgrade.
    let on_upgrade = parts.extensions.remove::<hyper::upgrade::OnUpgrade>();
    let upgrade_requested = parts.headers.contains_key("upgrade");

    let mut headers = HeaderMap::new();
    for (name, value) in parts.headers.iter() {
        if is_hop_by_hop(name) || name == axum::http::header::HOST {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    // An upgrade handshake needs its connection-scoped headers intact.
    if upgrade_requested {
        if let Some(upgrade) = parts.headers.get("upgrade") {
            headers.insert(HeaderName::from_static("upgrade"), upgrade.clone());
            headers.insert(
                HeaderName::from_static("connection"),
                HeaderValue::from_static("Upgrade"),
            );
        }
    }

    if let Some(host) = parts.headers.get(axum::http::header::HOST) {
        headers.insert(HeaderName::from_static("x-forwarded-host"), host.clone());
    }
    headers.insert(
        HeaderName::from_static("x-forwarded-proto"),
        HeaderValue::from_static("http"),
    );
    // appended, not inserted: an earlier hop's entry survives above
    if let Some(ConnectInfo(peer)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        if let Ok(value) = HeaderValue::from_str(&peer.ip().to_string()) {
            headers.append(HeaderName::from_static("x-forwarded-for"), value);
        }
    }
    for (name, value) in extra_headers.iter() {
        headers.insert(name.clone(), value.clone());
    }

    let client = shared_client(timeouts.connect)?;

    let outbound = client
        .request(parts.method.clone(), url)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send();

    let upstream = match tokio::time::timeout(timeouts.response, outbound).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => {
            debug!("forward target unreachable: {e}");
            return Err(ProxyError::ConnectionClosed);
        }
        Err(_) => {
            debug!("forward target timed out after {:?}", timeouts.response);
            return Err(ProxyError::ConnectionClosed);
        }
    };

    let status = upstream.status();
    let mut builder = Response::builder().status(status);
    if let Some(response_headers) = builder.headers_mut() {
        for (name, value) in upstream.headers().iter() {
            if status != StatusCode::SWITCHING_PROTOCOLS && is_hop_by_hop(name) {
                continue;
            }
            response_headers.append(name.clone(), value.clone());
        }
    }

    if status == StatusCode::SWITCHING_PROTOCOLS {
        let Some(on_upgrade) = on_upgrade else {
            warn!("upstream switched protocols but the client never asked to upgrade");
            return Err(ProxyError::ConnectionClosed);
        };

        tokio::spawn(async move {
            let client_io = match upstream.upgrade().await {
                Ok(io) => io,
                Err(e) => {
                    debug!("upstream upgrade failed: {e}");
                    return;
                }
            };
            let server_io = match on_upgrade.await {
                Ok(io) => io,
                Err(e) => {
                    debug!("client upgrade failed: {e}");
                    return;
                }
            };

            let mut server_io = TokioIo::new(server_io);
            let mut client_io = client_io;
            match tokio::io::copy_bidirectional(&mut server_io, &mut client_io).await {
                Ok((up, down)) => debug!("upgraded stream closed ({up}B up, {down}B down)"),
                Err(e) => debug!("upgraded stream error: {e}"),
            }
        });

        return builder
            .body(Body::empty())
            .map_err(|_| ProxyError::ConnectionClosed);
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|_| ProxyError::ConnectionClosed)
}
