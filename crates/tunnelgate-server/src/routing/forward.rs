//! Upstream forwarding

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::Response;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::rewrite;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest request body buffered for forwarding
const MAX_REQUEST_BODY: usize = 64 * 1024 * 1024;

/// Headers that describe one connection and must not be forwarded
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Errors while talking to a channel backend
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("upstream body could not be rewritten: {0}")]
    Rewrite(#[from] std::io::Error),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("request body could not be read: {0}")]
    RequestBody(String),
}

/// Forwards proxied requests to `http://{upstream_host}:{port}`
#[derive(Debug, Clone)]
pub struct Forwarder {
    http_client: reqwest::Client,
    upstream_host: String,
}

impl Forwarder {
    /// Forward to backends on `upstream_host`
    pub fn new(upstream_host: impl Into<String>) -> Result<Self, ForwardError> {
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            http_client,
            upstream_host: upstream_host.into(),
        })
    }

    /// Target URL for `rest` (without leading slash) on `port`
    pub fn target_url(&self, port: u16, rest: &str, query: Option<&str>) -> String {
        let mut url = format!("http://{}:{}/{}", self.upstream_host, port, rest);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    /// Send the request upstream and build the response for the caller
    ///
    /// HTML bodies (plain or gzip) get the channel base path. Other response
    /// bodies stream through untouched.
    pub async fn forward(
        &self,
        channel: &str,
        port: u16,
        rest: &str,
        request: Request,
    ) -> Result<Response, ForwardError> {
        let (parts, body) = request.into_parts();
        let url = self.target_url(port, rest, parts.uri.query());
        info!(channel = %channel, method = %parts.method, url = %url, "Forwarding request");

        let body = axum::body::to_bytes(body, MAX_REQUEST_BODY)
            .await
            .map_err(|e| ForwardError::RequestBody(e.to_string()))?;

        let is_head = parts.method == Method::HEAD;
        let upstream = self
            .http_client
            .request(parts.method, &url)
            .headers(request_headers(&parts.headers))
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let content_type = header_str(&response_headers, header::CONTENT_TYPE);
        let encoding = header_str(&response_headers, header::CONTENT_ENCODING).to_ascii_lowercase();
        let rewritable = !is_head
            && rewrite::is_html(&content_type)
            && (encoding.is_empty() || encoding == "identity" || encoding == "gzip");

        let body = if rewritable {
            let raw = upstream.bytes().await?;
            let rewritten = if encoding == "gzip" {
                rewrite::rewrite_gzip_html(&raw, channel)?
            } else {
                rewrite::rewrite_html(&raw, channel)
            };
            debug!(
                channel = %channel,
                before = raw.len(),
                after = rewritten.len(),
                "Rewrote HTML base path"
            );
            response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(rewritten.len()));
            Body::from(rewritten)
        } else {
            Body::from_stream(upstream.bytes_stream())
        };

        build_response(status, response_headers, body)
    }
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Result<Response, ForwardError> {
    let mut response = Response::builder()
        .status(status)
        .body(body)
        .map_err(|e| ForwardError::InvalidResponse(e.to_string()))?;
    *response.headers_mut() = headers;
    Ok(response)
}

fn request_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut headers = incoming.clone();
    headers.remove(header::HOST);
    strip_hop_by_hop(&mut headers);
    headers
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
