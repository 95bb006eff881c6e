use chrono::Utc;
use hyper::body::{Bytes, HttpBody};
use hyper::header::HOST;
use hyper::{Body, Method, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use super::http_client::{build_downstream_response, build_upstream_request, Transport};
use super::responses;
use crate::app_state::AppState;
use crate::error::{ProxyError, ProxyResult};

/// Per-request admission and forwarding.
///
/// Self-request guard, order registration, cache lookup, robots check,
/// rate-limit check, forward, cache write, order release.
#[derive(Clone)]
pub struct ProxyPipeline {
    state: AppState,
}

impl ProxyPipeline {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Handle one proxied request. The peer address is read from the request
    /// extensions when the server put it there.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let remote = req.extensions().get::<SocketAddr>().copied();

        let target = match target_url(&req) {
            Ok(target) => target,
            Err(e) => {
                warn!("Rejecting request with malformed target: {}", e);
                record_outcome("invalid_url");
                return responses::error_response(&e);
            }
        };

        if self.state.guard.is_self_request(&target).await {
            debug!("Request to {} addressed to the proxy itself", target);
            record_outcome("self_request");
            return responses::empty_ok();
        }

        let remote_host = remote
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let slot = self.state.order.register(&remote_host);

        let result = self.process(req, &target, remote).await;
        slot.release().await;

        match result {
            Ok((response, outcome)) => {
                record_outcome(outcome);
                response
            }
            Err(e) => {
                warn!("Proxying {} failed: {}", target, e);
                record_outcome("error");
                responses::error_response(&e)
            }
        }
    }

    async fn process(
        &self,
        req: Request<Body>,
        target: &Url,
        remote: Option<SocketAddr>,
    ) -> ProxyResult<(Response<Body>, &'static str)> {
        let url = target.as_str().to_string();
        let is_get = req.method() == Method::GET;

        if is_get {
            if let Some(entry) = self.state.cache.lookup(&url, req.headers(), Utc::now()).await {
                debug!("Serving {} from cache", url);
                return Ok((entry.to_response()?, "cache_hit"));
            }
        }

        if !self.state.robots.allows(target).await {
            info!("Blocked by robots.txt: {}", url);
            return Ok((responses::blocked(), "robots_blocked"));
        }

        let domain = target
            .host_str()
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| ProxyError::invalid_url(url.as_str(), "missing host"))?;
        let limiter = &self.state.limiter;
        if !limiter.is_allowed(&domain) {
            let delay = limiter.delay_for_domain(&domain);
            debug!("Domain {} still cooling down ({}ms delay)", domain, delay);
            return Ok((responses::too_many_requests(delay), "rate_limited"));
        }
        limiter.add(&domain);

        let request_headers = req.headers().clone();
        let upstream = build_upstream_request(req, target, remote.map(|addr| addr.ip()))?;

        let started = Instant::now();
        let response = self.state.transport.send(upstream).await?;
        let (parts, body) = build_downstream_response(response).into_parts();
        let cap = self.state.cache.store().max_size();
        let bytes = match read_capped(body, cap).await? {
            CappedBody::Complete(bytes) => bytes,
            CappedBody::Oversized { read, rest } => {
                debug!(
                    "Forwarded {} -> {} in {:?} (over {} bytes, streamed uncached)",
                    url,
                    parts.status,
                    started.elapsed(),
                    cap
                );
                return Ok((Response::from_parts(parts, resume_body(read, rest)), "forwarded"));
            }
        };
        debug!(
            "Forwarded {} -> {} in {:?} ({} bytes)",
            url,
            parts.status,
            started.elapsed(),
            bytes.len()
        );

        if is_get && parts.status == StatusCode::OK {
            self.state
                .cache
                .put(&url, &request_headers, &parts.headers, bytes.clone(), Utc::now())
                .await;
        }

        Ok((Response::from_parts(parts, Body::from(bytes)), "forwarded"))
    }
}

/// Upstream body read up to the cache size limit
enum CappedBody {
    Complete(Vec<u8>),
    /// Chunks read before the limit was crossed and the unread remainder
    Oversized { read: Vec<Bytes>, rest: Body },
}

async fn read_capped(mut body: Body, cap: u64) -> ProxyResult<CappedBody> {
    let mut read = Vec::new();
    let mut total = 0u64;
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        total += chunk.len() as u64;
        read.push(chunk);
        if total > cap {
            return Ok(CappedBody::Oversized { read, rest: body });
        }
    }
    Ok(CappedBody::Complete(read.concat()))
}

/// Body that replays `read` and then streams whatever `rest` still holds
fn resume_body(read: Vec<Bytes>, mut rest: Body) -> Body {
    let (mut sender, body) = Body::channel();
    tokio::spawn(async move {
        for chunk in read {
            if sender.send_data(chunk).await.is_err() {
                return;
            }
        }
        while let Some(chunk) = rest.data().await {
            match chunk {
                Ok(chunk) => {
                    if sender.send_data(chunk).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("Upstream body failed mid-stream: {}", e);
                    sender.abort();
                    return;
                }
            }
        }
    });
    body
}

/// Target of a proxied request: the absolute request URI, or the Host
/// header joined with the path for origin-form requests
pub fn target_url(req: &Request<Body>) -> ProxyResult<Url> {
    let uri = req.uri();
    let raw = if uri.scheme().is_some() {
        uri.to_string()
    } else {
        let host = req
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ProxyError::invalid_url(uri.to_string(), "no host in request"))?;
        let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
        format!("http://{}{}", host, path)
    };

    let mut url = Url::parse(&raw).map_err(|e| ProxyError::invalid_url(raw.as_str(), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProxyError::invalid_url(raw, "unsupported scheme"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ProxyError::invalid_url(raw, "missing host"));
    }
    url.set_fragment(None);
    Ok(url)
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!(
        "polite_proxy_requests_total",
        &[("outcome", String::from(outcome))]
    )
    .increment(1);
}
