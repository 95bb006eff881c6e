use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderValue, HOST};
use hyper::{Body, Client, Request, Response, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use url::Url;

use crate::config::HttpClientConfig;
use crate::error::{ProxyError, ProxyResult};

/// Outbound HTTP exchange used for forwarding and robots.txt fetches
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request with an absolute URI and return the upstream response
    async fn send(&self, req: Request<Body>) -> ProxyResult<Response<Body>>;
}

/// Pooled hyper client (HTTP/HTTPS via rustls)
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    request_timeout: Duration,
}

impl HyperTransport {
    pub fn new(config: &HttpClientConfig) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false); // allow absolute-form URIs
        http.set_nodelay(true);
        http.set_connect_timeout(Some(config.get_connect_timeout()));

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder()
            .pool_idle_timeout(config.get_pool_idle_timeout())
            .pool_max_idle_per_host(config.get_pool_max_idle_per_host())
            .build::<_, Body>(https);

        Self {
            client,
            request_timeout: config.get_request_timeout(),
        }
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(&self, req: Request<Body>) -> ProxyResult<Response<Body>> {
        let target = req.uri().to_string();
        match tokio::time::timeout(self.request_timeout, self.client.request(req)).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) => Err(ProxyError::upstream(target, e.to_string())),
            Err(_) => Err(ProxyError::timeout(
                self.request_timeout,
                format!("upstream request to {}", target),
            )),
        }
    }
}

/// Transport handle whose implementation can be replaced at runtime.
///
/// Holders keep one `Arc<SharedTransport>`; a config reload swaps the inner
/// client and in-flight requests finish on the old one.
pub struct SharedTransport {
    inner: RwLock<Arc<dyn Transport>>,
}

impl SharedTransport {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: RwLock::new(transport),
        }
    }

    pub fn replace(&self, transport: Arc<dyn Transport>) {
        match self.inner.write() {
            Ok(mut guard) => *guard = transport,
            Err(poisoned) => *poisoned.into_inner() = transport,
        }
    }

    fn current(&self) -> Arc<dyn Transport> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl Transport for SharedTransport {
    async fn send(&self, req: Request<Body>) -> ProxyResult<Response<Body>> {
        let transport = self.current();
        transport.send(req).await
    }
}

/// Rewrite an inbound proxy request into the request sent upstream.
///
/// Keeps method, headers minus hop-by-hop, path, query and body. Host is set
/// to the target authority.
pub fn build_upstream_request(
    req: Request<Body>,
    target: &Url,
    client_ip: Option<IpAddr>,
) -> ProxyResult<Request<Body>> {
    let (mut parts, body) = req.into_parts();

    let mut absolute = target.clone();
    absolute.set_fragment(None);
    let uri: Uri = absolute.as_str().parse()?;

    let authority = uri
        .authority()
        .map(|a| a.as_str().to_string())
        .ok_or_else(|| ProxyError::invalid_url(target.as_str(), "missing authority"))?;

    parts.uri = uri;
    strip_hop_by_hop_headers(&mut parts.headers);
    parts.headers.insert(
        HOST,
        HeaderValue::from_str(&authority)
            .map_err(|e| ProxyError::invalid_url(target.as_str(), e.to_string()))?,
    );

    if let Some(ip) = client_ip {
        let forwarded = match parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            Some(existing) => format!("{}, {}", existing, ip),
            None => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            parts.headers.insert("x-forwarded-for", value);
        }
    }

    Ok(Request::from_parts(parts, body))
}

/// Copy an upstream response for the crawler, dropping hop-by-hop headers
pub fn build_downstream_response(upstream: Response<Body>) -> Response<Body> {
    let (mut parts, body) = upstream.into_parts();
    strip_hop_by_hop_headers(&mut parts.headers);
    Response::from_parts(parts, body)
}

pub fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    // Headers named in Connection are hop-by-hop too; collect them before removal
    let listed: Vec<String> = headers
        .get_all("connection")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

    const HOP_HEADERS: &[&str] = &[
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "proxy-connection",
        "te",
        "trailers",
        "transfer-encoding",
        "upgrade",
    ];
    for h in HOP_HEADERS {
        headers.remove(*h);
    }
    for name in listed {
        headers.remove(name.as_str());
    }
}
