use anyhow::Result;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use tracing::{debug, error, info, warn};

use super::PolitenessService;

/// HTTP surface of the batch politeness check
#[derive(Clone)]
pub struct PolitenessApi {
    service: PolitenessService,
}

impl PolitenessApi {
    pub fn new(service: PolitenessService) -> Self {
        Self { service }
    }

    pub async fn route(&self, req: Request<Body>) -> Response<Body> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        debug!("{} {}", method, path);

        match (method, path.as_str()) {
            (Method::GET, "/politeness") => {
                let urls = query_urls(req.uri().query().unwrap_or_default());
                json_response(&self.service.is_crawlable(&urls).await)
            }
            (Method::POST, "/politeness") => match read_url_list(req).await {
                Ok(urls) => json_response(&self.service.is_crawlable(&urls).await),
                Err(resp) => resp,
            },
            (Method::POST, "/politeness/verbose") => match read_url_list(req).await {
                Ok(urls) => json_response(&self.service.is_crawlable_verbose(&urls).await),
                Err(resp) => resp,
            },
            _ => plain(StatusCode::NOT_FOUND, "Not Found"),
        }
    }

    /// Serve on `bind_addr` until `shutdown` resolves
    pub async fn run_until<F>(self, bind_addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let make_service = make_service_fn(move |_conn: &AddrStream| {
            let api = self.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let api = api.clone();
                    async move { Ok::<_, Infallible>(api.route(req).await) }
                }))
            }
        });

        let server = Server::try_bind(&bind_addr)?.serve(make_service);
        info!("Politeness check service listening on {}", bind_addr);

        if let Err(e) = server.with_graceful_shutdown(shutdown).await {
            error!("Politeness service error: {}", e);
        }
        Ok(())
    }
}

/// `urls=a,b` and repeated `urls=` parameters
fn query_urls(query: &str) -> Vec<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| key == "urls")
        .flat_map(|(_, value)| {
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

async fn read_url_list(req: Request<Body>) -> std::result::Result<Vec<String>, Response<Body>> {
    let bytes = hyper::body::to_bytes(req.into_body()).await.map_err(|e| {
        warn!("Failed to read politeness request body: {}", e);
        plain(StatusCode::BAD_REQUEST, "Unable to read request body")
    })?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice::<Option<Vec<String>>>(&bytes)
        .map(Option::unwrap_or_default)
        .map_err(|e| {
            debug!("Rejecting politeness request body: {}", e);
            plain(StatusCode::BAD_REQUEST, "Expected a JSON array of URLs")
        })
}

fn json_response<T: Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut resp = Response::new(Body::from(body));
            resp.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            resp
        }
        Err(e) => {
            error!("Failed to serialize politeness response: {}", e);
            plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

fn plain(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut resp = Response::new(Body::from(message));
    *resp.status_mut() = status;
    resp
}
