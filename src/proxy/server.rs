use anyhow::Result;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use tracing::{error, info};

use super::pipeline::ProxyPipeline;
use crate::app_state::AppState;

pub struct ProxyServer {
    pub bind_addr: SocketAddr,
    pipeline: ProxyPipeline,
}

impl ProxyServer {
    pub fn new(bind_addr: SocketAddr, state: AppState) -> Self {
        Self {
            bind_addr,
            pipeline: ProxyPipeline::new(state),
        }
    }

    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Serve until `shutdown` resolves, then let in-flight requests finish
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let pipeline = self.pipeline.clone();

        let make_service = make_service_fn(move |conn: &AddrStream| {
            let pipeline = pipeline.clone();
            let remote = conn.remote_addr();
            async move {
                Ok::<_, Infallible>(service_fn(move |mut req| {
                    let pipeline = pipeline.clone();
                    // Attach remote addr to request extensions
                    req.extensions_mut().insert(remote);
                    async move { Ok::<_, Infallible>(pipeline.handle(req).await) }
                }))
            }
        });

        let server = Server::try_bind(&self.bind_addr)?.serve(make_service);
        info!("Polite proxy listening on {}", self.bind_addr);

        if let Err(e) = server.with_graceful_shutdown(shutdown).await {
            error!("HTTP server error: {}", e);
        }

        Ok(())
    }
}
