//! Application wiring and lifecycle.
//!
//! Owns the construction order (storage, delete pool, service façade, both
//! servers) and the shutdown order: HTTP stop, gRPC stop, close of the
//! delete pipeline, join of the workers, storage close.

use std::net::SocketAddr;
use std::sync::Arc;

use ipnet::IpNet;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{error, info, warn};

use kurz_core::TokenCodec;
use kurz_proto_schema::v1::shortener_server::ShortenerServer;
use kurz_storage::spawn_delete_pool;

use crate::config::Config;
use crate::grpc::ShortenerGrpcServer;
use crate::http::{self, AppState};
use crate::service::ShortenerService;

pub struct App {
    config: Config,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let config = self.config;

        let storage = kurz_storage::connect(&config.database_dsn, &config.file_storage_path).await?;
        let (deletes, pool) = spawn_delete_pool(Arc::clone(&storage));

        let service = Arc::new(ShortenerService::new(
            Arc::clone(&storage),
            deletes,
            TokenCodec::new(config.secret_key.as_bytes()),
            config.base_url.clone(),
            parse_trusted_subnet(&config.trusted_subnet),
        ));

        let shutdown = CancellationToken::new();
        spawn_signal_listener(shutdown.clone())?;

        let listener = TcpListener::bind(&config.server_address).await?;
        info!(listen_addr = %listener.local_addr()?, "starting http server");
        let state = AppState {
            service: Arc::clone(&service),
            cookie_name: config.cookie_auth_name.clone(),
        };
        let http_shutdown = shutdown.clone();
        let http_server = tokio::spawn(async move {
            axum::serve(listener, http::router(state))
                .with_graceful_shutdown(http_shutdown.cancelled_owned())
                .await
        });

        let grpc_server = if config.grpc_address.trim().is_empty() {
            None
        } else {
            let addr: SocketAddr = config.grpc_address.parse()?;
            info!(listen_addr = %addr, "starting grpc server");
            let grpc = ShortenerGrpcServer::new(Arc::clone(&service), &config.cookie_auth_name);
            let grpc_shutdown = shutdown.clone();
            Some(tokio::spawn(async move {
                Server::builder()
                    .add_service(ShortenerServer::new(grpc))
                    .serve_with_shutdown(addr, grpc_shutdown.cancelled_owned())
                    .await
            }))
        };

        http_server.await??;
        if let Some(grpc_server) = grpc_server {
            grpc_server.await??;
        }

        // Both servers have drained; release the queue so the workers see a
        // closed channel, then wait for them before touching the backend.
        drop(service);
        pool.shutdown().await;
        storage.close().await?;

        info!("server shutdown complete");
        Ok(())
    }
}

fn parse_trusted_subnet(subnet: &str) -> Option<IpNet> {
    let subnet = subnet.trim();
    if subnet.is_empty() {
        return None;
    }
    match subnet.parse() {
        Ok(net) => Some(net),
        Err(err) => {
            warn!(%err, subnet, "bad trusted subnet value; internal stats stay gated");
            None
        }
    }
}

fn spawn_signal_listener(shutdown: CancellationToken) -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    error!(%err, "failed to listen for ctrl-c");
                }
            }
            _ = sigterm.recv() => {}
            _ = sigquit.recv() => {}
        }
        info!("shutdown signal received");
        shutdown.cancel();
    });
    Ok(())
}
