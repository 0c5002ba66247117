//! HTTPS Server
//!
//! TCP accept loop with a TLS handshake per connection. The verified peer
//! certificate is turned into a [`PeerIdentity`] once per connection and
//! attached to every request served on it.

use std::future::Future;
use std::net::SocketAddr;

use axum::{extract::Request, Extension, Router};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;

use super::http::create_router;
use crate::config::WolfVaultConfig;
use crate::error::Result;
use crate::gate::AdmissionGate;
use crate::identity::{extract_identity, PeerIdentity};
use crate::tls::build_server_config;

/// Mutual-TLS HTTP server in front of the admission gate
pub struct VaultServer {
    bind_address: String,
    acceptor: TlsAcceptor,
    router: Router,
}

impl VaultServer {
    /// Create a server from configuration
    pub fn new(config: &WolfVaultConfig, gate: AdmissionGate) -> Result<Self> {
        let tls = build_server_config(&config.tls)?;
        Ok(Self {
            bind_address: config.server.bind_address.clone(),
            acceptor: TlsAcceptor::from(tls),
            router: create_router(gate, config.max_upload_bytes()),
        })
    }

    /// Bind the configured address and serve until ctrl-c
    pub async fn start(self) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_address).await?;
        tracing::info!("WolfVault listening on https://{}", self.bind_address);

        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Received shutdown signal");
        })
        .await
    }

    /// Serve connections from `listener` until `shutdown` completes
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let acceptor = self.acceptor.clone();
                            let router = self.router.clone();
                            tokio::spawn(async move {
                                handle_connection(socket, addr, acceptor, router).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = &mut shutdown => {
                    break;
                }
            }
        }

        tracing::info!("WolfVault server stopped");
        Ok(())
    }
}

/// Handshake, derive the peer identity, then serve HTTP on the connection
async fn handle_connection(
    socket: TcpStream,
    addr: SocketAddr,
    acceptor: TlsAcceptor,
    router: Router,
) {
    let stream = match acceptor.accept(socket).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::debug!("TLS handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let identity: PeerIdentity = extract_identity(stream.get_ref().1.peer_certificates());
    tracing::debug!("Connection from {} as {}", addr, identity);

    let service = router.layer(Extension(identity));
    let hyper_service = hyper::service::service_fn(move |request: Request<Incoming>| {
        service.clone().oneshot(request)
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    if let Err(e) = builder.serve_connection(TokioIo::new(stream), hyper_service).await {
        tracing::debug!("Connection from {} ended: {}", addr, e);
    }
}
