//! TLS listener and per-connection workers.
//!
//! Each accepted connection gets its own task. The task completes the TLS
//! handshake, resolves the peer's subject from its certificate, and looks the
//! subject up in the ACL. Unknown subjects are disconnected without any
//! response so the daemon never confirms which identities exist. Known
//! subjects are served HTTP/1.1 with keep-alive, every request authorized
//! against the same record.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::acl::AclStore;
use crate::identity;

pub mod routes;
pub mod tls;

pub use routes::HandlerSettings;

/// Pause after a failed `accept` before trying again.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Errors produced by the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Accepting or inspecting a socket failed.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bound, not yet running daemon.
pub struct Server {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    acl: Arc<AclStore>,
    settings: Arc<HandlerSettings>,
}

impl Server {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        tls: Arc<ServerConfig>,
        acl: AclStore,
        settings: HandlerSettings,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        if acl.is_empty() {
            warn!("ACL is empty, every connection will be refused");
        }
        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(tls),
            acl: Arc::new(acl),
            settings: Arc::new(settings),
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot report its address.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// In-flight connections are not waited for.
    ///
    /// # Errors
    ///
    /// Returns an error only if the listener itself fails.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(addr = %self.local_addr()?, subjects = self.acl.len(), "listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            // Transient (e.g. EMFILE); back off, then keep accepting.
                            warn!(error = %e, "accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    let acceptor = self.acceptor.clone();
                    let acl = Arc::clone(&self.acl);
                    let settings = Arc::clone(&self.settings);
                    tokio::spawn(async move {
                        serve_connection(stream, peer, acceptor, acl, settings).await;
                    });
                }
                () = &mut shutdown => {
                    info!("shutdown requested, no longer accepting connections");
                    return Ok(());
                }
            }
        }
    }

    /// Accept connections forever.
    ///
    /// # Errors
    ///
    /// Returns an error only if the listener itself fails.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending::<()>()).await
    }
}

/// Handshake, identify, and serve one connection.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    acl: Arc<AclStore>,
    settings: Arc<HandlerSettings>,
) {
    let tls = match acceptor.accept(stream).await {
        Ok(tls) => tls,
        Err(e) => {
            debug!(%peer, error = %e, "TLS handshake failed");
            return;
        }
    };

    let subject = match identity::subject_from_peer(tls.get_ref().1.peer_certificates()) {
        Ok(subject) => subject,
        Err(e) => {
            info!(%peer, error = %e, "peer identity unresolved, closing");
            return;
        }
    };

    let Some(record) = acl.lookup(&subject) else {
        info!(%peer, subject = %subject, "no ACL entry for subject, closing");
        return;
    };
    debug!(%peer, subject = %subject, "peer authenticated");

    let service = service_fn(move |req| {
        let record = Arc::clone(&record);
        let settings = Arc::clone(&settings);
        async move { Ok::<_, Infallible>(routes::handle(req, &record, &settings).await) }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(tls), service)
        .await
    {
        debug!(%peer, subject = %subject, error = %e, "connection ended with error");
    }
}
