//! Router assembly.
//!
//! Owns the allocator, table, CA, and virtual interface; serves DNS on
//! the base address, the control API over TLS on 443, and one proxy
//! listener per registered endpoint. Interface state is acquired
//! through a guard whose release runs on every exit path.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use crate::api::{self, ControlState, Op};
use crate::ca::{self, Ca};
use crate::dns::DnsServer;
use crate::error::{RouterError, RouterResult};
use crate::iface::{IfaceGuard, Interface};
use crate::ip::IpAllocator;
use crate::model::{Protocol, Table};
use crate::proxy::{Proxy, RackWaker, Waker};

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Managed `/16` the racks carve slices from.
    pub cidr: String,
    /// Private domain answered by the resolver.
    pub domain: String,
    /// CA and state location.
    pub data_dir: PathBuf,
    /// Upstream resolver for passthrough queries (TCP).
    pub dns_upstream: String,
    /// Name of the synthesized interface.
    pub iface: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cidr: "10.42.0.0/16".to_string(),
            domain: "convox".to_string(),
            data_dir: PathBuf::from("/var/lib/rack-router"),
            dns_upstream: "8.8.8.8:53".to_string(),
            iface: "vrack0".to_string(),
        }
    }
}

/// Build a TLS acceptor for a hostname from the router CA.
pub fn tls_acceptor(ca: &Ca, hostname: &str) -> RouterResult<TlsAcceptor> {
    let pair = ca.host_cert(hostname)?;
    let certs = rustls_pemfile::certs(&mut pair.cert_pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(RouterError::Io)?;
    let key = rustls_pemfile::private_key(&mut pair.key_pem.as_bytes())
        .map_err(RouterError::Io)?
        .ok_or_else(|| RouterError::Certificate("no private key in pem".to_string()))?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| RouterError::Certificate(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Run the router until shutdown.
pub async fn run(config: RouterConfig, iface: Arc<dyn Interface>) -> anyhow::Result<()> {
    let allocator = Arc::new(IpAllocator::new(&config.cidr)?);
    let base = allocator.base();
    let table = Table::new(allocator);

    let (cert_path, key_path) = ca::ca_paths(&config.data_dir);
    let ca = Arc::new(Ca::load_or_generate(&cert_path, &key_path)?);

    let guard = Arc::new(IfaceGuard::acquire(iface, &config.iface, base).await?);
    info!(%base, iface = %config.iface, "router interface up");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (ops_tx, mut ops_rx) = mpsc::unbounded_channel::<Op>();

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        });
    }

    // DNS on the base address.
    let dns = Arc::new(DnsServer::new(
        table.clone(),
        &config.domain,
        &config.dns_upstream,
    ));
    let dns_socket = UdpSocket::bind(SocketAddr::from((base, 53))).await?;
    tokio::spawn(dns.run(dns_socket, shutdown_rx.clone()));
    info!(%base, "dns resolver listening");

    // Control API over TLS on the base address.
    let control = api::router(ControlState {
        table: table.clone(),
        ops: ops_tx,
        shutdown: shutdown_tx.clone(),
    });
    let control_acceptor = tls_acceptor(&ca, &format!("router.{}", config.domain))?;
    let control_listener = TcpListener::bind(SocketAddr::from((base, 443))).await?;
    tokio::spawn(serve_control(
        control_listener,
        control_acceptor,
        control,
        shutdown_rx.clone(),
    ));
    info!(%base, "control api listening");

    let waker: Arc<dyn Waker> = Arc::new(RackWaker::new(table.clone(), &config.domain));

    // React to structural changes until shutdown.
    let mut shutdown = shutdown_rx.clone();
    loop {
        tokio::select! {
            op = ops_rx.recv() => {
                let Some(op) = op else { break };
                if let Err(e) = apply_op(op, &config, &table, &ca, &guard, &waker, &shutdown_rx).await {
                    warn!(error = %e, "structural change failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    guard.release().await;
    info!("router stopped");
    Ok(())
}

async fn apply_op(
    op: Op,
    config: &RouterConfig,
    table: &Table,
    ca: &Arc<Ca>,
    guard: &Arc<IfaceGuard>,
    waker: &Arc<dyn Waker>,
    shutdown: &watch::Receiver<bool>,
) -> RouterResult<()> {
    match op {
        Op::HostAdded { ip } => guard.add_alias(ip).await,
        Op::HostRemoved { ip } => guard.remove_alias(ip).await,
        Op::EndpointAdded {
            rack,
            hostname,
            ip,
            protocol,
            port,
        } => {
            let acceptor = match protocol {
                Protocol::Tcp => None,
                Protocol::Tls | Protocol::Https => Some(tls_acceptor(ca, &hostname)?),
            };
            let listener = TcpListener::bind(SocketAddr::from((ip, port))).await?;
            let proxy = Arc::new(Proxy {
                rack,
                hostname,
                protocol,
                port,
                table: table.clone(),
                acceptor,
                waker: Some(Arc::clone(waker)),
                domain: config.domain.clone(),
            });
            tokio::spawn(proxy.run(listener, shutdown.clone()));
            Ok(())
        }
    }
}

async fn serve_control(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    router: axum::Router,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((stream, _peer)) = accepted else { break };
                let acceptor = acceptor.clone();
                let service = TowerToHyperService::new(router.clone());
                tokio::spawn(async move {
                    let Ok(stream) = acceptor.accept(stream).await else { return };
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_complete() {
        let config = RouterConfig::default();
        assert_eq!(config.cidr, "10.42.0.0/16");
        assert_eq!(config.dns_upstream, "8.8.8.8:53");
        assert_eq!(config.domain, "convox");
    }

    #[test]
    fn acceptor_builds_from_minted_cert() {
        let dir = tempfile::tempdir().unwrap();
        let (cert_path, key_path) = ca::ca_paths(dir.path());
        let ca = Ca::load_or_generate(&cert_path, &key_path).unwrap();
        tls_acceptor(&ca, "router.convox").unwrap();
    }
}
