//! Endpoint proxying.
//!
//! Each endpoint owns one listener. `tcp` and `tls` endpoints proxy
//! byte-for-byte (`tls` terminates first); `https` terminates TLS and
//! reverse-proxies per request. Upstream targets with a `tls` or
//! `https` scheme are dialed through TLS with verification disabled —
//! upstreams inside the rack are self-signed.

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, warn};

use crate::error::{RouterError, RouterResult};
use crate::model::{Protocol, Table};

/// Bidirectional byte stream.
pub trait ReadWrite: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> ReadWrite for T {}

// ── Targets ────────────────────────────────────────────────────────

/// A parsed upstream target.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

/// Parse `scheme://host:port`.
pub fn parse_target(url: &str) -> RouterResult<Target> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| RouterError::Target(url.to_string()))?;
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| RouterError::Target(url.to_string()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| RouterError::Target(url.to_string()))?;
    if host.is_empty() {
        return Err(RouterError::Target(url.to_string()));
    }
    Ok(Target {
        scheme: scheme.to_string(),
        host: host.to_string(),
        port,
    })
}

// ── Upstream TLS (verification disabled by design) ─────────────────

#[derive(Debug)]
struct NoVerify(rustls::crypto::CryptoProvider);

impl ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn insecure_connector() -> TlsConnector {
    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerify((*provider).clone())))
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Dial a target, wrapping the stream in TLS when the scheme asks.
pub async fn dial(target: &Target) -> RouterResult<Box<dyn ReadWrite>> {
    let tcp = TcpStream::connect((target.host.as_str(), target.port)).await?;
    match target.scheme.as_str() {
        "tls" | "https" => {
            let server_name = ServerName::try_from(target.host.clone())
                .map_err(|_| RouterError::Target(target.host.clone()))?;
            let stream = insecure_connector()
                .connect(server_name, tcp)
                .await
                .map_err(RouterError::Io)?;
            Ok(Box::new(stream))
        }
        _ => Ok(Box::new(tcp)),
    }
}

// ── Wake-on-demand ─────────────────────────────────────────────────

/// Wakes a sleeping app before the first proxied connection.
#[async_trait]
pub trait Waker: Send + Sync {
    async fn wake(&self, rack: &str, app: &str);
}

/// App name encoded in a multi-label hostname prefix, e.g.
/// `web.myapp.rack1.convox` with suffix `rack1.convox` names `myapp`.
pub fn app_from_hostname(hostname: &str, suffix: &str) -> Option<String> {
    let prefix = hostname.strip_suffix(suffix)?.trim_end_matches('.');
    let labels: Vec<&str> = prefix.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() >= 2 {
        Some(labels.last().unwrap().to_string())
    } else {
        None
    }
}

/// Wakes apps through the rack's own `rack` host API.
pub struct RackWaker {
    table: Table,
    domain: String,
}

impl RackWaker {
    pub fn new(table: Table, domain: &str) -> Self {
        Self {
            table,
            domain: domain.to_string(),
        }
    }

    async fn request(
        &self,
        ip: Ipv4Addr,
        method: &str,
        path: &str,
        body: &str,
    ) -> RouterResult<String> {
        let target = Target {
            scheme: "tls".to_string(),
            host: ip.to_string(),
            port: 443,
        };
        let stream = dial(&target).await?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| RouterError::Io(std::io::Error::other(e)))?;
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(hyper::header::HOST, ip.to_string())
            .body(Full::new(Bytes::from(body.to_string())))
            .map_err(|e| RouterError::Io(std::io::Error::other(e)))?;
        let response = sender
            .send_request(request)
            .await
            .map_err(|e| RouterError::Io(std::io::Error::other(e)))?;
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| RouterError::Io(std::io::Error::other(e)))?
            .to_bytes();
        Ok(String::from_utf8_lossy(&bytes).to_string())
    }
}

#[async_trait]
impl Waker for RackWaker {
    async fn wake(&self, rack: &str, app: &str) {
        let api_host = format!("rack.{rack}.{}", self.domain);
        let Some(ip) = self.table.resolve(&api_host) else {
            return;
        };

        let body = match self.request(ip, "GET", &format!("/apps/{app}"), "").await {
            Ok(body) => body,
            Err(e) => {
                debug!(error = %e, app, "wake lookup failed");
                return;
            }
        };
        if !body.contains(r#""Sleep":"true""#) && !body.contains(r#""status":"sleeping""#) {
            return;
        }

        if let Err(e) = self
            .request(ip, "PUT", &format!("/apps/{app}"), "sleep=false")
            .await
        {
            debug!(error = %e, app, "wake failed");
        }
    }
}

// ── The proxy ──────────────────────────────────────────────────────

/// One endpoint's listener loop.
pub struct Proxy {
    pub rack: String,
    pub hostname: String,
    pub protocol: Protocol,
    pub port: u16,
    pub table: Table,
    /// TLS acceptor for `tls` and `https` endpoints.
    pub acceptor: Option<TlsAcceptor>,
    pub waker: Option<Arc<dyn Waker>>,
    /// Hostname suffix that scopes app extraction.
    pub domain: String,
}

impl Proxy {
    /// Accept connections until shutdown; each connection is handled
    /// in its own task.
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let proxy = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(e) = proxy.handle(stream).await {
                                    debug!(error = %e, %peer, "connection dropped");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn handle(&self, stream: TcpStream) -> RouterResult<()> {
        self.table.touch(&self.rack, &self.hostname);

        if let Some(waker) = &self.waker {
            if let Some(app) = app_from_hostname(&self.hostname, &format!("{}.{}", self.rack, self.domain)) {
                waker.wake(&self.rack, &app).await;
            }
        }

        match self.protocol {
            Protocol::Tcp => self.pipe(stream).await,
            Protocol::Tls => {
                let acceptor = self
                    .acceptor
                    .as_ref()
                    .ok_or_else(|| RouterError::Certificate("no acceptor".to_string()))?;
                let stream = acceptor.accept(stream).await?;
                self.pipe(stream).await
            }
            Protocol::Https => {
                let acceptor = self
                    .acceptor
                    .as_ref()
                    .ok_or_else(|| RouterError::Certificate("no acceptor".to_string()))?;
                let stream = acceptor.accept(stream).await?;
                self.serve_https(stream).await
            }
        }
    }

    fn pick(&self) -> RouterResult<Target> {
        let url = self
            .table
            .target_pick(&self.rack, &self.hostname, self.port)?;
        parse_target(&url)
    }

    async fn pipe<S>(&self, mut stream: S) -> RouterResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let target = self.pick()?;
        let mut upstream = dial(&target).await?;
        tokio::io::copy_bidirectional(&mut stream, &mut upstream).await?;
        Ok(())
    }

    async fn serve_https<S>(&self, stream: S) -> RouterResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let table = self.table.clone();
        let rack = self.rack.clone();
        let hostname = self.hostname.clone();
        let port = self.port;

        let service = service_fn(move |request: Request<Incoming>| {
            let table = table.clone();
            let rack = rack.clone();
            let hostname = hostname.clone();
            async move {
                match forward(&table, &rack, &hostname, port, request).await {
                    Ok(response) => Ok::<_, hyper::Error>(response),
                    Err(e) => {
                        debug!(error = %e, "upstream request failed");
                        let body = Full::new(Bytes::from(format!("upstream error: {e}\n")))
                            .map_err(|never| match never {})
                            .boxed();
                        Ok(Response::builder()
                            .status(StatusCode::BAD_GATEWAY)
                            .body(body)
                            .expect("static response"))
                    }
                }
            }
        });

        hyper::server::conn::http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .await
            .map_err(|e| RouterError::Io(std::io::Error::other(e)))?;
        Ok(())
    }
}

/// Forward one HTTP request to a freshly picked target.
async fn forward(
    table: &Table,
    rack: &str,
    hostname: &str,
    port: u16,
    request: Request<Incoming>,
) -> RouterResult<Response<BoxBody<Bytes, hyper::Error>>> {
    let url = table.target_pick(rack, hostname, port)?;
    let target = parse_target(&url)?;
    let upstream = dial(&target).await?;
    let io = TokioIo::new(upstream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| RouterError::Io(std::io::Error::other(e)))?;
    tokio::spawn(async move {
        let _ = conn.await;
    });
    let response = sender
        .send_request(request)
        .await
        .map_err(|e| RouterError::Io(std::io::Error::other(e)))?;
    Ok(response.map(BodyExt::boxed))
}
