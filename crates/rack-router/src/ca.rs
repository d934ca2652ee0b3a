//! Certificate authority.
//!
//! On first start the router loads its CA from a well-known path or
//! mints a fresh one (CN `ca.convox`) and persists it — certificate
//! world-readable, key owner-only. Per-host leaf certificates carry
//! SANs for the host and its wildcard and are cached immutably once
//! minted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use tracing::info;

use crate::error::{RouterError, RouterResult};

/// A PEM certificate and private key pair.
#[derive(Debug, Clone)]
pub struct CertKeyPair {
    pub cert_pem: String,
    pub key_pem: String,
}

/// The router CA plus its leaf cache.
pub struct Ca {
    pair: CertKeyPair,
    key: KeyPair,
    cert: rcgen::Certificate,
    leaves: Mutex<HashMap<String, CertKeyPair>>,
}

fn cert_err(e: impl std::fmt::Display) -> RouterError {
    RouterError::Certificate(e.to_string())
}

fn ca_params() -> CertificateParams {
    let mut params = CertificateParams::default();
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "ca.convox");
    params.distinguished_name = dn;
    // One year of validity.
    params.not_after = rcgen::date_time_ymd(2027, 8, 6);
    params
}

impl Ca {
    /// Load the CA from disk, or generate and persist a new one.
    pub fn load_or_generate(cert_path: &Path, key_path: &Path) -> RouterResult<Self> {
        if cert_path.exists() && key_path.exists() {
            let cert_pem = std::fs::read_to_string(cert_path)?;
            let key_pem = std::fs::read_to_string(key_path)?;
            let key = KeyPair::from_pem(&key_pem).map_err(cert_err)?;
            let params =
                CertificateParams::from_ca_cert_pem(&cert_pem).map_err(cert_err)?;
            let cert = params.self_signed(&key).map_err(cert_err)?;
            info!(path = %cert_path.display(), "loaded router ca");
            return Ok(Self {
                pair: CertKeyPair { cert_pem, key_pem },
                key,
                cert,
                leaves: Mutex::new(HashMap::new()),
            });
        }

        let key = KeyPair::generate().map_err(cert_err)?;
        let cert = ca_params().self_signed(&key).map_err(cert_err)?;
        let pair = CertKeyPair {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        };
        persist(cert_path, pair.cert_pem.as_bytes(), 0o644)?;
        persist(key_path, pair.key_pem.as_bytes(), 0o600)?;
        info!(path = %cert_path.display(), "generated router ca");

        Ok(Self {
            pair,
            key,
            cert,
            leaves: Mutex::new(HashMap::new()),
        })
    }

    /// PEM of the CA certificate.
    pub fn cert_pem(&self) -> &str {
        &self.pair.cert_pem
    }

    /// Leaf certificate for a hostname, minted once and cached. SANs
    /// cover the host and its wildcard.
    pub fn host_cert(&self, hostname: &str) -> RouterResult<CertKeyPair> {
        if let Some(cached) = self.leaves.lock().unwrap().get(hostname) {
            return Ok(cached.clone());
        }

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, hostname);
        params.distinguished_name = dn;
        params.subject_alt_names = vec![
            SanType::DnsName(hostname.to_string().try_into().map_err(cert_err)?),
            SanType::DnsName(format!("*.{hostname}").try_into().map_err(cert_err)?),
        ];
        params.not_after = rcgen::date_time_ymd(2027, 8, 6);

        let leaf_key = KeyPair::generate().map_err(cert_err)?;
        let leaf = params
            .signed_by(&leaf_key, &self.cert, &self.key)
            .map_err(cert_err)?;
        let pair = CertKeyPair {
            cert_pem: leaf.pem(),
            key_pem: leaf_key.serialize_pem(),
        };

        self.leaves
            .lock()
            .unwrap()
            .insert(hostname.to_string(), pair.clone());
        Ok(pair)
    }
}

fn persist(path: &Path, data: &[u8], mode: u32) -> RouterResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

/// Well-known CA location under a data directory.
pub fn ca_paths(data_dir: &Path) -> (PathBuf, PathBuf) {
    (data_dir.join("ca.pem"), data_dir.join("ca.key"))
}
