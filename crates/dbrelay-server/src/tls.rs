//! TLS for the HTTP listener.
//!
//! Loads the server certificate chain and key from PEM files. A CA file
//! turns on client certificate verification; `auth_clients` decides
//! whether a client certificate is mandatory.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use rustls_pki_types::pem::PemObject;
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

use crate::config::{ConfigError, DbRelayConfig};

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_file: String,
    pub key_file: String,
    pub ca_cert_file: Option<String>,
    pub auth_clients: bool,
}

impl TlsConfig {
    /// Builds the TLS settings from server config, or `None` when no
    /// TLS port is configured.
    pub fn from_config(cfg: &DbRelayConfig) -> Result<Option<Self>, ConfigError> {
        if cfg.tls_port().is_none() {
            return Ok(None);
        }
        Ok(Some(Self {
            cert_file: cfg.tls_cert_file.clone(),
            key_file: cfg.tls_key_file.clone(),
            ca_cert_file: (!cfg.tls_ca_cert_file.is_empty())
                .then(|| cfg.tls_ca_cert_file.clone()),
            auth_clients: cfg.tls_auth_clients()?,
        }))
    }
}

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("certificate file not found: {0}")]
    CertFileNotFound(String),

    #[error("private key file not found: {0}")]
    KeyFileNotFound(String),

    #[error("CA certificate file not found: {0}")]
    CaCertFileNotFound(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse PEM in {path}: {reason}")]
    Pem { path: String, reason: String },

    #[error("no certificates found in file: {0}")]
    NoCertsFound(String),

    #[error("failed to build TLS config: {0}")]
    Config(#[from] rustls::Error),

    #[error("failed to build client verifier: {0}")]
    Verifier(String),
}

fn open(path: &str, not_found: fn(String) -> TlsError) -> Result<BufReader<File>, TlsError> {
    if !Path::new(path).exists() {
        return Err(not_found(path.to_string()));
    }
    let file = File::open(path).map_err(|source| TlsError::Read {
        path: path.to_string(),
        source,
    })?;
    Ok(BufReader::new(file))
}

fn read_certs(
    path: &str,
    not_found: fn(String) -> TlsError,
) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = CertificateDer::pem_reader_iter(open(path, not_found)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Pem {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertsFound(path.to_string()));
    }
    Ok(certs)
}

pub fn load_tls_acceptor(config: &TlsConfig) -> Result<TlsAcceptor, TlsError> {
    let certs = read_certs(&config.cert_file, TlsError::CertFileNotFound)?;

    let key = PrivateKeyDer::from_pem_reader(open(&config.key_file, TlsError::KeyFileNotFound)?)
        .map_err(|e| TlsError::Pem {
            path: config.key_file.clone(),
            reason: e.to_string(),
        })?;

    let server_config = match config.ca_cert_file {
        Some(ref ca_path) => {
            let mut roots = RootCertStore::empty();
            for cert in read_certs(ca_path, TlsError::CaCertFileNotFound)? {
                roots
                    .add(cert)
                    .map_err(|e| TlsError::Verifier(e.to_string()))?;
            }

            let builder = WebPkiClientVerifier::builder(Arc::new(roots));
            let builder = if config.auth_clients {
                builder
            } else {
                builder.allow_unauthenticated()
            };
            let verifier = builder
                .build()
                .map_err(|e| TlsError::Verifier(e.to_string()))?;

            rustls::ServerConfig::builder()
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)?
        }
        None => rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?,
    };

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}
