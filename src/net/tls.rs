//! TLS configuration and certificate loading.
//!
//! Builds a `tokio_rustls::TlsAcceptor` from PEM files: certificate chain,
//! private key, optional client verification against a CA bundle, and an
//! optional cipher-suite allow-list matched by rustls suite name.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;

use crate::config::schema::{ClientAuth, TlsConfig};

/// Errors raised while assembling TLS material.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
    #[error("client_auth {0:?} requires ca_path")]
    MissingCa(ClientAuth),
    #[error("none of the configured ciphers are supported: {0:?}")]
    NoCiphers(Vec<String>),
    #[error("client verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),
    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// Build an acceptor for a listener's TLS settings.
pub fn load_acceptor(config: &TlsConfig) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(&config.cert_path)?;
    let key = load_key(&config.key_path)?;
    let provider = Arc::new(crypto_provider(&config.ciphers)?);

    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let builder = match (config.client_auth, &config.ca_path) {
        (ClientAuth::None, _) => builder.with_no_client_auth(),
        (mode, None) => return Err(TlsError::MissingCa(mode)),
        (mode, Some(ca_path)) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_path)? {
                roots.add(cert)?;
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
            let verifier = if mode == ClientAuth::Optional {
                verifier.allow_unauthenticated().build()?
            } else {
                verifier.build()?
            };
            builder.with_client_cert_verifier(verifier)
        }
    };

    let mut server_config = builder.with_single_cert(certs, key)?;
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    tracing::debug!(
        cert = %config.cert_path.display(),
        client_auth = ?config.client_auth,
        "TLS acceptor loaded"
    );
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn crypto_provider(ciphers: &[String]) -> Result<CryptoProvider, TlsError> {
    let mut provider = ring::default_provider();
    if ciphers.is_empty() {
        return Ok(provider);
    }
    provider
        .cipher_suites
        .retain(|suite| ciphers.iter().any(|name| name == &format!("{:?}", suite.suite())));
    if provider.cipher_suites.is_empty() {
        return Err(TlsError::NoCiphers(ciphers.to_vec()));
    }
    Ok(provider)
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_self_signed(dir: &Path) -> TlsConfig {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        std::fs::write(&cert_path, cert.cert.pem()).unwrap();
        std::fs::write(&key_path, cert.key_pair.serialize_pem()).unwrap();
        TlsConfig::new(cert_path, key_path)
    }

    #[test]
    fn loads_pem_material() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_self_signed(dir.path());
        assert!(load_acceptor(&config).is_ok());
    }

    #[test]
    fn cipher_allow_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = write_self_signed(dir.path());

        config.ciphers = vec!["TLS13_AES_256_GCM_SHA384".to_string()];
        assert!(load_acceptor(&config).is_ok());

        config.ciphers = vec!["NOT_A_SUITE".to_string()];
        assert!(matches!(load_acceptor(&config), Err(TlsError::NoCiphers(_))));
    }

    #[test]
    fn client_auth_needs_a_ca() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = write_self_signed(dir.path());
        config.client_auth = ClientAuth::Required;
        assert!(matches!(load_acceptor(&config), Err(TlsError::MissingCa(ClientAuth::Required))));

        config.ca_path = Some(config.cert_path.clone());
        assert!(load_acceptor(&config).is_ok());
    }

    #[test]
    fn empty_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.pem");
        std::fs::write(&empty, "").unwrap();
        let config = TlsConfig::new(&empty, &empty);
        assert!(matches!(load_acceptor(&config), Err(TlsError::NoCertificates(_))));
    }
}
