use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig};
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};

use crate::error::{Error, Result};

pub fn load_certs(path: &Path) -> Result<Vec<Certificate>> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs: Vec<Certificate> = certs(&mut reader)?
        .into_iter()
        .map(Certificate)
        .collect();

    if certs.is_empty() {
        return Err(Error::TlsError(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

pub fn load_private_key(path: &Path) -> Result<PrivateKey> {
    // PKCS8 first, then RSA
    let mut reader = BufReader::new(File::open(path)?);
    if let Some(der) = pkcs8_private_keys(&mut reader)?.into_iter().next() {
        return Ok(PrivateKey(der));
    }

    let mut reader = BufReader::new(File::open(path)?);
    if let Some(der) = rsa_private_keys(&mut reader)?.into_iter().next() {
        return Ok(PrivateKey(der));
    }

    Err(Error::TlsError(format!(
        "No private key found in {}",
        path.display()
    )))
}

pub fn create_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::TlsError(e.to_string()))?;

    Ok(Arc::new(config))
}

/// Client configuration trusting only the certificates in `ca_path`
pub fn create_client_config(ca_path: &Path) -> Result<Arc<ClientConfig>> {
    let mut root_store = RootCertStore::empty();
    for cert in load_certs(ca_path)? {
        root_store
            .add(&cert)
            .map_err(|e| Error::TlsError(e.to_string()))?;
    }

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(Arc::new(config))
}
