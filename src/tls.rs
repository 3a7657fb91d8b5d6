//! TLS configuration for the client side of the connection.
//!
//! Three shapes are supported: plain TCP (no [`TlsSettings`] at all),
//! server-auth-only TLS against the system trust store, and mutual TLS
//! with a client certificate and an optional private root bundle. PEM
//! material is loaded eagerly when the corresponding option is applied, so
//! unreadable files fail construction rather than the first connect.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use crate::error::{ClientError, Result};

/// Client certificate chain plus its private key.
struct ClientIdentity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

/// Accumulated TLS options.
///
/// Built up by [`Options::with_client_cert`] and [`Options::with_root_cas`];
/// turned into a rustls [`ClientConfig`] at connect time.
///
/// [`Options::with_client_cert`]: crate::Options::with_client_cert
/// [`Options::with_root_cas`]: crate::Options::with_root_cas
#[derive(Default)]
pub struct TlsSettings {
    roots: Option<RootCertStore>,
    identity: Option<ClientIdentity>,
}

impl std::fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSettings")
            .field("custom_roots", &self.roots.is_some())
            .field("client_identity", &self.identity.is_some())
            .finish()
    }
}

impl TlsSettings {
    /// Load a client certificate chain and private key for mutual TLS.
    pub fn load_client_cert(
        &mut self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<()> {
        let chain = read_certs(cert_path.as_ref())?;
        let key = read_private_key(key_path.as_ref())?;
        self.identity = Some(ClientIdentity { chain, key });
        Ok(())
    }

    /// Replace the system trust store with the CA bundle at `ca_path`.
    pub fn load_root_cas(&mut self, ca_path: impl AsRef<Path>) -> Result<()> {
        let mut store = RootCertStore::empty();
        let certs = read_certs(ca_path.as_ref())?;
        let (added, _ignored) = store.add_parsable_certificates(certs);
        if added == 0 {
            return Err(ClientError::Config(format!(
                "no usable CA certificates in {}",
                ca_path.as_ref().display()
            )));
        }
        self.roots = Some(store);
        Ok(())
    }

    /// Overlay `other`'s loaded material onto `self`. The client identity
    /// and the root override are independent settings: each one `other`
    /// carries wins, each one it lacks keeps its current value.
    pub(crate) fn merge(&mut self, other: TlsSettings) {
        if let Some(roots) = other.roots {
            self.roots = Some(roots);
        }
        if let Some(identity) = other.identity {
            self.identity = Some(identity);
        }
    }

    /// Whether a client certificate has been loaded.
    pub fn has_client_identity(&self) -> bool {
        self.identity.is_some()
    }

    /// Whether the system trust store has been overridden.
    pub fn has_custom_roots(&self) -> bool {
        self.roots.is_some()
    }

    /// Build the rustls client configuration.
    pub(crate) fn client_config(&self) -> Result<ClientConfig> {
        let roots = match &self.roots {
            Some(store) => store.clone(),
            None => system_roots()?,
        };

        let builder = ClientConfig::builder().with_root_certificates(roots);
        let config = match &self.identity {
            Some(identity) => {
                builder.with_client_auth_cert(identity.chain.clone(), identity.key.clone_key())?
            }
            None => builder.with_no_client_auth(),
        };
        Ok(config)
    }
}

/// Derive the TLS server name from a `host:port` dial address.
pub(crate) fn server_name(addr: &str) -> Result<ServerName<'static>> {
    let host = if let Some(rest) = addr.strip_prefix('[') {
        // Bracketed IPv6 literal.
        rest.split_once(']').map_or(rest, |(host, _)| host)
    } else {
        addr.rsplit_once(':').map_or(addr, |(host, _)| host)
    };

    ServerName::try_from(host.to_string())
        .map_err(|_| ClientError::Config(format!("{host:?} is not a valid TLS server name")))
}

fn system_roots() -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();
    let (added, _ignored) = store.add_parsable_certificates(loaded.certs);
    if added == 0 {
        return Err(ClientError::Config(
            "no usable certificates in the system trust store".to_string(),
        ));
    }
    Ok(store)
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader).collect::<io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(ClientError::Config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| {
        ClientError::Config(format!("no private key found in {}", path.display()))
    })
}
