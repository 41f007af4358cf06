//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Load the static certificate pair
//! - Load managed certificates for allow-listed hosts from a directory
//! - Resolve the certificate per connection by SNI
//! - Refresh managed certificates in place when the directory changes
//! - Answer TLS-ALPN-01 validation handshakes with challenge certificates
//!
//! # Design Decisions
//! - Managed certificates win for their hosts; the static pair covers the rest
//! - Managed files are `<dir>/<host>` holding the private key and chain in PEM
//! - Refresh swaps the whole map atomically; handshakes never block on it
//! - Issuance lives in `acme`; this module serves what is on disk plus the
//!   in-memory challenge certificates

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{ServerConfig, SupportedProtocolVersion};

use super::acme::ACME_TLS_ALPN;
use crate::config::{ProxyConfig, TlsVersion};

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid PEM in {path}: {source}")]
    Pem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no certificate found in {0}")]
    NoCertificate(PathBuf),
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
    #[error("unsupported private key in {path}: {source}")]
    Key {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },
    #[error("invalid tls_min_version {0:?}")]
    Version(String),
    #[error("TLS configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),
    #[error("failed to create certificate directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Parse a PEM chain and private key into a signing certificate.
///
/// `path` is only used in error messages.
pub fn load_certified_key(
    cert_pem: &[u8],
    key_pem: &[u8],
    path: &Path,
) -> Result<Arc<CertifiedKey>, TlsError> {
    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Pem {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate(path.to_path_buf()));
    }

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|source| TlsError::Pem {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))?;

    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key).map_err(|source| {
        TlsError::Key {
            path: path.to_path_buf(),
            source,
        }
    })?;

    Ok(Arc::new(CertifiedKey::new(certs, signing_key)))
}

fn read(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the static certificate from separate chain and key files.
pub fn load_static(cert_path: &Path, key_path: &Path) -> Result<Arc<CertifiedKey>, TlsError> {
    let cert_pem = read(cert_path)?;
    let key_pem = read(key_path)?;
    load_certified_key(&cert_pem, &key_pem, cert_path)
}

#[derive(Debug, Clone)]
struct ManagedCert {
    key: Arc<CertifiedKey>,
    /// Expiry of the leaf certificate, Unix seconds.
    not_after: i64,
}

/// Certificates for allow-listed hosts, kept in a cache directory.
///
/// The directory is the ACME cache: `acme::Autocert` writes issued
/// certificates here and this type serves them. Challenge certificates for
/// in-flight TLS-ALPN-01 validations live in memory only.
pub struct ManagedCerts {
    dir: PathBuf,
    hosts: Vec<String>,
    certs: ArcSwap<HashMap<String, ManagedCert>>,
    challenges: DashMap<String, Arc<CertifiedKey>>,
}

impl std::fmt::Debug for ManagedCerts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedCerts")
            .field("dir", &self.dir)
            .field("hosts", &self.hosts)
            .field("loaded", &self.certs.load().keys().collect::<Vec<_>>())
            .finish()
    }
}

fn is_safe_host(host: &str) -> bool {
    !host.is_empty() && !host.contains(['/', '\\']) && !host.starts_with('.')
}

/// Expiry of the leaf certificate in Unix seconds, `i64::MAX` if unreadable.
fn not_after(key: &CertifiedKey) -> i64 {
    key.cert
        .first()
        .and_then(|leaf| x509_parser::parse_x509_certificate(leaf.as_ref()).ok())
        .map(|(_, cert)| cert.validity().not_after.timestamp())
        .unwrap_or(i64::MAX)
}

impl ManagedCerts {
    /// Create the directory if needed and load whatever is there.
    ///
    /// Hosts that could escape the directory are dropped from the allow-list.
    pub fn open(dir: impl Into<PathBuf>, hosts: &[String]) -> Result<Self, TlsError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| TlsError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let hosts = hosts
            .iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|host| {
                let safe = is_safe_host(host);
                if !safe {
                    tracing::warn!(host = %host, "Skipping unsafe managed certificate host");
                }
                safe
            })
            .collect();

        let managed = Self {
            dir,
            hosts,
            certs: ArcSwap::from_pointee(HashMap::new()),
            challenges: DashMap::new(),
        };
        managed.reload();
        Ok(managed)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Re-read every allowed host's file. Returns the number loaded.
    ///
    /// Missing files are skipped; unreadable or invalid ones are logged and
    /// skipped, so one bad file never drops the other hosts.
    pub fn reload(&self) -> usize {
        let mut certs = HashMap::new();

        for host in &self.hosts {
            let path = self.dir.join(host);
            let pem = match std::fs::read(&path) {
                Ok(pem) => pem,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(host = %host, "No managed certificate yet");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(host = %host, error = %e, "Failed to read managed certificate");
                    continue;
                }
            };

            match load_certified_key(&pem, &pem, &path) {
                Ok(key) => {
                    let not_after = not_after(&key);
                    certs.insert(host.clone(), ManagedCert { key, not_after });
                }
                Err(e) => tracing::warn!(host = %host, error = %e, "Invalid managed certificate"),
            }
        }

        let loaded = certs.len();
        self.certs.store(Arc::new(certs));
        tracing::info!(dir = %self.dir.display(), loaded, "Managed certificates loaded");
        loaded
    }

    pub fn get(&self, host: &str) -> Option<Arc<CertifiedKey>> {
        self.certs
            .load()
            .get(&host.to_ascii_lowercase())
            .map(|cert| cert.key.clone())
    }

    /// Expiry of the loaded certificate for `host`, Unix seconds.
    pub fn expires_at(&self, host: &str) -> Option<i64> {
        self.certs
            .load()
            .get(&host.to_ascii_lowercase())
            .map(|cert| cert.not_after)
    }

    /// Serve `cert` to TLS-ALPN-01 validation handshakes for `host`.
    pub fn set_challenge(&self, host: &str, cert: Arc<CertifiedKey>) {
        self.challenges.insert(host.to_ascii_lowercase(), cert);
    }

    pub fn clear_challenge(&self, host: &str) {
        self.challenges.remove(&host.to_ascii_lowercase());
    }

    pub fn challenge(&self, host: &str) -> Option<Arc<CertifiedKey>> {
        self.challenges
            .get(&host.to_ascii_lowercase())
            .map(|entry| entry.value().clone())
    }
}

/// SNI-based certificate resolver over static and managed certificates.
#[derive(Debug, Default)]
pub struct CertStore {
    static_cert: Option<Arc<CertifiedKey>>,
    managed: Option<Arc<ManagedCerts>>,
}

impl CertStore {
    pub fn new(
        static_cert: Option<Arc<CertifiedKey>>,
        managed: Option<Arc<ManagedCerts>>,
    ) -> Self {
        Self {
            static_cert,
            managed,
        }
    }

    pub fn managed(&self) -> Option<&Arc<ManagedCerts>> {
        self.managed.as_ref()
    }

    /// Certificate for a handshake naming `sni`.
    pub fn lookup(&self, sni: Option<&str>) -> Option<Arc<CertifiedKey>> {
        if let (Some(sni), Some(managed)) = (sni, &self.managed) {
            if let Some(cert) = managed.get(sni) {
                return Some(cert);
            }
        }
        self.static_cert.clone()
    }

    /// Certificate for an `acme-tls/1` validation handshake naming `sni`.
    pub fn lookup_challenge(&self, sni: Option<&str>) -> Option<Arc<CertifiedKey>> {
        self.managed.as_ref()?.challenge(sni?)
    }
}

impl ResolvesServerCert for CertStore {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let validation = client_hello
            .alpn()
            .is_some_and(|mut protocols| protocols.any(|p| p == ACME_TLS_ALPN));
        if validation {
            return self.lookup_challenge(client_hello.server_name());
        }

        let cert = self.lookup(client_hello.server_name());
        if cert.is_none() {
            tracing::debug!(sni = ?client_hello.server_name(), "No certificate for handshake");
        }
        cert
    }
}

fn protocol_versions(version: TlsVersion) -> &'static [&'static SupportedProtocolVersion] {
    static MODERN: &[&SupportedProtocolVersion] =
        &[&rustls::version::TLS12, &rustls::version::TLS13];
    static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

    match version {
        TlsVersion::Tls13 => TLS13_ONLY,
        TlsVersion::Tls12 => MODERN,
        TlsVersion::Tls10 | TlsVersion::Tls11 => {
            tracing::warn!(
                requested = ?version,
                "TLS below 1.2 is not supported; using TLS 1.2 as the minimum"
            );
            MODERN
        }
    }
}

/// Everything the listener needs for TLS, plus the directory watcher.
pub struct TlsSetup {
    pub server_config: Arc<ServerConfig>,
    pub store: Arc<CertStore>,
    pub watcher: Option<RecommendedWatcher>,
}

/// Build TLS material from `config`. `None` when no certificate is configured.
pub fn tls_setup(config: &ProxyConfig) -> Result<Option<TlsSetup>, TlsError> {
    if !config.tls_enabled() {
        return Ok(None);
    }

    let version = TlsVersion::parse(&config.tls_min_version)
        .ok_or_else(|| TlsError::Version(config.tls_min_version.clone()))?;

    let static_cert = match config.static_tls() {
        Some((cert, key)) => Some(load_static(Path::new(cert), Path::new(key))?),
        None => None,
    };
    let managed = match config.managed_tls() {
        Some((dir, hosts)) => Some(Arc::new(ManagedCerts::open(dir, hosts)?)),
        None => None,
    };

    let watcher = match &managed {
        Some(managed) => Some(watch_managed(managed.clone())?),
        None => None,
    };

    let store = Arc::new(CertStore::new(static_cert, managed));
    let server_config = server_config(store.clone(), version)?;

    Ok(Some(TlsSetup {
        server_config,
        store,
        watcher,
    }))
}

/// rustls server configuration resolving through `store`.
///
/// `acme-tls/1` is offered only when managed certificates are configured.
pub fn server_config(
    store: Arc<CertStore>,
    version: TlsVersion,
) -> Result<Arc<ServerConfig>, TlsError> {
    let acme = store.managed().is_some();
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(protocol_versions(version))?
        .with_no_client_auth()
        .with_cert_resolver(store);
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    if acme {
        config.alpn_protocols.push(ACME_TLS_ALPN.to_vec());
    }
    Ok(Arc::new(config))
}

/// Reload managed certificates whenever their directory changes.
pub fn watch_managed(managed: Arc<ManagedCerts>) -> Result<RecommendedWatcher, TlsError> {
    let dir = managed.dir().to_path_buf();
    let watch_error = |source| TlsError::Watch {
        path: dir.clone(),
        source,
    };

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove() {
                    tracing::info!("Certificate directory changed, reloading");
                    managed.reload();
                }
            }
            Err(e) => tracing::error!(error = %e, "Certificate watch error"),
        },
        Config::default().with_poll_interval(Duration::from_secs(2)),
    )
    .map_err(watch_error)?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(watch_error)?;

    tracing::info!(path = %dir.display(), "Certificate watcher started");
    Ok(watcher)
}
