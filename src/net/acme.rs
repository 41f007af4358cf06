//! Automatic certificate issuance over ACME.
//!
//! # Responsibilities
//! - Register an ACME account once and reuse it from the cache directory
//! - Issue certificates for allow-listed hosts that have none or expire soon
//! - Publish TLS-ALPN-01 challenge certificates through `ManagedCerts`
//!
//! # Design Decisions
//! - TLS-ALPN-01 only: validation reaches the proxy on its own TLS port
//! - One order per host, so a failing host never blocks the others
//! - Issued files are written atomically with owner-only permissions; the
//!   directory watcher and an explicit reload both pick them up

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, LetsEncrypt,
    NewAccount, NewOrder, Order, OrderStatus,
};
use rcgen::{CertificateParams, CustomExtension, DistinguishedName, KeyPair};
use rustls::sign::CertifiedKey;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use super::tls::{load_certified_key, ManagedCerts, TlsError};

/// ALPN protocol id of TLS-ALPN-01 validation handshakes (RFC 8737).
pub const ACME_TLS_ALPN: &[u8] = b"acme-tls/1";

const ACCOUNT_FILE: &str = "acme_account.json";

/// Renew this long before `notAfter`.
const RENEW_BEFORE_SECS: i64 = 30 * 24 * 60 * 60;
const CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);
const ORDER_TIMEOUT: Duration = Duration::from_secs(300);
const POLL_DELAY: Duration = Duration::from_secs(2);
const POLL_ATTEMPTS: u32 = 30;

#[derive(Debug, thiserror::Error)]
pub enum AcmeError {
    #[error("ACME request failed: {0}")]
    Acme(#[from] instant_acme::Error),
    #[error("invalid ACME account file {path}: {source}")]
    Account {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("certificate generation failed: {0}")]
    Rcgen(#[from] rcgen::Error),
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error("no TLS-ALPN-01 challenge offered for {0}")]
    NoChallenge(String),
    #[error("authorization for {host} is {status}")]
    Authorization { host: String, status: String },
    #[error("order for {0} became invalid")]
    OrderInvalid(String),
    #[error("order for {0} did not complete in time")]
    Timeout(String),
}

/// The ACME directory to use. Empty means Let's Encrypt production.
pub fn directory_url(configured: &str) -> String {
    if configured.is_empty() {
        LetsEncrypt::Production.url().to_string()
    } else {
        configured.to_string()
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Keeps the managed certificate directory populated and fresh.
pub struct Autocert {
    managed: Arc<ManagedCerts>,
    directory_url: String,
}

impl Autocert {
    pub fn new(managed: Arc<ManagedCerts>, directory: &str) -> Self {
        Self {
            managed,
            directory_url: directory_url(directory),
        }
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    /// Allowed hosts with no certificate, or one expiring within 30 days of `now`.
    pub fn due_hosts(&self, now: i64) -> Vec<String> {
        self.managed
            .hosts()
            .iter()
            .filter(|host| match self.managed.expires_at(host) {
                Some(not_after) => not_after.saturating_sub(now) < RENEW_BEFORE_SECS,
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Check immediately, then hourly, until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            directory = %self.directory_url,
            hosts = ?self.managed.hosts(),
            "ACME certificate manager started"
        );

        let mut ticker = tokio::time::interval(CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = self.renew_due() => {}
                        _ = shutdown.recv() => break,
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        tracing::info!("ACME certificate manager stopped");
    }

    async fn renew_due(&self) {
        let due = self.due_hosts(unix_now());
        if due.is_empty() {
            tracing::debug!("No certificates due for renewal");
            return;
        }

        let account = match self.account().await {
            Ok(account) => account,
            Err(e) => {
                tracing::error!(error = %e, "ACME account unavailable");
                return;
            }
        };

        for host in &due {
            match tokio::time::timeout(ORDER_TIMEOUT, self.issue(&account, host)).await {
                Ok(Ok(())) => tracing::info!(host = %host, "Certificate issued"),
                Ok(Err(e)) => {
                    tracing::warn!(host = %host, error = %e, "Certificate issuance failed")
                }
                Err(_) => tracing::warn!(host = %host, "Certificate issuance timed out"),
            }
            self.managed.clear_challenge(host);
        }

        self.managed.reload();
    }

    /// Load the cached account, registering a new one on first use.
    async fn account(&self) -> Result<Account, AcmeError> {
        let path = self.managed.dir().join(ACCOUNT_FILE);

        match std::fs::read(&path) {
            Ok(raw) => {
                let credentials: AccountCredentials = serde_json::from_slice(&raw)
                    .map_err(|source| AcmeError::Account {
                        path: path.clone(),
                        source,
                    })?;
                return Ok(Account::from_credentials(credentials).await?);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(AcmeError::Io { path, source }),
        }

        tracing::info!(directory = %self.directory_url, "Registering ACME account");
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await?;

        let raw = serde_json::to_vec(&credentials)
            .map_err(|source| AcmeError::Account { path, source })?;
        write_private(self.managed.dir(), ACCOUNT_FILE, &raw)?;
        Ok(account)
    }

    async fn issue(&self, account: &Account, host: &str) -> Result<(), AcmeError> {
        tracing::info!(host = %host, "Requesting certificate");

        let identifiers = [Identifier::Dns(host.to_string())];
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await?;

        for authz in order.authorizations().await? {
            match authz.status {
                AuthorizationStatus::Pending => {}
                AuthorizationStatus::Valid => continue,
                status => {
                    return Err(AcmeError::Authorization {
                        host: host.to_string(),
                        status: format!("{status:?}"),
                    })
                }
            }

            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::TlsAlpn01)
                .ok_or_else(|| AcmeError::NoChallenge(host.to_string()))?;

            let digest = order.key_authorization(challenge).digest();
            self.managed
                .set_challenge(host, challenge_cert(host, digest.as_ref())?);
            order.set_challenge_ready(&challenge.url).await?;
        }

        wait_for_ready(&mut order, host).await?;

        let key_pair = KeyPair::generate()?;
        let mut params = CertificateParams::new(vec![host.to_string()])?;
        params.distinguished_name = DistinguishedName::new();
        let csr = params.serialize_request(&key_pair)?;
        order.finalize(csr.der()).await?;

        let chain = download(&mut order, host).await?;
        let pem = format!("{}{}", key_pair.serialize_pem(), chain);

        // Refuse to cache anything the store could not serve.
        load_certified_key(pem.as_bytes(), pem.as_bytes(), Path::new(host))?;
        write_private(self.managed.dir(), host, pem.as_bytes())
    }
}

async fn wait_for_ready(order: &mut Order, host: &str) -> Result<(), AcmeError> {
    for attempt in 1..=POLL_ATTEMPTS {
        tokio::time::sleep(POLL_DELAY).await;
        order.refresh().await?;

        match order.state().status {
            OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
            OrderStatus::Invalid => return Err(AcmeError::OrderInvalid(host.to_string())),
            OrderStatus::Pending | OrderStatus::Processing => {
                tracing::debug!(host = %host, attempt, "Waiting for validation");
            }
        }
    }
    Err(AcmeError::Timeout(host.to_string()))
}

async fn download(order: &mut Order, host: &str) -> Result<String, AcmeError> {
    for _ in 0..POLL_ATTEMPTS {
        if let Some(chain) = order.certificate().await? {
            return Ok(chain);
        }
        tokio::time::sleep(POLL_DELAY).await;
    }
    Err(AcmeError::Timeout(host.to_string()))
}

/// Self-signed certificate carrying the acmeIdentifier extension for `host`.
pub fn challenge_cert(host: &str, digest: &[u8]) -> Result<Arc<CertifiedKey>, AcmeError> {
    let mut params = CertificateParams::new(vec![host.to_string()])?;
    params.custom_extensions = vec![CustomExtension::new_acme_identifier(digest)];
    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    Ok(load_certified_key(
        cert.pem().as_bytes(),
        key_pair.serialize_pem().as_bytes(),
        Path::new(host),
    )?)
}

/// Write `dir/name` via a hidden temp file and rename, mode 0600 on Unix.
fn write_private(dir: &Path, name: &str, contents: &[u8]) -> Result<(), AcmeError> {
    let path = dir.join(name);
    let tmp = dir.join(format!(".{name}.tmp"));
    let io_error = |source| AcmeError::Io {
        path: path.clone(),
        source,
    };

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp).map_err(io_error)?;
    file.write_all(contents).map_err(io_error)?;
    file.sync_all().map_err(io_error)?;
    drop(file);

    std::fs::rename(&tmp, &path).map_err(io_error)
}
