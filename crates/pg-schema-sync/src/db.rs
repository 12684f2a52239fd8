//! Database connection handling.
//!
//! A [`Db`] wraps a deadpool connection pool built from a connection
//! string. Connections are scoped: callers acquire a client for one
//! inspection or one sync batch-loop invocation and the pool reclaims it on
//! drop, on every exit path including cancellation and error.
//!
//! Connection strings arrive already decrypted; credential handling is the
//! surrounding system's responsibility.

use std::str::FromStr;
use std::sync::Arc;

use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use rustls::ClientConfig;
use tokio_postgres::config::SslMode;
use tokio_postgres::Config as PgConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

use crate::error::{Result, SyncError};

/// A pooled database handle.
#[derive(Clone)]
pub struct Db {
    pool: Pool,
    label: String,
}

impl Db {
    /// Build a pool from a connection string (URL or key/value form).
    pub async fn connect(conn_str: &str, max_conns: usize) -> Result<Self> {
        let pg_config = PgConfig::from_str(conn_str)
            .map_err(|e| SyncError::Config(format!("invalid connection string: {}", e)))?;

        let host = match pg_config.get_hosts().first() {
            Some(tokio_postgres::config::Host::Tcp(h)) => h.clone(),
            _ => "localhost".to_string(),
        };
        let label = format!("{}/{}", host, pg_config.get_dbname().unwrap_or("?"));

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let pool = match pg_config.get_ssl_mode() {
            SslMode::Disable => {
                warn!("TLS is disabled for {}. Credentials travel in plaintext.", label);
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns)
                    .build()
                    .map_err(|e| SyncError::pool(e, "creating connection pool"))?
            }
            SslMode::Prefer | SslMode::Require => {
                warn!(
                    "sslmode=require for {}: TLS enabled but the server certificate is not verified.",
                    label
                );
                let tls = MakeRustlsConnect::new(unverified_tls_config());
                let mgr = Manager::from_config(pg_config, tls, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns)
                    .build()
                    .map_err(|e| SyncError::pool(e, "creating connection pool"))?
            }
            _ => {
                let tls = MakeRustlsConnect::new(verified_tls_config());
                let mgr = Manager::from_config(pg_config, tls, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns)
                    .build()
                    .map_err(|e| SyncError::pool(e, "creating connection pool"))?
            }
        };

        let db = Self { pool, label };

        // Test connection
        let client = db.client("testing connection").await?;
        client.simple_query("SELECT 1").await?;
        info!("Connected to {}", db.label);

        Ok(db)
    }

    /// Acquire a client from the pool.
    ///
    /// The returned object releases back to the pool on drop, so holding it
    /// only for the duration of one operation gives the scoped acquisition
    /// the engine requires.
    pub async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, context.to_string()))
    }

    /// Host/database label for logging.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Close the pool.
    pub fn close(&self) {
        self.pool.close();
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").field("label", &self.label).finish()
    }
}

fn verified_tls_config() -> ClientConfig {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

fn unverified_tls_config() -> ClientConfig {
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_no_client_auth()
}

/// Certificate verifier that accepts any certificate.
///
/// Used only for `sslmode=require`, matching libpq semantics: the channel is
/// encrypted but the server identity is not checked. Use `verify-full` for
/// untrusted networks.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
