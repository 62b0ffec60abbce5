//! TLS context setup: self-signed certificate generation and PEM loading,
//! mirroring the teacher's `cosmic-rdp-server::tls` almost exactly (minus
//! the RDP-specific `CredSSP` public-key extraction, which has no
//! counterpart in the display protocol).

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rcgen::{CertificateParams, KeyPair, SanType};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::{rustls, TlsAcceptor};

/// Generate a self-signed certificate for `bind_ip` and build an acceptor
/// from it. Used when the daemon has no `-C`/`-K` configured but TLS is
/// still desired for local testing.
pub fn generate_self_signed(bind_ip: IpAddr) -> Result<TlsAcceptor> {
    tracing::info!("generating self-signed TLS certificate");

    let key_pair = KeyPair::generate().context("failed to generate key pair")?;

    let mut san_names = vec!["localhost".to_string()];
    let ip_str = bind_ip.to_string();
    if !bind_ip.is_unspecified() && ip_str != "localhost" {
        san_names.push(ip_str);
    }

    let mut params =
        CertificateParams::new(san_names).context("failed to create certificate params")?;
    if !bind_ip.is_unspecified() {
        params.subject_alt_names.push(SanType::IpAddress(bind_ip));
    }
    params.distinguished_name.push(
        rcgen::DnType::CommonName,
        rcgen::DnValue::Utf8String("vdpd".to_string()),
    );

    let cert = params
        .self_signed(&key_pair)
        .context("failed to generate self-signed certificate")?;

    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    make_acceptor(vec![cert_der], key_der)
}

/// Load a certificate/key pair from PEM files and build an acceptor.
pub fn load_from_files(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    tracing::info!(?cert_path, ?key_path, "loading TLS certificate from files");

    let cert_pem = std::fs::read(cert_path)
        .with_context(|| format!("failed to read cert: {}", cert_path.display()))?;
    let key_pem = std::fs::read(key_path)
        .with_context(|| format!("failed to read key: {}", key_path.display()))?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to parse PEM certificates")?;
    if certs.is_empty() {
        anyhow::bail!("no certificates found in {}", cert_path.display());
    }

    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .context("failed to parse PEM private key")?
        .with_context(|| format!("no private key found in {}", key_path.display()))?;

    make_acceptor(certs, key)
}

fn make_acceptor(certs: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Result<TlsAcceptor> {
    let mut server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("bad certificate/key")?;

    // Only enable TLS key logging in debug builds (Wireshark analysis);
    // it leaks session keys and must never run in release.
    #[cfg(debug_assertions)]
    {
        server_config.key_log = Arc::new(rustls::KeyLogFile::new());
    }

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}
