//! rustls 配置：入站终结用的服务端配置、出站发起用的客户端配置，以及自签名证书。

use anyhow::{bail, Context, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

fn open_pem(path: &Path, what: &str) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("Failed to open {} {}", what, path.display()))?;
    Ok(BufReader::new(file))
}

/// PEM 文件里的全部证书，没有证书时报错
fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut open_pem(path, "certificate")?)
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Malformed certificate in {}", path.display()))?;
    if certs.is_empty() {
        bail!("No certificate in {}", path.display());
    }
    Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open_pem(path, "private key")?)
        .with_context(|| format!("Malformed private key in {}", path.display()))?
        .with_context(|| format!("No private key in {}", path.display()))
}

/// 入站 TLS 终结
pub fn load_server_config(cert: &Path, key: &Path) -> Result<Arc<ServerConfig>> {
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(read_certs(cert)?, read_key(key)?)
        .context("Certificate does not match private key")?;
    Ok(Arc::new(config))
}

/// 信任根：指定 CA 时只信任它，否则用系统证书库
fn trust_roots(ca: Option<&Path>) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    match ca {
        Some(path) => {
            for cert in read_certs(path)? {
                roots.add(cert).context("Invalid CA certificate")?;
            }
        }
        None => {
            let native = rustls_native_certs::load_native_certs();
            for e in &native.errors {
                debug!("native root store: {}", e);
            }
            let (added, ignored) = roots.add_parsable_certificates(native.certs);
            debug!("native root store: {} added, {} ignored", added, ignored);
        }
    }
    Ok(roots)
}

/// 出站 TLS 发起；`skip_verify` 时不校验对端证书链和主机名
pub fn load_client_config(ca: Option<&Path>, skip_verify: bool) -> Result<Arc<ClientConfig>> {
    let config = if skip_verify {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new()))
            .with_no_client_auth()
    } else {
        ClientConfig::builder()
            .with_root_certificates(trust_roots(ca)?)
            .with_no_client_auth()
    };
    Ok(Arc::new(config))
}

/// 证书的 SAN 列表，总是包含 CN
fn subject_names(common_name: &str, alt_names: &[String]) -> Vec<String> {
    let mut names = alt_names.to_vec();
    if !names.iter().any(|n| n == common_name) {
        names.insert(0, common_name.to_string());
    }
    names
}

/// 生成自签名证书，PEM 格式写入 `cert_out`/`key_out`
pub fn generate_self_signed_cert(
    common_name: &str,
    alt_names: &[String],
    cert_out: &Path,
    key_out: &Path,
) -> Result<()> {
    let generated = rcgen::generate_simple_self_signed(subject_names(common_name, alt_names))
        .context("Failed to generate self-signed certificate")?;

    std::fs::write(cert_out, generated.cert.pem())
        .with_context(|| format!("Failed to write {}", cert_out.display()))?;
    std::fs::write(key_out, generated.signing_key.serialize_pem())
        .with_context(|| format!("Failed to write {}", key_out.display()))?;
    Ok(())
}

/// 接受任何服务端证书，但握手签名仍然按加密库校验
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl AcceptAnyServerCert {
    fn new() -> Self {
        let provider = CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));
        Self { provider }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
