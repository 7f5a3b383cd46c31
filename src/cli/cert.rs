use anyhow::Result;
use std::path::Path;

use crate::tls;

/// Generate self-signed TLS certificate
pub fn generate_certificate(
    cert_out: &Path,
    key_out: &Path,
    common_name: &str,
    alt_names: &[String],
) -> Result<()> {
    tls::generate_self_signed_cert(common_name, alt_names, cert_out, key_out)?;

    println!("Generated self-signed certificate: {}", cert_out.display());
    println!("Generated private key: {}", key_out.display());

    Ok(())
}
