use crate::error::ProxyError;
use crate::Result;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, PKCS_ECDSA_P256_SHA256,
};
use std::fs;
use std::path::Path;
use time::{Duration, OffsetDateTime};
use tracing::info;

const CA_CERT_FILE: &str = "ca.pem";
const CA_KEY_FILE: &str = "ca.key";

/// Root CA the sidecar signs intercepted TLS connections with.
///
/// Stored as `ca.pem` / `ca.key` in the certificate store and generated on
/// first start. Clients that route HTTPS through the sidecar must trust `ca.pem`.
pub struct CertificateAuthority {
    ca_cert: Certificate,
}

impl CertificateAuthority {
    /// Load the CA from `ca_dir`, or generate one there.
    pub fn load_or_generate(ca_dir: &Path, validity_days: u32) -> Result<Self> {
        let cert_path = ca_dir.join(CA_CERT_FILE);
        let key_path = ca_dir.join(CA_KEY_FILE);

        if cert_path.exists() && key_path.exists() {
            let cert_pem = fs::read_to_string(&cert_path)?;
            let key_pem = fs::read_to_string(&key_path)?;
            info!(path = %cert_path.display(), "Loaded CA certificate");
            return Self::from_pem(&cert_pem, &key_pem);
        }

        fs::create_dir_all(ca_dir)?;
        let ca = Self::generate(validity_days)?;
        fs::write(&cert_path, ca.cert_pem()?)?;
        fs::write(&key_path, ca.ca_cert.serialize_private_key_pem())?;
        info!(path = %cert_path.display(), validity_days, "Generated CA certificate");
        Ok(ca)
    }

    /// Rebuild a CA from a stored certificate and key.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let key_pair = KeyPair::from_pem(key_pem)
            .map_err(|e| ProxyError::Certificate(format!("Failed to parse CA key: {}", e)))?;
        let params = CertificateParams::from_ca_cert_pem(cert_pem, key_pair)
            .map_err(|e| ProxyError::Certificate(format!("Failed to parse CA cert: {}", e)))?;
        let ca_cert = Certificate::from_params(params)
            .map_err(|e| ProxyError::Certificate(format!("Failed to rebuild CA cert: {}", e)))?;
        Ok(Self { ca_cert })
    }

    /// Generate a fresh in-memory CA.
    pub fn generate(validity_days: u32) -> Result<Self> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "Faultline Sidecar CA");
        dn.push(DnType::OrganizationName, "Faultline");
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

        let not_before = OffsetDateTime::now_utc() - Duration::days(1);
        params.not_before = not_before;
        params.not_after = not_before + Duration::days(i64::from(validity_days.max(1)));

        params.key_pair = Some(
            KeyPair::generate(&PKCS_ECDSA_P256_SHA256)
                .map_err(|e| ProxyError::Certificate(format!("Failed to generate CA key: {}", e)))?,
        );

        let ca_cert = Certificate::from_params(params)
            .map_err(|e| ProxyError::Certificate(format!("Failed to generate CA cert: {}", e)))?;
        Ok(Self { ca_cert })
    }

    pub fn cert_pem(&self) -> Result<String> {
        self.ca_cert
            .serialize_pem()
            .map_err(|e| ProxyError::Certificate(format!("Failed to serialize CA cert: {}", e)))
    }

    /// Certificate in DER, as hudsucker's rustls authority wants it.
    pub fn cert_der(&self) -> Result<Vec<u8>> {
        self.ca_cert
            .serialize_der()
            .map_err(|e| ProxyError::Certificate(format!("Failed to serialize CA cert DER: {}", e)))
    }

    pub fn key_der(&self) -> Vec<u8> {
        self.ca_cert.serialize_private_key_der()
    }
}
