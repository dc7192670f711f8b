//! Gateway certificate chain from persisted Ed25519 keys.
//!
//! The gateway presents `[leaf, ca]`. Both keys live on disk; certificates
//! are re-issued at every start, so the SPKI pins agents hold stay valid
//! across restarts and certificate renewals.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

use fleetgate_auth::cert::summarize;
use fleetgate_auth::identity::PrivateKey;
use fleetgate_auth::{CertSummary, Pin};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose, SanType,
};

const CA_KEY_FILE: &str = "ca_key.der";
const LEAF_KEY_FILE: &str = "gateway_key.der";

/// Parameters for certificate generation.
#[derive(Debug, Clone)]
pub struct CertParams {
    /// Subject common name of the leaf; the CA gets "<name> CA"
    pub common_name: String,
    pub validity_days: u32,
    pub san_dns: Vec<String>,
    pub san_ips: Vec<IpAddr>,
}

impl Default for CertParams {
    fn default() -> Self {
        Self {
            common_name: "fleetgate-gateway".to_string(),
            validity_days: 90,
            san_dns: vec!["localhost".to_string()],
            san_ips: vec![
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(Ipv6Addr::LOCALHOST),
            ],
        }
    }
}

/// One certificate of the chain, described for operators.
#[derive(Debug, Clone)]
pub struct ChainEntry {
    pub summary: CertSummary,
    /// One pin per supported hash algorithm.
    pub pins: Vec<Pin>,
}

/// The gateway's TLS identity: chain plus leaf key.
#[derive(Clone)]
pub struct GatewayIdentity {
    /// DER certificates, leaf first.
    pub chain: Vec<Vec<u8>>,
    /// Leaf private key in PKCS#8 DER format
    pub key_der: Vec<u8>,
    entries: Vec<ChainEntry>,
}

impl std::fmt::Debug for GatewayIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayIdentity")
            .field("chain_len", &self.chain.len())
            .field("pins", &self.pinned_keys())
            .finish()
    }
}

impl GatewayIdentity {
    /// Issue a fresh CA and leaf certificate from the given keys.
    pub fn generate(
        ca_key: &PrivateKey,
        leaf_key: &PrivateKey,
        params: &CertParams,
    ) -> Result<Self, CertError> {
        let ca_pair = key_pair(ca_key)?;
        let leaf_pkcs8 = leaf_key.to_pkcs8_der();
        let leaf_pair = KeyPair::try_from(leaf_pkcs8.as_bytes())
            .map_err(|e| CertError::KeyPair(e.to_string()))?;

        let not_before = time::OffsetDateTime::now_utc() - time::Duration::minutes(5);
        let not_after = not_before + time::Duration::days(i64::from(params.validity_days));

        let mut ca_params = CertificateParams::default();
        ca_params
            .distinguished_name
            .push(DnType::CommonName, format!("{} CA", params.common_name));
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        ca_params.not_before = not_before;
        ca_params.not_after = not_after;
        let ca_cert = ca_params
            .self_signed(&ca_pair)
            .map_err(|e| CertError::Generation(e.to_string()))?;

        let mut leaf_params = CertificateParams::default();
        leaf_params
            .distinguished_name
            .push(DnType::CommonName, &params.common_name);
        leaf_params.not_before = not_before;
        leaf_params.not_after = not_after;
        for dns in &params.san_dns {
            // rcgen requires Ia5String for DNS names
            if let Ok(san) = dns.clone().try_into() {
                leaf_params.subject_alt_names.push(SanType::DnsName(san));
            }
        }
        for ip in &params.san_ips {
            leaf_params.subject_alt_names.push(SanType::IpAddress(*ip));
        }
        let leaf_cert = leaf_params
            .signed_by(&leaf_pair, &ca_cert, &ca_pair)
            .map_err(|e| CertError::Generation(e.to_string()))?;

        let chain = vec![leaf_cert.der().to_vec(), ca_cert.der().to_vec()];
        let entries = chain
            .iter()
            .map(|der| {
                Ok(ChainEntry {
                    summary: summarize(der)?,
                    pins: Pin::all_for_certificate(der)?,
                })
            })
            .collect::<Result<Vec<_>, fleetgate_auth::CertError>>()?;

        Ok(Self {
            chain,
            key_der: leaf_pkcs8.to_vec(),
            entries,
        })
    }

    /// Load the CA and leaf keys from `dir` (creating them on first run) and
    /// issue the chain.
    pub fn load_or_create(dir: &Path, params: &CertParams) -> Result<Self, CertError> {
        std::fs::create_dir_all(dir)?;
        let ca_key = load_or_create_key(&dir.join(CA_KEY_FILE))?;
        let leaf_key = load_or_create_key(&dir.join(LEAF_KEY_FILE))?;
        Self::generate(&ca_key, &leaf_key, params)
    }

    pub fn leaf_der(&self) -> &[u8] {
        &self.chain[0]
    }

    /// Chain description for `CertsInfo`.
    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }

    /// Every pin of every certificate, leaf first. Agents accept any of them.
    pub fn pinned_keys(&self) -> Vec<Pin> {
        self.entries
            .iter()
            .flat_map(|entry| entry.pins.iter().cloned())
            .collect()
    }
}

fn key_pair(key: &PrivateKey) -> Result<KeyPair, CertError> {
    KeyPair::try_from(key.to_pkcs8_der().as_bytes()).map_err(|e| CertError::KeyPair(e.to_string()))
}

fn load_or_create_key(path: &Path) -> Result<PrivateKey, CertError> {
    if path.exists() {
        let key_bytes = std::fs::read(path)?;
        return Ok(PrivateKey::from_pkcs8_der(&key_bytes)?);
    }

    let key = PrivateKey::generate();
    std::fs::write(path, key.to_pkcs8_der().as_bytes())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    tracing::info!(path = %path.display(), "Generated new gateway key");
    Ok(key)
}

/// Errors that can occur during certificate operations.
#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("failed to create key pair: {0}")]
    KeyPair(String),
    #[error("failed to generate certificate: {0}")]
    Generation(String),
    #[error("generated certificate unreadable: {0}")]
    Inspect(#[from] fleetgate_auth::CertError),
    #[error("invalid stored key: {0}")]
    StoredKey(#[from] fleetgate_auth::KeyError),
    #[error("key file error: {0}")]
    Io(#[from] std::io::Error),
}
