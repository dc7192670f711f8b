use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::cert::{self, CertError};

/// Length of every supported digest.
pub const DIGEST_LEN: usize = 32;

/// Errors that can occur while parsing a pin.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PinError {
    /// The string has no `alg:` prefix.
    #[error("pin must have the form <algorithm>:<digest>")]
    MissingAlgorithm,

    /// The algorithm name is not one we can compute.
    #[error("unsupported pin algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The digest is not base64 of the expected length.
    #[error("invalid pin digest")]
    InvalidDigest,
}

/// Digest algorithms a pin may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashAlgorithm {
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    /// Every algorithm, in the order the gateway advertises them.
    pub const ALL: [HashAlgorithm; 2] = [HashAlgorithm::Sha256, HashAlgorithm::Blake3];

    /// Wire name used in pin strings.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "b3-256",
        }
    }

    #[must_use]
    pub fn digest(self, data: &[u8]) -> [u8; DIGEST_LEN] {
        match self {
            Self::Sha256 => Sha256::digest(data).into(),
            Self::Blake3 => *blake3::hash(data).as_bytes(),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = PinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "b3-256" | "blake3" => Ok(Self::Blake3),
            _ => Err(PinError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A digest of one certificate's public key.
///
/// Hash is derived despite the manual constant-time `PartialEq`: pins are
/// public values, only the comparison needs to avoid leaking timing.
#[derive(Clone, Hash)]
#[allow(clippy::derived_hash_with_manual_eq)]
pub struct Pin {
    algorithm: HashAlgorithm,
    digest: [u8; DIGEST_LEN],
}

impl Pin {
    /// Pin the given DER SubjectPublicKeyInfo.
    #[must_use]
    pub fn for_spki(algorithm: HashAlgorithm, spki_der: &[u8]) -> Self {
        Self {
            algorithm,
            digest: algorithm.digest(spki_der),
        }
    }

    /// Pin the public key of a DER certificate.
    pub fn for_certificate(algorithm: HashAlgorithm, cert_der: &[u8]) -> Result<Self, CertError> {
        let spki = cert::subject_public_key_info(cert_der)?;
        Ok(Self::for_spki(algorithm, &spki))
    }

    /// Every pin of a certificate, one per supported algorithm.
    pub fn all_for_certificate(cert_der: &[u8]) -> Result<Vec<Self>, CertError> {
        let spki = cert::subject_public_key_info(cert_der)?;
        Ok(HashAlgorithm::ALL
            .iter()
            .map(|alg| Self::for_spki(*alg, &spki))
            .collect())
    }

    /// Parse `{algorithm}:{base64url}`.
    pub fn parse(s: &str) -> Result<Self, PinError> {
        let (alg, encoded) = s.trim().split_once(':').ok_or(PinError::MissingAlgorithm)?;
        let algorithm = alg.parse::<HashAlgorithm>()?;

        let decoded = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| PinError::InvalidDigest)?;
        let digest: [u8; DIGEST_LEN] = decoded.try_into().map_err(|_| PinError::InvalidDigest)?;

        Ok(Self { algorithm, digest })
    }

    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }
}

impl PartialEq for Pin {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm && bool::from(self.digest.ct_eq(&other.digest))
    }
}

impl Eq for Pin {}

impl FromStr for Pin {
    type Err = PinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, URL_SAFE_NO_PAD.encode(self.digest))
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pin({})", self)
    }
}

impl Serialize for Pin {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Pin {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
