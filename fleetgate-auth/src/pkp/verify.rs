use std::collections::BTreeSet;

use x509_parser::prelude::X509Certificate;

use super::{HashAlgorithm, Pin, PinError};
use crate::cert;

/// Reasons a presented chain is not trusted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TrustError {
    #[error("peer presented an empty certificate chain")]
    EmptyChain,

    #[error("no trust anchors configured")]
    NoAnchors,

    #[error("unsupported pin algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid trust anchor: {0}")]
    InvalidAnchor(PinError),

    #[error("certificate {index} in chain is malformed")]
    Malformed { index: usize },

    #[error("no certificate in chain matches a trusted pin")]
    NoMatch,

    #[error("certificate {index} is not signed by certificate {}", index + 1)]
    BrokenChain { index: usize },
}

/// The set of pins an agent is willing to trust for one gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustAnchors {
    pins: Vec<Pin>,
}

impl TrustAnchors {
    #[must_use]
    pub fn new(pins: Vec<Pin>) -> Self {
        Self { pins }
    }

    /// Parse pin strings, failing on the first bad one.
    pub fn parse<I, S>(pins: I) -> Result<Self, TrustError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pins = pins
            .into_iter()
            .map(|s| {
                Pin::parse(s.as_ref()).map_err(|e| match e {
                    PinError::UnsupportedAlgorithm(alg) => TrustError::UnsupportedAlgorithm(alg),
                    other => TrustError::InvalidAnchor(other),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { pins })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    #[must_use]
    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    /// Distinct algorithms present among the anchors.
    fn algorithms(&self) -> BTreeSet<HashAlgorithm> {
        self.pins.iter().map(Pin::algorithm).collect()
    }

    fn contains(&self, pin: &Pin) -> bool {
        // No short-circuit: every anchor is compared
        self.pins.iter().fold(false, |found, anchor| found | (anchor == pin))
    }
}

/// Where in the chain the trusted key was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinMatch {
    /// 0 is the leaf.
    pub index: usize,
    pub pin: Pin,
}

/// Check a peer chain (leaf first) against a set of pins.
///
/// Each certificate's SubjectPublicKeyInfo is hashed with every algorithm
/// that appears in `anchors`; the first certificate producing a known pin
/// wins. If that certificate is not the leaf, each certificate below it must
/// carry a valid signature from the one above it.
///
/// # Errors
///
/// See [`TrustError`]. There is no lenient mode.
pub fn verify_chain<C: AsRef<[u8]>>(
    chain: &[C],
    anchors: &TrustAnchors,
) -> Result<PinMatch, TrustError> {
    if chain.is_empty() {
        return Err(TrustError::EmptyChain);
    }
    if anchors.is_empty() {
        return Err(TrustError::NoAnchors);
    }

    let parsed = chain
        .iter()
        .enumerate()
        .map(|(index, der)| cert::parse(der.as_ref()).map_err(|_| TrustError::Malformed { index }))
        .collect::<Result<Vec<_>, _>>()?;

    let algorithms = anchors.algorithms();
    for (index, certificate) in parsed.iter().enumerate() {
        let spki = certificate.public_key().raw;
        for algorithm in &algorithms {
            let pin = Pin::for_spki(*algorithm, spki);
            if anchors.contains(&pin) {
                verify_links(&parsed[..=index])?;
                return Ok(PinMatch { index, pin });
            }
        }
    }

    Err(TrustError::NoMatch)
}

/// Boolean form of [`verify_chain`].
#[must_use]
pub fn verify<C: AsRef<[u8]>>(chain: &[C], anchors: &TrustAnchors) -> bool {
    verify_chain(chain, anchors).is_ok()
}

fn verify_links(certs: &[X509Certificate<'_>]) -> Result<(), TrustError> {
    for (index, pair) in certs.windows(2).enumerate() {
        pair[0]
            .verify_signature(Some(pair[1].public_key()))
            .map_err(|_| TrustError::BrokenChain { index })?;
    }
    Ok(())
}
