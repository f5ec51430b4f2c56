//! PKI / security (spec §4.7): certificate chain validation, signature
//! verification over canonical-EXI fragments, and trust anchor management.
//!
//! Certificates are kept in a flat arena and referenced by index rather
//! than as a graph of owned, cross-referencing objects (spec §9 Design
//! Notes: "graph of certificates with mutual references -> arena of
//! certificates with integer indices; chains are short vectors of those
//! indices").

mod error;
mod trust_store;

pub use error::SecurityError;
pub use trust_store::{RootKind, TrustStore};

use std::time::SystemTime;

use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

/// Index into a [`CertificateArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CertIndex(pub usize);

/// Arena of parsed leaf-to-root certificate material. DER bytes are owned
/// here; every chain elsewhere in the session is just a short `Vec<CertIndex>`.
#[derive(Default)]
pub struct CertificateArena {
    der: Vec<Vec<u8>>,
}

impl CertificateArena {
    pub fn new() -> Self {
        CertificateArena::default()
    }

    /// Insert a DER certificate and return its stable index.
    pub fn insert(&mut self, der: Vec<u8>) -> CertIndex {
        self.der.push(der);
        CertIndex(self.der.len() - 1)
    }

    pub fn der(&self, idx: CertIndex) -> &[u8] {
        &self.der[idx.0]
    }

    fn parse(&self, idx: CertIndex) -> Result<X509Certificate<'_>, SecurityError> {
        let (_, cert) = X509Certificate::from_der(&self.der[idx.0])
            .map_err(|e| SecurityError::CertChainError(format!("malformed certificate: {e}")))?;
        Ok(cert)
    }
}

/// A leaf-first ordered chain of arena indices (spec §3 "CertificateChain").
#[derive(Debug, Clone)]
pub struct CertificateChain(pub Vec<CertIndex>);

impl CertificateChain {
    pub fn leaf(&self) -> Option<CertIndex> {
        self.0.first().copied()
    }
}

/// Validate `chain` against `trust_store` for `root_kind` at time `now`
/// (spec §3 CertificateChain invariant, §4.7, Invariant 5): each
/// non-root certificate must be signed by the next, within its validity
/// window, carrying the right key usage, and the root must match a local
/// trust anchor of the expected role.
pub fn validate_chain(
    arena: &CertificateArena,
    chain: &CertificateChain,
    trust_store: &TrustStore,
    root_kind: RootKind,
    now: SystemTime,
) -> Result<(), SecurityError> {
    if chain.0.is_empty() {
        return Err(SecurityError::CertChainError("empty certificate chain".into()));
    }

    for window in chain.0.windows(2) {
        let subject_idx = window[0];
        let issuer_idx = window[1];
        let subject = arena.parse(subject_idx)?;
        let issuer = arena.parse(issuer_idx)?;
        check_validity_window(&subject, now)?;
        check_key_usage(&issuer)?;
        verify_signed_by(&subject, &issuer)?;
    }

    // The last certificate in the chain must itself be within its
    // validity window and chain to a trust anchor of the expected role.
    let last_idx = *chain.0.last().expect("checked non-empty above");
    let last = arena.parse(last_idx)?;
    check_validity_window(&last, now)?;

    let last_der = arena.der(last_idx);
    if !trust_store.is_trusted_root(root_kind, last_der) {
        return Err(SecurityError::CertChainError(format!(
            "root certificate does not match a trusted {root_kind:?} anchor"
        )));
    }
    Ok(())
}

fn check_validity_window(cert: &X509Certificate<'_>, now: SystemTime) -> Result<(), SecurityError> {
    let validity = cert.validity();
    let now_secs = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_err(|e| SecurityError::CertChainError(format!("system clock before epoch: {e}")))?
        .as_secs() as i64;
    if now_secs < validity.not_before.timestamp() {
        return Err(SecurityError::CertificateExpired(
            "certificate not yet valid".into(),
        ));
    }
    if now_secs > validity.not_after.timestamp() {
        return Err(SecurityError::CertificateExpired(
            "certificate validity window has passed".into(),
        ));
    }
    Ok(())
}

/// Key-usage / extended-key-usage check (spec §4.7). A CA-capable
/// certificate must assert `keyCertSign`; leaf-only checks are left to the
/// caller since the extended-key-usage OIDs are role-specific and outside
/// what this generic arena tracks.
fn check_key_usage(issuer: &X509Certificate<'_>) -> Result<(), SecurityError> {
    match issuer.key_usage() {
        Ok(Some(ku)) if ku.value.key_cert_sign() => Ok(()),
        Ok(Some(_)) => Err(SecurityError::CertChainError(
            "issuer certificate lacks keyCertSign usage".into(),
        )),
        Ok(None) => Ok(()), // no extension present: treat as unconstrained (legacy certs)
        Err(e) => Err(SecurityError::CertChainError(format!(
            "malformed key usage extension: {e}"
        ))),
    }
}

/// Verify that `subject` is signed by `issuer`'s public key.
fn verify_signed_by(
    subject: &X509Certificate<'_>,
    issuer: &X509Certificate<'_>,
) -> Result<(), SecurityError> {
    let tbs = subject.tbs_certificate.as_ref();
    let sig = subject.signature_value.as_ref();
    let issuer_key = raw_public_key_bytes(issuer.public_key());
    let algorithm = select_verification_algorithm(&subject.signature_algorithm.algorithm.to_id_string())?;
    let public_key = ring::signature::UnparsedPublicKey::new(algorithm, issuer_key);
    public_key
        .verify(tbs, sig)
        .map_err(|_| SecurityError::SignatureError("certificate signature verification failed".into()))
}

fn select_verification_algorithm(
    oid: &str,
) -> Result<&'static dyn ring::signature::VerificationAlgorithm, SecurityError> {
    // ISO 15118 mandates ECDSA P-256/P-384 with SHA-256/384 for contract
    // and OEM certs; RSA is retained for legacy V2G root chains.
    match oid {
        "1.2.840.10045.4.3.2" => Ok(&ring::signature::ECDSA_P256_SHA256_ASN1),
        "1.2.840.10045.4.3.3" => Ok(&ring::signature::ECDSA_P384_SHA384_ASN1),
        "1.2.840.113549.1.1.11" => Ok(&ring::signature::RSA_PKCS1_2048_8192_SHA256),
        "1.2.840.113549.1.1.12" => Ok(&ring::signature::RSA_PKCS1_2048_8192_SHA384),
        other => Err(SecurityError::SignatureError(format!(
            "unsupported signature algorithm OID {other}"
        ))),
    }
}

/// The key material `ring` expects out of a parsed `SubjectPublicKeyInfo`:
/// the uncompressed EC point for ECDSA keys, or the PKCS#1 `RSAPublicKey`
/// DER for RSA keys -- in both cases that is exactly the BIT STRING payload
/// carried in the SPKI, not the SPKI structure itself (which also wraps the
/// algorithm identifier `ring` does not want to see).
fn raw_public_key_bytes(spki: &x509_parser::x509::SubjectPublicKeyInfo<'_>) -> &[u8] {
    spki.subject_public_key.data.as_ref()
}

/// Raw public-key bytes for the certificate at `idx`, for verifying a
/// detached signature issued by that certificate's key (spec §4.7
/// "Signature verification"). Same EC-point-or-PKCS#1 shape as
/// [`verify_signed_by`] feeds `ring`, not the full SPKI DER.
pub fn leaf_public_key_der(
    arena: &CertificateArena,
    idx: CertIndex,
) -> Result<Vec<u8>, SecurityError> {
    let cert = arena.parse(idx)?;
    Ok(raw_public_key_bytes(cert.public_key()).to_vec())
}

/// Verify a detached signature over a canonical-EXI hash of a message
/// fragment (spec §4.7 "Signature verification"). `canonical_fragment` is
/// the exact bytes [`crate::codec::exi`] produced for the signed portion
/// of the message -- the codec's determinism (Invariant 7) is what makes
/// this reproducible on the verifier's side.
pub fn verify_detached_signature(
    canonical_fragment: &[u8],
    signature: &[u8],
    signer_public_key_der: &[u8],
    oid: &str,
) -> Result<(), SecurityError> {
    let algorithm = select_verification_algorithm(oid)?;
    let public_key = ring::signature::UnparsedPublicKey::new(algorithm, signer_public_key_der);
    public_key
        .verify(canonical_fragment, signature)
        .map_err(|_| SecurityError::SignatureError("detached signature verification failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_chain_is_rejected() {
        let arena = CertificateArena::new();
        let chain = CertificateChain(vec![]);
        let store = TrustStore::new();
        let err = validate_chain(&arena, &chain, &store, RootKind::V2gRoot, SystemTime::now());
        assert!(matches!(err, Err(SecurityError::CertChainError(_))));
    }

    #[test]
    fn unknown_root_is_rejected_even_for_self_signed_der() {
        // A syntactically invalid "certificate" fails parsing before the
        // trust-anchor check is even reached; this asserts the arena
        // surfaces that as CertChainError rather than panicking.
        let mut arena = CertificateArena::new();
        let idx = arena.insert(vec![0u8; 4]);
        let chain = CertificateChain(vec![idx]);
        let store = TrustStore::new();
        let err = validate_chain(&arena, &chain, &store, RootKind::ContractRoot, SystemTime::now());
        assert!(err.is_err());
    }
}
