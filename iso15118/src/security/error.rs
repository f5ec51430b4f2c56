//! Security error taxonomy (spec §4.7, §7).

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SecurityError {
    /// Certificate is outside its validity window.
    #[error("certificate expired: {0}")]
    CertificateExpired(String),

    /// Chain validation failed (signature-by-next, key usage, trust anchor).
    #[error("certificate chain error: {0}")]
    CertChainError(String),

    /// A detached or chain signature failed to verify.
    #[error("signature error: {0}")]
    SignatureError(String),

    /// The contract certificate appears in the local revocation set.
    #[error("certificate revoked: {0}")]
    Revoked(String),
}

impl SecurityError {
    /// The `FAILED_*` response code family this security error maps to
    /// (spec §7).
    pub fn response_code(&self) -> crate::message::ResponseCode {
        use crate::message::ResponseCode;
        match self {
            SecurityError::CertificateExpired(_) => ResponseCode::FailedCertificateExpired,
            SecurityError::CertChainError(_) | SecurityError::Revoked(_) => {
                ResponseCode::FailedCertChainError
            }
            SecurityError::SignatureError(_) => ResponseCode::FailedSignatureError,
        }
    }
}
