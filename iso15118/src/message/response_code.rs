//! Response codes (spec §4.6).

/// `ResponseCode` values a SECC response carries. Any `FAILED_*` value
/// obliges the EVCC to terminate the session (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Ok,
    OkNewSessionEstablished,
    OkCertificateExpiresSoon,
    FailedSequenceError,
    FailedUnknownSession,
    FailedCertificateExpired,
    FailedCertChainError,
    FailedSignatureError,
    FailedServiceSelectionInvalid,
    FailedNoEnergyTransferServiceSelected,
}

impl ResponseCode {
    /// `true` for every `OK_*` variant.
    pub const fn is_ok(self) -> bool {
        matches!(
            self,
            ResponseCode::Ok
                | ResponseCode::OkNewSessionEstablished
                | ResponseCode::OkCertificateExpiresSoon
        )
    }

    /// `true` for every `FAILED_*` variant.
    pub const fn is_failure(self) -> bool {
        !self.is_ok()
    }
}
