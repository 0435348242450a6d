use thiserror::Error;

/// Errors produced while parsing a quote's byte representation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("quote buffer truncated while reading '{field}'")]
    TruncatedField { field: &'static str },
    #[error("length prefix for '{field}' overflows the remaining buffer")]
    LengthOverflow { field: &'static str },
    #[error("unsupported quote version: {version}")]
    UnsupportedVersion { version: u16 },
    #[error("unsupported tee_type: {tee_type:#x}")]
    UnsupportedTeeType { tee_type: u32 },
    #[error("unsupported certification data type: {cert_data_type}")]
    UnsupportedCertDataType { cert_data_type: u16 },
    #[error("malformed PEM certificate bundle")]
    MalformedPemBundle,
    #[error("invalid base64/hex quote envelope")]
    InvalidEnvelope,
}

/// Errors produced while cryptographically verifying a parsed quote.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("quote body signature failed to verify")]
    BadQuoteSignature,
    #[error("QE report does not bind to the attestation public key: {reason}")]
    QeReportBindingMismatch { reason: String },
    #[error("QE report signature failed to verify")]
    BadQeReportSignature,
    #[error("measurement policy rejected the quote: {reason}")]
    PolicyRejected { reason: String },
    #[error("TCB policy hook rejected the quote (fmspc {fmspc_hex})")]
    TcbRejected { fmspc_hex: String },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Errors produced while verifying a PCK certificate chain.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain does not normalize into exactly [leaf, intermediate, root]")]
    MalformedChain,
    #[error("failed to parse certificate: {0}")]
    BadCertificate(String),
    #[error("certificate expired or not yet valid at evaluation time")]
    Expired,
    #[error("root certificate does not match any pinned trust anchor")]
    UntrustedRoot,
    #[error("certificate signature failed to verify")]
    BadSignature,
    #[error("certificate serial appears on a supplied CRL")]
    Revoked,
}
