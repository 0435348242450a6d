//! QVL — Quote Verification Library.
//!
//! Parses and cryptographically verifies Intel TDX (v4/v5) and SGX DCAP
//! attestation quotes: the ECDSA signature over the quote body, the
//! Quoting Enclave report binding, the PCK certificate chain up to a
//! caller-pinned Intel root, CRL checks, and a caller-supplied TCB policy
//! hook. This library does not fetch or embed Intel TCB info, trust
//! anchors, or CRLs — callers supply all of those.

pub mod byte_reader;
pub mod chain;
pub mod der;
pub mod error;
pub mod measurement;
pub mod parser;
pub mod quote;
pub mod sig_verify;
pub mod tcb;
pub mod verify;
pub mod x509;

pub use chain::{Crl, ChainStatus, ChainVerifyResult};
pub use error::{ChainError, ParseError, VerifyError};
pub use measurement::{Fmspc, Measurement32, Measurement48};
pub use parser::{
    encode_header, encode_sgx_body, encode_tdx_body_v4, parse_quote, parse_quote_base64,
    parse_quote_hex, parse_sgx, parse_tdx,
};
pub use quote::{CertificationData, ParsedQuote, PckCertChainPem, QuoteHeader, TeeType};
pub use tcb::TcbPolicy;
pub use verify::{verify_quote, VerifyConfig};
