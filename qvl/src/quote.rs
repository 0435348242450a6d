//! Strongly-typed quote header, body, and signature-block data model.
//!
//! Field layouts follow the common quote header (48 B), the SGX body
//! (384 B), and the TDX v4/v5 bodies, all little-endian.

use crate::{
    error::ParseError,
    measurement::{Measurement32, Measurement48},
};

pub const HEADER_LEN: usize = 48;
pub const SGX_BODY_LEN: usize = 384;
pub const TDX_V4_BODY_LEN: usize = 584;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TeeType {
    Sgx,
    Tdx,
}

impl TryFrom<u32> for TeeType {
    type Error = ParseError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x0000_0000 => Ok(TeeType::Sgx),
            0x0000_0081 => Ok(TeeType::Tdx),
            tee_type => Err(ParseError::UnsupportedTeeType { tee_type }),
        }
    }
}

/// The 48-byte header common to every SGX and TDX quote.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QuoteHeader {
    pub version: u16,
    pub attestation_key_type: u16,
    pub tee_type: TeeType,
    pub qe_svn: u16,
    pub pce_svn: u16,
    pub qe_vendor_id: [u8; 16],
    pub user_data: [u8; 20],
}

/// The 384-byte SGX quote body (and the shape of an SGX/QE `Report`).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SgxBody {
    pub cpu_svn: [u8; 16],
    pub misc_select: u32,
    pub attributes: [u8; 16],
    pub mr_enclave: Measurement32,
    pub mr_signer: Measurement32,
    pub isv_prod_id: u16,
    pub isv_svn: u16,
    pub report_data: [u8; 64],
}

/// The 584-byte TDX 1.0 (v4) quote body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TdxBodyV4 {
    pub tee_tcb_svn: [u8; 16],
    pub mr_seam: Measurement48,
    pub mr_seam_signer: Measurement48,
    pub seam_attributes: [u8; 8],
    pub td_attributes: [u8; 8],
    pub xfam: [u8; 8],
    pub mr_td: Measurement48,
    pub mr_config_id: Measurement48,
    pub mr_owner: Measurement48,
    pub mr_owner_config: Measurement48,
    pub rtmr0: Measurement48,
    pub rtmr1: Measurement48,
    pub rtmr2: Measurement48,
    pub rtmr3: Measurement48,
    pub report_data: [u8; 64],
}

/// The TDX 1.5 (v5) body: the v4 fields plus module-specific extensions,
/// preceded on the wire by a `(type, size)` descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TdxBodyV5Inner {
    pub v4: TdxBodyV4,
    pub tee_tcb_svn_2: [u8; 16],
    pub mr_service_td: Measurement48,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TdQuoteBody {
    V4(TdxBodyV4),
    V5 {
        td_quote_body_type: u16,
        size: u32,
        body: TdxBodyV5Inner,
    },
}

impl TdQuoteBody {
    pub fn v4(&self) -> &TdxBodyV4 {
        match self {
            TdQuoteBody::V4(v4) => v4,
            TdQuoteBody::V5 { body, .. } => &body.v4,
        }
    }

    pub fn report_data(&self) -> &[u8; 64] {
        &self.v4().report_data
    }

    pub fn mr_td(&self) -> &Measurement48 {
        &self.v4().mr_td
    }
}

/// A bundle of PEM certificates extracted from certification data type 5
/// (or nested inside `qe_auth_data` for the Azure vTPM carrier).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PckCertChainPem {
    pub certs: Vec<String>,
}

/// Certification data, keyed by the wire `cert_data_type` (1-7). Types 1-3
/// and 6-7 carry opaque bytes this library does not interpret further; type
/// 4 carries a single PCK leaf certificate; type 5 carries the full
/// leaf/intermediate/root PEM bundle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CertificationData {
    PckIdPpidPlainCpusvnPcesvn(Vec<u8>),
    PckIdPpidRsa2048CpusvnPcesvn(Vec<u8>),
    PckIdPpidRsa3072CpusvnPcesvn(Vec<u8>),
    PckLeafCert(Vec<u8>),
    PckCertChain(PckCertChainPem),
    QeReportCertificationData(Vec<u8>),
    PlatformManifest(Vec<u8>),
}

impl CertificationData {
    pub fn cert_data_type(&self) -> u16 {
        match self {
            CertificationData::PckIdPpidPlainCpusvnPcesvn(_) => 1,
            CertificationData::PckIdPpidRsa2048CpusvnPcesvn(_) => 2,
            CertificationData::PckIdPpidRsa3072CpusvnPcesvn(_) => 3,
            CertificationData::PckLeafCert(_) => 4,
            CertificationData::PckCertChain(_) => 5,
            CertificationData::QeReportCertificationData(_) => 6,
            CertificationData::PlatformManifest(_) => 7,
        }
    }

    /// The PEM certificate chain, if this variant (or an Azure vTPM nested
    /// bundle discovered inside `qe_auth_data`) carries one.
    pub fn pck_cert_chain(&self) -> Option<&PckCertChainPem> {
        match self {
            CertificationData::PckCertChain(chain) => Some(chain),
            _ => None,
        }
    }
}

/// The fixed- and variable-length signature block that follows the quote
/// body on the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignatureBlock {
    /// ECDSA-P256 signature (r ‖ s, 64 B) over `header ‖ body`.
    pub signature: [u8; 64],
    /// Uncompressed SEC1 P-256 public key with the leading `0x04` stripped.
    pub attestation_public_key: [u8; 64],
    /// The Quoting Enclave's own SGX-body-shaped report (384 B).
    pub qe_report: [u8; 384],
    /// ECDSA-P256 signature (r ‖ s, 64 B) by the PCK leaf over `qe_report`.
    pub qe_report_signature: [u8; 64],
    pub qe_auth_data: Vec<u8>,
    pub cert_data: CertificationData,
}

/// A fully parsed and type-checked quote.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParsedQuote {
    Sgx {
        header: QuoteHeader,
        body: SgxBody,
        sig: SignatureBlock,
    },
    Tdx {
        header: QuoteHeader,
        body: TdQuoteBody,
        sig: SignatureBlock,
    },
}

impl ParsedQuote {
    pub fn header(&self) -> &QuoteHeader {
        match self {
            ParsedQuote::Sgx { header, .. } => header,
            ParsedQuote::Tdx { header, .. } => header,
        }
    }

    pub fn signature_block(&self) -> &SignatureBlock {
        match self {
            ParsedQuote::Sgx { sig, .. } => sig,
            ParsedQuote::Tdx { sig, .. } => sig,
        }
    }

    /// The body's `report_data` field (64 B), which the tunnel handshake
    /// binds to the server's ephemeral key material.
    pub fn report_data(&self) -> &[u8; 64] {
        match self {
            ParsedQuote::Sgx { body, .. } => &body.report_data,
            ParsedQuote::Tdx { body, .. } => body.report_data(),
        }
    }

    /// The byte length of `header ‖ body`, i.e. the signed region, given
    /// this quote's concrete variant.
    pub fn signed_len(&self) -> usize {
        match self {
            ParsedQuote::Sgx { .. } => HEADER_LEN + SGX_BODY_LEN,
            ParsedQuote::Tdx { body, .. } => {
                HEADER_LEN
                    + match body {
                        TdQuoteBody::V4(_) => TDX_V4_BODY_LEN,
                        TdQuoteBody::V5 { size, .. } => {
                            // type (2) + size (4) descriptor precedes the body.
                            6 + *size as usize
                        }
                    }
            }
        }
    }
}
