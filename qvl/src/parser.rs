//! Decodes raw SGX/TDX quote bytes into the [`crate::quote`] data model.
//!
//! The header and bodies are parsed with `nom` combinators (the layouts are
//! dense, fixed-width, and little-endian, which is exactly what `nom`'s
//! `number::complete` parsers are built for); the signature block, whose
//! fields are a mix of fixed-width and length-prefixed, is decoded with the
//! bounds-checked [`crate::byte_reader::ByteReader`] instead.

use byte_array::ByteArray;
use nom::{
    bytes::complete::take,
    combinator::map,
    number::complete::{le_u16, le_u32},
    sequence::tuple,
    IResult,
};

use crate::{
    byte_reader::{ByteReader, ByteWriter},
    error::ParseError,
    measurement::{Measurement32, Measurement48},
    quote::{
        CertificationData, ParsedQuote, PckCertChainPem, QuoteHeader, SgxBody, SignatureBlock,
        TdQuoteBody, TdxBodyV4, TdxBodyV5Inner, TeeType,
    },
};

type NomResult<'a, T> = IResult<&'a [u8], T, nom::error::Error<&'a [u8]>>;

fn take_n<const N: usize>(input: &[u8]) -> NomResult<'_, [u8; N]> {
    map(take(N), |bytes: &[u8]| {
        bytes.try_into().expect("take(N) yields exactly N bytes")
    })(input)
}

fn measurement32(input: &[u8]) -> NomResult<'_, Measurement32> {
    map(take_n::<32>, Measurement32::new)(input)
}

fn measurement48(input: &[u8]) -> NomResult<'_, Measurement48> {
    map(take_n::<48>, Measurement48::new)(input)
}

fn to_parse_err(_: nom::Err<nom::error::Error<&[u8]>>, field: &'static str) -> ParseError {
    ParseError::TruncatedField { field }
}

/// Parses the 48-byte header common to SGX and TDX quotes.
pub fn parse_header(input: &[u8]) -> Result<(QuoteHeader, &[u8]), ParseError> {
    let (rest, (version, attestation_key_type, tee_type_raw, qe_svn, pce_svn, qe_vendor_id, user_data)) =
        tuple((
            le_u16,
            le_u16,
            le_u32,
            le_u16,
            le_u16,
            take_n::<16>,
            take_n::<20>,
        ))(input)
        .map_err(|e| to_parse_err(e, "quote_header"))?;

    let tee_type = TeeType::try_from(tee_type_raw)?;

    Ok((
        QuoteHeader {
            version,
            attestation_key_type,
            tee_type,
            qe_svn,
            pce_svn,
            qe_vendor_id,
            user_data,
        },
        rest,
    ))
}

fn parse_sgx_body(input: &[u8]) -> Result<(SgxBody, &[u8]), ParseError> {
    let (rest, (cpu_svn, misc_select, _reserved1, attributes, mr_enclave, _reserved2, mr_signer, _reserved3, isv_prod_id, isv_svn, _reserved4, report_data)) =
        tuple((
            take_n::<16>,
            le_u32,
            take_n::<28>,
            take_n::<16>,
            measurement32,
            take_n::<32>,
            measurement32,
            take_n::<96>,
            le_u16,
            le_u16,
            take_n::<60>,
            take_n::<64>,
        ))(input)
        .map_err(|e| to_parse_err(e, "sgx_body"))?;

    Ok((
        SgxBody {
            cpu_svn,
            misc_select,
            attributes,
            mr_enclave,
            mr_signer,
            isv_prod_id,
            isv_svn,
            report_data,
        },
        rest,
    ))
}

fn parse_tdx_body_v4(input: &[u8]) -> Result<(TdxBodyV4, &[u8]), ParseError> {
    let (
        rest,
        (
            tee_tcb_svn,
            mr_seam,
            mr_seam_signer,
            seam_attributes,
            td_attributes,
            xfam,
            mr_td,
            mr_config_id,
            mr_owner,
            mr_owner_config,
            rtmr0,
            rtmr1,
            rtmr2,
            rtmr3,
            report_data,
        ),
    ) = tuple((
        take_n::<16>,
        measurement48,
        measurement48,
        take_n::<8>,
        take_n::<8>,
        take_n::<8>,
        measurement48,
        measurement48,
        measurement48,
        measurement48,
        measurement48,
        measurement48,
        measurement48,
        measurement48,
        take_n::<64>,
    ))(input)
    .map_err(|e| to_parse_err(e, "tdx_body_v4"))?;

    Ok((
        TdxBodyV4 {
            tee_tcb_svn,
            mr_seam,
            mr_seam_signer,
            seam_attributes,
            td_attributes,
            xfam,
            mr_td,
            mr_config_id,
            mr_owner,
            mr_owner_config,
            rtmr0,
            rtmr1,
            rtmr2,
            rtmr3,
            report_data,
        },
        rest,
    ))
}

fn parse_tdx_body_v5_inner(input: &[u8]) -> Result<(TdxBodyV5Inner, &[u8]), ParseError> {
    let (input, v4) = parse_tdx_body_v4(input)?;
    let (rest, (tee_tcb_svn_2, mr_service_td)) = tuple((take_n::<16>, measurement48))(input)
        .map_err(|e| to_parse_err(e, "tdx_body_v5_inner"))?;

    Ok((
        TdxBodyV5Inner {
            v4,
            tee_tcb_svn_2,
            mr_service_td,
        },
        rest,
    ))
}

fn parse_tdx_body(version: u16, input: &[u8]) -> Result<(TdQuoteBody, &[u8]), ParseError> {
    match version {
        4 => {
            let (v4, rest) = parse_tdx_body_v4(input)?;
            Ok((TdQuoteBody::V4(v4), rest))
        }
        5 => {
            let (rest, (td_quote_body_type, size)) =
                tuple((le_u16, le_u32))(input).map_err(|e| to_parse_err(e, "tdx_v5_descriptor"))?;
            let (body, rest) = parse_tdx_body_v5_inner(rest)?;
            Ok((
                TdQuoteBody::V5 {
                    td_quote_body_type,
                    size,
                    body,
                },
                rest,
            ))
        }
        version => Err(ParseError::UnsupportedVersion { version }),
    }
}

/// Re-encodes a parsed header back to its original 48-byte wire form.
/// Used by the header/body round-trip testable property: parsing is lossy
/// only in taking `tee_type` from a raw `u32` to an enum, so re-encoding
/// must reproduce the exact input bytes.
pub fn encode_header(header: &QuoteHeader) -> Vec<u8> {
    let tee_type_raw: u32 = match header.tee_type {
        TeeType::Sgx => 0,
        TeeType::Tdx => 0x81,
    };
    ByteWriter::new()
        .write_u16_le(header.version)
        .write_u16_le(header.attestation_key_type)
        .write_u32_le(tee_type_raw)
        .write_u16_le(header.qe_svn)
        .write_u16_le(header.pce_svn)
        .write_bytes(&header.qe_vendor_id)
        .write_bytes(&header.user_data)
        .into_vec()
}

/// Re-encodes a parsed SGX body back to its original 384-byte wire form.
pub fn encode_sgx_body(body: &SgxBody) -> Vec<u8> {
    ByteWriter::new()
        .write_bytes(&body.cpu_svn)
        .write_u32_le(body.misc_select)
        .write_bytes(&[0u8; 28])
        .write_bytes(&body.attributes)
        .write_bytes(body.mr_enclave.as_slice())
        .write_bytes(&[0u8; 32])
        .write_bytes(body.mr_signer.as_slice())
        .write_bytes(&[0u8; 96])
        .write_u16_le(body.isv_prod_id)
        .write_u16_le(body.isv_svn)
        .write_bytes(&[0u8; 60])
        .write_bytes(&body.report_data)
        .into_vec()
}

/// Re-encodes a parsed TDX v4 body back to its original 584-byte wire form.
pub fn encode_tdx_body_v4(body: &TdxBodyV4) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_bytes(&body.tee_tcb_svn)
        .write_bytes(body.mr_seam.as_slice())
        .write_bytes(body.mr_seam_signer.as_slice())
        .write_bytes(&body.seam_attributes)
        .write_bytes(&body.td_attributes)
        .write_bytes(&body.xfam)
        .write_bytes(body.mr_td.as_slice())
        .write_bytes(body.mr_config_id.as_slice())
        .write_bytes(body.mr_owner.as_slice())
        .write_bytes(body.mr_owner_config.as_slice())
        .write_bytes(body.rtmr0.as_slice())
        .write_bytes(body.rtmr1.as_slice())
        .write_bytes(body.rtmr2.as_slice())
        .write_bytes(body.rtmr3.as_slice())
        .write_bytes(&body.report_data);
    w.into_vec()
}

/// Splits a PEM bundle on certificate boundaries, as Intel's DCAP
/// certification data type 5 (and the Azure vTPM nested bundle) encodes it.
pub fn split_pem_bundle(bundle: &[u8]) -> Result<PckCertChainPem, ParseError> {
    let text = std::str::from_utf8(bundle).map_err(|_| ParseError::MalformedPemBundle)?;
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    const END: &str = "-----END CERTIFICATE-----";

    let mut certs = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(BEGIN) {
        let after_begin = &rest[start..];
        let end = after_begin
            .find(END)
            .ok_or(ParseError::MalformedPemBundle)?
            + END.len();
        certs.push(after_begin[..end].trim().to_string());
        rest = &after_begin[end..];
    }

    if certs.is_empty() {
        return Err(ParseError::MalformedPemBundle);
    }

    Ok(PckCertChainPem { certs })
}

fn parse_certification_data(
    cert_data_type: u16,
    bytes: &[u8],
    qe_auth_data: &[u8],
) -> Result<CertificationData, ParseError> {
    match cert_data_type {
        1 => Ok(CertificationData::PckIdPpidPlainCpusvnPcesvn(bytes.to_vec())),
        2 => Ok(CertificationData::PckIdPpidRsa2048CpusvnPcesvn(bytes.to_vec())),
        3 => Ok(CertificationData::PckIdPpidRsa3072CpusvnPcesvn(bytes.to_vec())),
        4 => Ok(CertificationData::PckLeafCert(bytes.to_vec())),
        5 => Ok(CertificationData::PckCertChain(split_pem_bundle(bytes)?)),
        6 | 7 if bytes.is_empty() => {
            // Azure vTPM carrier: the PEM bundle is nested inside
            // `qe_auth_data` instead of `cert_data`.
            let chain = split_pem_bundle(qe_auth_data)?;
            Ok(CertificationData::PckCertChain(chain))
        }
        6 => Ok(CertificationData::QeReportCertificationData(bytes.to_vec())),
        7 => Ok(CertificationData::PlatformManifest(bytes.to_vec())),
        cert_data_type => Err(ParseError::UnsupportedCertDataType { cert_data_type }),
    }
}

fn parse_signature_block(input: &[u8]) -> Result<SignatureBlock, ParseError> {
    let mut r = ByteReader::new(input);
    // The quote body is followed by a `uint32` quote-signature-data length
    // before the signature block itself (Intel's `qe_cert_data_ie` header);
    // the value isn't needed here since every field past it is either
    // fixed-width or separately length-prefixed, but it must still be read
    // off the wire to keep the cursor aligned.
    let _signature_data_len = r.read_u32_le("signature_data_len")?;
    let signature = r.take_array::<64>("signature")?;
    let attestation_public_key = r.take_array::<64>("attestation_public_key")?;
    let qe_report = r.take_array::<384>("qe_report")?;
    let qe_report_signature = r.take_array::<64>("qe_report_signature")?;
    let qe_auth_data_len = r.read_u16_le("qe_auth_data_len")? as usize;
    let qe_auth_data = r.take(qe_auth_data_len, "qe_auth_data")?.to_vec();
    let cert_data_type = r.read_u16_le("cert_data_type")?;
    let cert_data_len = r.read_u32_le("cert_data_len")? as usize;
    let cert_data_bytes = r.take(cert_data_len, "cert_data")?;
    let cert_data =
        parse_certification_data(cert_data_type, cert_data_bytes, &qe_auth_data)?;

    Ok(SignatureBlock {
        signature,
        attestation_public_key,
        qe_report,
        qe_report_signature,
        qe_auth_data,
        cert_data,
    })
}

/// Parses an SGX DCAP quote.
pub fn parse_sgx(bytes: &[u8]) -> Result<ParsedQuote, ParseError> {
    let (header, rest) = parse_header(bytes)?;
    if header.tee_type != TeeType::Sgx {
        return Err(ParseError::UnsupportedTeeType {
            tee_type: if header.tee_type == TeeType::Tdx { 0x81 } else { u32::MAX },
        });
    }
    let (body, rest) = parse_sgx_body(rest)?;
    let sig = parse_signature_block(rest)?;
    Ok(ParsedQuote::Sgx { header, body, sig })
}

/// Parses a TDX v4 or v5 quote.
pub fn parse_tdx(bytes: &[u8]) -> Result<ParsedQuote, ParseError> {
    let (header, rest) = parse_header(bytes)?;
    if header.tee_type != TeeType::Tdx {
        return Err(ParseError::UnsupportedTeeType {
            tee_type: 0,
        });
    }
    let (body, rest) = parse_tdx_body(header.version, rest)?;
    let sig = parse_signature_block(rest)?;
    Ok(ParsedQuote::Tdx { header, body, sig })
}

/// Dispatches on `header.tee_type` to parse either an SGX or TDX quote.
pub fn parse_quote(bytes: &[u8]) -> Result<ParsedQuote, ParseError> {
    let (header, _) = parse_header(bytes)?;
    match header.tee_type {
        TeeType::Sgx => parse_sgx(bytes),
        TeeType::Tdx => parse_tdx(bytes),
    }
}

/// Decodes a base64-encoded quote envelope, then parses it.
pub fn parse_quote_base64(s: &str) -> Result<ParsedQuote, ParseError> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(s.trim())
        .map_err(|_| ParseError::InvalidEnvelope)?;
    parse_quote(&bytes)
}

/// Decodes a hex-encoded quote envelope, then parses it.
pub fn parse_quote_hex(s: &str) -> Result<ParsedQuote, ParseError> {
    let bytes = hex::decode(s.trim()).map_err(|_| ParseError::InvalidEnvelope)?;
    parse_quote(&bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_header_bytes(version: u16, tee_type: u32) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&version.to_le_bytes());
        b.extend_from_slice(&2u16.to_le_bytes()); // attestation_key_type
        b.extend_from_slice(&tee_type.to_le_bytes());
        b.extend_from_slice(&1u16.to_le_bytes()); // qe_svn
        b.extend_from_slice(&1u16.to_le_bytes()); // pce_svn
        b.extend_from_slice(&[0xAB; 16]); // qe_vendor_id
        b.extend_from_slice(&[0xCD; 20]); // user_data
        b
    }

    #[test]
    fn header_roundtrip() {
        let bytes = sample_header_bytes(4, 0x81);
        let (header, rest) = parse_header(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(header.version, 4);
        assert_eq!(header.tee_type, TeeType::Tdx);
        assert_eq!(header.qe_vendor_id, [0xAB; 16]);
        assert_eq!(header.user_data, [0xCD; 20]);

        // Re-encoding a parsed header must reproduce the exact input bytes
        // (spec.md §8's header/body round-trip property).
        assert_eq!(encode_header(&header), bytes);
    }

    fn sample_sgx_body_bytes() -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&[0x11; 16]); // cpu_svn
        b.extend_from_slice(&0x1234_5678u32.to_le_bytes()); // misc_select
        b.extend_from_slice(&[0u8; 28]); // reserved
        b.extend_from_slice(&[0x22; 16]); // attributes
        b.extend_from_slice(&[0x33; 32]); // mr_enclave
        b.extend_from_slice(&[0u8; 32]); // reserved
        b.extend_from_slice(&[0x44; 32]); // mr_signer
        b.extend_from_slice(&[0u8; 96]); // reserved
        b.extend_from_slice(&7u16.to_le_bytes()); // isv_prod_id
        b.extend_from_slice(&9u16.to_le_bytes()); // isv_svn
        b.extend_from_slice(&[0u8; 60]); // reserved
        b.extend_from_slice(&[0x55; 64]); // report_data
        b
    }

    #[test]
    fn sgx_body_roundtrip() {
        let bytes = sample_sgx_body_bytes();
        let (body, rest) = parse_sgx_body(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(encode_sgx_body(&body), bytes);
    }

    fn sample_tdx_v4_body_bytes() -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&[0x01; 16]); // tee_tcb_svn
        b.extend_from_slice(&[0x02; 48]); // mr_seam
        b.extend_from_slice(&[0x03; 48]); // mr_seam_signer
        b.extend_from_slice(&[0x04; 8]); // seam_attributes
        b.extend_from_slice(&[0x05; 8]); // td_attributes
        b.extend_from_slice(&[0x06; 8]); // xfam
        b.extend_from_slice(&[0x07; 48]); // mr_td
        b.extend_from_slice(&[0x08; 48]); // mr_config_id
        b.extend_from_slice(&[0x09; 48]); // mr_owner
        b.extend_from_slice(&[0x0a; 48]); // mr_owner_config
        b.extend_from_slice(&[0x0b; 48]); // rtmr0
        b.extend_from_slice(&[0x0c; 48]); // rtmr1
        b.extend_from_slice(&[0x0d; 48]); // rtmr2
        b.extend_from_slice(&[0x0e; 48]); // rtmr3
        b.extend_from_slice(&[0x0f; 64]); // report_data
        b
    }

    #[test]
    fn tdx_v4_body_roundtrip() {
        let bytes = sample_tdx_v4_body_bytes();
        let (body, rest) = parse_tdx_body_v4(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(encode_tdx_body_v4(&body), bytes);
    }

    #[test]
    fn header_roundtrip_is_lossless() {
        use proptest::prelude::*;

        proptest!(|(
            version: u16,
            is_tdx: bool,
            qe_svn: u16,
            pce_svn: u16,
            qe_vendor_id: [u8; 16],
            user_data: [u8; 20],
        )| {
            let bytes = sample_header_bytes(version, if is_tdx { 0x81 } else { 0 })
                .into_iter()
                .take(8)
                .chain(qe_svn.to_le_bytes())
                .chain(pce_svn.to_le_bytes())
                .chain(qe_vendor_id)
                .chain(user_data)
                .collect::<Vec<u8>>();
            let (header, rest) = parse_header(&bytes).unwrap();
            prop_assert!(rest.is_empty());
            prop_assert_eq!(encode_header(&header), bytes);
        });
    }

    #[test]
    fn header_rejects_unknown_tee_type() {
        let bytes = sample_header_bytes(4, 0xDEAD_BEEF);
        assert_eq!(
            parse_header(&bytes).unwrap_err(),
            ParseError::UnsupportedTeeType { tee_type: 0xDEAD_BEEF }
        );
    }

    #[test]
    fn split_pem_bundle_finds_three_certs() {
        let bundle = b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n\
             -----BEGIN CERTIFICATE-----\nBBBB\n-----END CERTIFICATE-----\n\
             -----BEGIN CERTIFICATE-----\nCCCC\n-----END CERTIFICATE-----\n";
        let chain = split_pem_bundle(bundle).unwrap();
        assert_eq!(chain.certs.len(), 3);
    }

    /// Builds a full signature block buffer in wire order, including the
    /// `uint32` quote-signature-data length dword that precedes the
    /// 64-byte signature (the field `parse_signature_block` must consume
    /// to stay aligned with the real cert-data fields that follow).
    fn sample_signature_block_bytes() -> Vec<u8> {
        let mut b = Vec::new();
        let signature = [0x01u8; 64];
        let attestation_public_key = [0x02u8; 64];
        let qe_report = [0x03u8; 384];
        let qe_report_signature = [0x04u8; 64];
        let qe_auth_data = b"auth";
        let cert_data = b"leaf-cert-bytes";

        let signature_data_len = (64 + 64 + 384 + 64
            + 2 + qe_auth_data.len()
            + 2 + 4 + cert_data.len()) as u32;
        b.extend_from_slice(&signature_data_len.to_le_bytes());
        b.extend_from_slice(&signature);
        b.extend_from_slice(&attestation_public_key);
        b.extend_from_slice(&qe_report);
        b.extend_from_slice(&qe_report_signature);
        b.extend_from_slice(&(qe_auth_data.len() as u16).to_le_bytes());
        b.extend_from_slice(qe_auth_data);
        b.extend_from_slice(&4u16.to_le_bytes()); // cert_data_type = 4 (PCK leaf cert)
        b.extend_from_slice(&(cert_data.len() as u32).to_le_bytes());
        b.extend_from_slice(cert_data);
        b
    }

    #[test]
    fn signature_block_skips_the_length_dword_before_signature() {
        let bytes = sample_signature_block_bytes();
        let sig = parse_signature_block(&bytes).unwrap();
        assert_eq!(sig.signature, [0x01u8; 64]);
        assert_eq!(sig.attestation_public_key, [0x02u8; 64]);
        assert_eq!(sig.qe_report, [0x03u8; 384]);
        assert_eq!(sig.qe_report_signature, [0x04u8; 64]);
        assert_eq!(sig.qe_auth_data, b"auth");
        assert_eq!(
            sig.cert_data,
            CertificationData::PckLeafCert(b"leaf-cert-bytes".to_vec())
        );
    }

    #[test]
    fn truncated_sgx_body_is_rejected() {
        let mut bytes = sample_header_bytes(3, 0);
        bytes.extend_from_slice(&[0u8; 10]); // body way too short
        assert!(parse_sgx(&bytes).is_err());
    }
}
