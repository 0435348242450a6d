//! Cryptographic verification of a parsed quote's three signature checks:
//! the body signature, the QE-report binding, and the QE-report signature.
//!
//! Grounded in the same three-step check `lexe-tls`'s `SgxQuoteVerifier`
//! performs, generalized to also cover TDX quotes and both ECDSA encodings.

use num_bigint::BigUint;

use crate::{error::VerifyError, quote::ParsedQuote};

/// Converts a fixed `r ‖ s` ECDSA signature into ASN.1 DER, the form
/// `ring`'s `ECDSA_P256_SHA256_ASN1` verifier expects.
///
/// See [RFC 3279 §2.2.3](https://datatracker.ietf.org/doc/html/rfc3279#section-2.2.3):
/// `Ecdsa-Sig-Value ::= SEQUENCE { r INTEGER, s INTEGER }`.
pub fn p1363_to_der(sig: &[u8]) -> Result<Vec<u8>, VerifyError> {
    if sig.len() % 2 != 0 {
        return Err(VerifyError::BadQeReportSignature);
    }
    let (r_bytes, s_bytes) = sig.split_at(sig.len() / 2);
    let r = BigUint::from_bytes_be(r_bytes);
    let s = BigUint::from_bytes_be(s_bytes);

    Ok(yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_biguint(&r);
            writer.next().write_biguint(&s);
        })
    }))
}

fn read_p1363_pubkey(bytes: &[u8]) -> Result<ring::signature::UnparsedPublicKey<[u8; 65]>, VerifyError> {
    if bytes.len() != 64 {
        return Err(VerifyError::BadQuoteSignature);
    }
    let mut uncompressed = [0u8; 65];
    uncompressed[0] = 0x04;
    uncompressed[1..].copy_from_slice(bytes);
    Ok(ring::signature::UnparsedPublicKey::new(
        &ring::signature::ECDSA_P256_SHA256_FIXED,
        uncompressed,
    ))
}

/// Verifies the ECDSA-P256 signature over `header ‖ body` using the quote's
/// embedded attestation public key.
pub fn verify_body_signature(quote: &ParsedQuote, raw_quote: &[u8]) -> Result<(), VerifyError> {
    let signed_len = quote.signed_len();
    if raw_quote.len() < signed_len {
        return Err(VerifyError::BadQuoteSignature);
    }
    let signed_data = &raw_quote[..signed_len];

    let sig_block = quote.signature_block();
    let attestation_key = read_p1363_pubkey(&sig_block.attestation_public_key)?;

    attestation_key
        .verify(signed_data, &sig_block.signature)
        .map_err(|_| VerifyError::BadQuoteSignature)
}

/// Verifies that the QE report binds to the attestation public key:
/// `SHA256(attestation_pub ‖ qe_auth_data) == qe_report.report_data[0..32]`
/// and the trailing 32 bytes of `report_data` are zero.
pub fn verify_qe_binding(quote: &ParsedQuote) -> Result<(), VerifyError> {
    let sig_block = quote.signature_block();
    let expected = sha256::digest_many(&[
        &sig_block.attestation_public_key,
        &sig_block.qe_auth_data,
    ]);

    // `qe_report` is SGX-body shaped (384 B); `report_data` is its last 64 B.
    let qe_report_data = &sig_block.qe_report[384 - 64..];
    let (bound, trailing) = qe_report_data.split_at(32);

    if bound != expected.as_slice() {
        return Err(VerifyError::QeReportBindingMismatch {
            reason: format!(
                "expected {}, got {}",
                hex::display(expected.as_slice()),
                hex::display(bound),
            ),
        });
    }
    if trailing.iter().any(|&b| b != 0) {
        return Err(VerifyError::QeReportBindingMismatch {
            reason: "trailing 32 bytes of qe_report.report_data are non-zero".to_string(),
        });
    }
    Ok(())
}

/// Verifies that the PCK leaf certificate's public key signed the QE
/// report. The QE-report signature in the quote block is encoded as fixed
/// `r ‖ s`; the caller's PCK leaf key is a ring `UnparsedPublicKey` over the
/// SubjectPublicKeyInfo extracted from the X.509 certificate.
pub fn verify_qe_report_signature(
    quote: &ParsedQuote,
    pck_leaf_spki: &[u8],
) -> Result<(), VerifyError> {
    let sig_block = quote.signature_block();
    let der_sig = p1363_to_der(&sig_block.qe_report_signature)?;

    let key = ring::signature::UnparsedPublicKey::new(&ring::signature::ECDSA_P256_SHA256_ASN1, pck_leaf_spki);
    key.verify(&sig_block.qe_report, &der_sig)
        .map_err(|_| VerifyError::BadQeReportSignature)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn p1363_to_der_rejects_odd_length() {
        assert!(matches!(
            p1363_to_der(&[1, 2, 3]),
            Err(VerifyError::BadQeReportSignature)
        ));
    }

    #[test]
    fn p1363_to_der_produces_sequence() {
        let sig = [0x01u8; 64];
        let der = p1363_to_der(&sig).unwrap();
        assert_eq!(der[0], 0x30); // SEQUENCE tag
    }
}
