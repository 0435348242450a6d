//! PCK certificate chain verification: normalizes a leaf/intermediate/root
//! bundle, checks validity at a caller-supplied time, verifies each
//! signature link, pins the root, and consults caller-supplied CRLs.

use std::time::SystemTime;

use crate::{der, error::ChainError, quote::PckCertChainPem, x509};

/// The outcome of verifying a PCK chain, independent of whether the caller
/// treats it as fatal (policy and TCB checks happen above this layer).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChainStatus {
    Valid,
    Expired,
    UntrustedRoot,
    Revoked,
    BadSignature,
}

/// A chain verification result: status plus the normalized
/// `[leaf, intermediate, root]` DER certificates.
pub struct ChainVerifyResult {
    pub status: ChainStatus,
    pub chain_der: [Vec<u8>; 3],
}

/// A minimally-parsed CRL: just the revoked serial set, per `spec.md`
/// §4.3's "minimal ASN.1 shape" — the CRL's own issuer signature is not
/// independently verified here; only membership of the leaf/intermediate
/// serials is checked.
pub struct Crl {
    revoked_serials: Vec<Vec<u8>>,
}

impl Crl {
    /// Parses a DER-encoded `CertificateList` (RFC 5280 §5.1), extracting
    /// the `revokedCertificates` serial numbers.
    pub fn parse_der(bytes: &[u8]) -> Result<Self, ChainError> {
        let (cert_list, _) =
            der::read_tlv(bytes).map_err(|e| ChainError::BadCertificate(e.to_string()))?;
        let outer =
            der::sequence_items(cert_list.content).map_err(|e| ChainError::BadCertificate(e.to_string()))?;
        let tbs_cert_list = outer
            .first()
            .ok_or_else(|| ChainError::BadCertificate("empty CertificateList".to_string()))?;
        let fields = der::sequence_items(tbs_cert_list.content)
            .map_err(|e| ChainError::BadCertificate(e.to_string()))?;

        // TBSCertList ::= SEQUENCE {
        //   version              Version OPTIONAL (INTEGER),
        //   signature            AlgorithmIdentifier (SEQUENCE),
        //   issuer               Name (SEQUENCE),
        //   thisUpdate           Time (UTCTime | GeneralizedTime),
        //   nextUpdate           Time OPTIONAL,
        //   revokedCertificates  SEQUENCE OF SEQUENCE { ... } OPTIONAL,
        //   crlExtensions        [0] EXPLICIT Extensions OPTIONAL }
        //
        // The only field shape we care about is the first top-level
        // SEQUENCE after the fixed issuer/signature/time fields whose
        // *contents* look like `SEQUENCE OF SEQUENCE { INTEGER, ... }` —
        // walk every top-level SEQUENCE field and take whichever one
        // contains entries starting with an INTEGER. This tolerates the
        // optional `version` field being present or absent.
        let mut revoked_serials = Vec::new();
        for field in &fields {
            if field.tag != der::TAG_SEQUENCE {
                continue;
            }
            let Ok(entries) = der::sequence_items(field.content) else {
                continue;
            };
            let looks_like_revoked_list = entries.iter().all(|e| e.tag == der::TAG_SEQUENCE)
                && !entries.is_empty()
                && entries.iter().all(|e| {
                    der::sequence_items(e.content)
                        .map(|fs| fs.first().is_some_and(|f| f.tag == der::TAG_INTEGER))
                        .unwrap_or(false)
                });
            if !looks_like_revoked_list {
                continue;
            }
            for entry in entries {
                let Ok(entry_fields) = der::sequence_items(entry.content) else {
                    continue;
                };
                if let Some(serial) = entry_fields.first() {
                    revoked_serials.push(der::trim_integer_padding(serial.content).to_vec());
                }
            }
        }

        Ok(Self { revoked_serials })
    }

    /// True if `serial` (sign-trimmed big-endian bytes) appears on this CRL.
    pub fn contains_serial(&self, serial: &[u8]) -> bool {
        let trimmed = der::trim_integer_padding(serial);
        self.revoked_serials.iter().any(|s| s.as_slice() == trimmed)
    }
}

/// Normalizes a 3-certificate PEM bundle into leaf/intermediate/root by
/// matching subject Common Names, checks validity at `now`, verifies the
/// two signature links plus the root's self-signature, pins the root
/// against `pinned_roots` (skipped entirely if empty), and checks the
/// leaf/intermediate serials against every supplied CRL.
pub fn verify_chain(
    bundle: &PckCertChainPem,
    now: SystemTime,
    pinned_roots: &[sha256::Hash],
    crls: &[Crl],
) -> Result<ChainVerifyResult, ChainError> {
    let ders = x509::pem_bundle_to_der(&bundle.certs)?;
    if ders.len() != 3 {
        return Err(ChainError::MalformedChain);
    }
    let certs = ders
        .iter()
        .map(|d| x509::parse_der(d))
        .collect::<Result<Vec<_>, _>>()?;

    // The intermediate's subject CN ("Intel SGX PCK Platform/Processor CA")
    // also contains the substring "SGX PCK", so the leaf must be matched by
    // its more specific "SGX PCK Certificate" CN to avoid binding to the
    // intermediate when the bundle isn't already leaf-first.
    let leaf_idx = certs
        .iter()
        .position(|c| x509::subject_cn_contains(c, "SGX PCK Certificate"))
        .ok_or(ChainError::MalformedChain)?;
    let root_idx = certs
        .iter()
        .position(|c| x509::subject_cn_contains(c, "SGX Root CA"))
        .ok_or(ChainError::MalformedChain)?;
    let inter_idx = (0..3)
        .find(|i| *i != leaf_idx && *i != root_idx)
        .ok_or(ChainError::MalformedChain)?;
    if leaf_idx == root_idx {
        return Err(ChainError::MalformedChain);
    }

    let chain_der = [
        ders[leaf_idx].clone(),
        ders[inter_idx].clone(),
        ders[root_idx].clone(),
    ];
    let leaf = &certs[leaf_idx];
    let intermediate = &certs[inter_idx];
    let root = &certs[root_idx];

    for cert in [leaf, intermediate, root] {
        if !x509::is_valid_at(cert, now) {
            return Ok(ChainVerifyResult {
                status: ChainStatus::Expired,
                chain_der,
            });
        }
    }

    let leaf_ok = leaf.verify_signature(Some(intermediate.public_key())).is_ok();
    let inter_ok = intermediate.verify_signature(Some(root.public_key())).is_ok();
    let root_ok = root.verify_signature(Some(root.public_key())).is_ok();
    if !(leaf_ok && inter_ok && root_ok) {
        return Ok(ChainVerifyResult {
            status: ChainStatus::BadSignature,
            chain_der,
        });
    }

    if !pinned_roots.is_empty() {
        let root_fingerprint = x509::sha256_fingerprint(&chain_der[2]);
        if !pinned_roots.contains(&root_fingerprint) {
            return Ok(ChainVerifyResult {
                status: ChainStatus::UntrustedRoot,
                chain_der,
            });
        }
    }

    let leaf_serial = x509::raw_serial(leaf);
    let inter_serial = x509::raw_serial(intermediate);
    for crl in crls {
        if crl.contains_serial(leaf_serial) || crl.contains_serial(inter_serial) {
            return Ok(ChainVerifyResult {
                status: ChainStatus::Revoked,
                chain_der,
            });
        }
    }

    Ok(ChainVerifyResult {
        status: ChainStatus::Valid,
        chain_der,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode_len(len: usize, out: &mut Vec<u8>) {
        if len < 0x80 {
            out.push(len as u8);
        } else {
            let bytes = len.to_be_bytes();
            let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
            let trimmed = &bytes[first_nonzero..];
            out.push(0x80 | trimmed.len() as u8);
            out.extend_from_slice(trimmed);
        }
    }

    fn encode_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        encode_len(content.len(), &mut out);
        out.extend_from_slice(content);
        out
    }

    fn encode_integer(value: &[u8]) -> Vec<u8> {
        encode_tlv(der::TAG_INTEGER, value)
    }

    fn encode_sequence(items: &[Vec<u8>]) -> Vec<u8> {
        let content: Vec<u8> = items.concat();
        encode_tlv(der::TAG_SEQUENCE, &content)
    }

    /// Builds a minimal synthetic `CertificateList` DER blob with the given
    /// revoked serials, enough to exercise [`Crl::parse_der`].
    fn synthetic_crl(serials: &[&[u8]]) -> Vec<u8> {
        let version = encode_integer(&[0x01]);
        let signature_alg = encode_sequence(&[]);
        let issuer = encode_sequence(&[]);
        let this_update = encode_tlv(0x17, b"250101000000Z");
        let revoked_entries: Vec<Vec<u8>> = serials
            .iter()
            .map(|s| encode_sequence(&[encode_integer(s), encode_tlv(0x17, b"250101000000Z")]))
            .collect();
        let revoked_certificates = encode_sequence(&revoked_entries);

        let tbs_cert_list = encode_sequence(&[
            version,
            signature_alg.clone(),
            issuer,
            this_update,
            revoked_certificates,
        ]);
        let signature_value = encode_tlv(0x03, &[0x00, 0xAB, 0xCD]);

        encode_sequence(&[tbs_cert_list, signature_alg, signature_value])
    }

    #[test]
    fn crl_extracts_revoked_serials() {
        let crl_der = synthetic_crl(&[&[0x01, 0x02, 0x03], &[0x00, 0x0a]]);
        let crl = Crl::parse_der(&crl_der).unwrap();
        assert!(crl.contains_serial(&[0x01, 0x02, 0x03]));
        assert!(crl.contains_serial(&[0x0a]));
        assert!(!crl.contains_serial(&[0x09]));
    }

    #[test]
    fn crl_with_no_revocations_is_empty() {
        let crl_der = synthetic_crl(&[]);
        let crl = Crl::parse_der(&crl_der).unwrap();
        assert!(!crl.contains_serial(&[0x01]));
    }
}
