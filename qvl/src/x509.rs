//! X.509 helpers: PEM bundle decoding, certificate fingerprinting, and
//! extraction of Intel's SGX PCK extension (OID `1.2.840.113741.1.13.1`),
//! which carries the FMSPC, PCEID, TCB component SVNs, and SGX type.

use std::time::SystemTime;

use x509_parser::{certificate::X509Certificate, prelude::FromDer, time::ASN1Time};

use crate::{der, error::ChainError, error::ParseError, measurement::Fmspc};

/// DER content bytes of the OID prefix `1.2.840.113741.1.13.1`, i.e.
/// everything but the tag and length octets.
const SGX_EXT_OID_PREFIX: [u8; 9] =
    [0x2A, 0x86, 0x48, 0x86, 0xF8, 0x4D, 0x01, 0x0D, 0x01];

/// Intel-defined SGX extension sub-OID last arcs (appended to the prefix).
mod arc {
    pub const PPID: u8 = 1;
    pub const TCB: u8 = 2;
    pub const PCEID: u8 = 3;
    pub const FMSPC: u8 = 4;
    pub const SGX_TYPE: u8 = 5;
}

/// Last arcs nested under the `tcb` sub-extension (`...13.1.2.N`).
const TCB_COMP_SVN_COUNT: u8 = 16;
const TCB_PCESVN_ARC: u8 = 17;
const TCB_CPUSVN_ARC: u8 = 18;

fn oid_matches(oid_content: &[u8], suffix: &[u8]) -> bool {
    oid_content.len() == SGX_EXT_OID_PREFIX.len() + suffix.len()
        && &oid_content[..SGX_EXT_OID_PREFIX.len()] == SGX_EXT_OID_PREFIX.as_slice()
        && &oid_content[SGX_EXT_OID_PREFIX.len()..] == suffix
}

/// The fields extracted from a PCK leaf certificate's SGX extension.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SgxExtension {
    pub ppid: Option<[u8; 16]>,
    pub fmspc: Option<Fmspc>,
    pub pceid: Option<[u8; 2]>,
    /// 0 = SGX, 1 = TDX, per Intel's SGX extension encoding.
    pub sgx_type: Option<u8>,
    pub tcb_comp_svn: [u8; 16],
    pub pcesvn: u16,
    pub cpusvn: [u8; 16],
}

fn be_bytes_to_u16(bytes: &[u8]) -> u16 {
    der::trim_integer_padding(bytes)
        .iter()
        .fold(0u16, |acc, &b| (acc << 8) | b as u16)
}

/// Parses the SGX extension's DER content (the X.509 extension's decoded
/// `extnValue` OCTET STRING payload, i.e. a top-level
/// `SEQUENCE OF SEQUENCE { id OBJECT IDENTIFIER, value ANY }`).
pub fn parse_sgx_extension(ext_value: &[u8]) -> Result<SgxExtension, ParseError> {
    let (outer, _) = der::read_tlv(ext_value)?;
    if outer.tag != der::TAG_SEQUENCE {
        return Err(ParseError::MalformedPemBundle);
    }

    let mut out = SgxExtension::default();
    for item in der::sequence_items(outer.content)? {
        if item.tag != der::TAG_SEQUENCE {
            continue;
        }
        let fields = der::sequence_items(item.content)?;
        let (Some(oid), Some(value)) = (fields.first(), fields.get(1)) else {
            continue;
        };
        if oid.tag != der::TAG_OID {
            continue;
        }

        if oid_matches(oid.content, &[arc::FMSPC]) && value.content.len() == 6 {
            out.fmspc = Some(Fmspc::new(value.content.try_into().unwrap()));
        } else if oid_matches(oid.content, &[arc::PCEID]) && value.content.len() == 2 {
            out.pceid = Some(value.content.try_into().unwrap());
        } else if oid_matches(oid.content, &[arc::PPID]) && value.content.len() == 16 {
            out.ppid = Some(value.content.try_into().unwrap());
        } else if oid_matches(oid.content, &[arc::SGX_TYPE]) {
            out.sgx_type = value.content.first().copied();
        } else if oid_matches(oid.content, &[arc::TCB]) {
            parse_tcb_sub_extension(value.content, &mut out)?;
        }
    }

    Ok(out)
}

fn parse_tcb_sub_extension(
    content: &[u8],
    out: &mut SgxExtension,
) -> Result<(), ParseError> {
    for item in der::sequence_items(content)? {
        if item.tag != der::TAG_SEQUENCE {
            continue;
        }
        let fields = der::sequence_items(item.content)?;
        let (Some(oid), Some(value)) = (fields.first(), fields.get(1)) else {
            continue;
        };
        if oid.tag != der::TAG_OID {
            continue;
        }

        for comp in 1..=TCB_COMP_SVN_COUNT {
            if oid_matches(oid.content, &[arc::TCB, comp]) {
                if let Some(&b) = value.content.first() {
                    out.tcb_comp_svn[(comp - 1) as usize] = b;
                }
            }
        }
        if oid_matches(oid.content, &[arc::TCB, TCB_PCESVN_ARC]) {
            out.pcesvn = be_bytes_to_u16(value.content);
        }
        if oid_matches(oid.content, &[arc::TCB, TCB_CPUSVN_ARC])
            && value.content.len() == 16
        {
            out.cpusvn.copy_from_slice(value.content);
        }
    }
    Ok(())
}

/// Extracts and parses the SGX extension from a leaf certificate.
pub fn leaf_sgx_extension(cert: &X509Certificate<'_>) -> Result<SgxExtension, ParseError> {
    let oid = asn1_rs::oid!(1.2.840.113741.1.13.1);
    let ext = cert
        .get_extension_unique(&oid)
        .map_err(|_| ParseError::MalformedPemBundle)?
        .ok_or(ParseError::MalformedPemBundle)?;
    parse_sgx_extension(ext.value)
}

/// Decodes one PEM-encoded certificate to DER.
pub fn pem_to_der(pem: &str) -> Result<Vec<u8>, ChainError> {
    let mut reader = std::io::Cursor::new(pem.as_bytes());
    let item = rustls_pemfile::read_one(&mut reader)
        .map_err(|e| ChainError::BadCertificate(e.to_string()))?
        .ok_or_else(|| ChainError::BadCertificate("empty PEM block".to_string()))?;
    match item {
        rustls_pemfile::Item::X509Certificate(der) => Ok(der),
        _ => Err(ChainError::BadCertificate(
            "PEM block is not a certificate".to_string(),
        )),
    }
}

/// Decodes each PEM string in a bundle to DER, in order.
pub fn pem_bundle_to_der(pems: &[String]) -> Result<Vec<Vec<u8>>, ChainError> {
    pems.iter().map(|pem| pem_to_der(pem)).collect()
}

/// Parses a DER-encoded X.509 certificate, rejecting trailing garbage.
pub fn parse_der(der_bytes: &[u8]) -> Result<X509Certificate<'_>, ChainError> {
    let (rest, cert) = X509Certificate::from_der(der_bytes)
        .map_err(|e| ChainError::BadCertificate(e.to_string()))?;
    if !rest.is_empty() {
        return Err(ChainError::BadCertificate(
            "trailing bytes after certificate".to_string(),
        ));
    }
    Ok(cert)
}

/// SHA-256 fingerprint of a DER-encoded certificate.
pub fn sha256_fingerprint(der_bytes: &[u8]) -> sha256::Hash {
    sha256::digest(der_bytes)
}

/// True if any Common Name RDN in the certificate's subject contains
/// `needle` as a substring (Intel's PCK chain subjects are e.g.
/// `CN=Intel SGX PCK Certificate`, `CN=Intel SGX PCK Platform CA`,
/// `CN=Intel SGX Root CA`).
pub fn subject_cn_contains(cert: &X509Certificate<'_>, needle: &str) -> bool {
    cert.subject()
        .iter_common_name()
        .filter_map(|cn| cn.as_str().ok())
        .any(|cn| cn.contains(needle))
}

/// True if `t` falls within the certificate's `notBefore..=notAfter` range.
pub fn is_valid_at(cert: &X509Certificate<'_>, t: SystemTime) -> bool {
    let secs = t
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    match ASN1Time::from_timestamp(secs) {
        Ok(asn1_t) => cert.validity().is_valid_at(asn1_t),
        Err(_) => false,
    }
}

/// The raw, sign-trimmed big-endian serial number bytes.
pub fn raw_serial(cert: &X509Certificate<'_>) -> &[u8] {
    der::trim_integer_padding(cert.raw_serial())
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode_oid_der(last_arcs: &[u8]) -> Vec<u8> {
        let mut content = SGX_EXT_OID_PREFIX.to_vec();
        content.extend_from_slice(last_arcs);
        let mut out = vec![der::TAG_OID, content.len() as u8];
        out.extend_from_slice(&content);
        out
    }

    fn encode_sequence(items: &[Vec<u8>]) -> Vec<u8> {
        let mut content = Vec::new();
        for item in items {
            content.extend_from_slice(item);
        }
        let mut out = vec![der::TAG_SEQUENCE, content.len() as u8];
        out.extend_from_slice(&content);
        out
    }

    fn encode_octet_string(bytes: &[u8]) -> Vec<u8> {
        let mut out = vec![0x04u8, bytes.len() as u8];
        out.extend_from_slice(bytes);
        out
    }

    #[test]
    fn parses_fmspc_and_pceid() {
        let fmspc_pair =
            encode_sequence(&[encode_oid_der(&[arc::FMSPC]), encode_octet_string(&[0x30, 0x60, 0x6a, 0, 0, 0])]);
        let pceid_pair =
            encode_sequence(&[encode_oid_der(&[arc::PCEID]), encode_octet_string(&[0x00, 0x00])]);
        let outer = encode_sequence(&[fmspc_pair, pceid_pair]);

        let ext = parse_sgx_extension(&outer).unwrap();
        assert_eq!(
            ext.fmspc.unwrap(),
            Fmspc::new([0x30, 0x60, 0x6a, 0, 0, 0])
        );
        assert_eq!(ext.pceid.unwrap(), [0x00, 0x00]);
    }

    #[test]
    fn parses_tcb_component_svns() {
        let comp1 = encode_sequence(&[encode_oid_der(&[arc::TCB, 1]), {
            let mut v = vec![der::TAG_INTEGER, 1];
            v.push(9);
            v
        }]);
        let pcesvn = encode_sequence(&[
            encode_oid_der(&[arc::TCB, TCB_PCESVN_ARC]),
            vec![der::TAG_INTEGER, 2, 0x00, 0x0a],
        ]);
        let tcb_inner = encode_sequence(&[comp1, pcesvn]);
        let tcb_pair = encode_sequence(&[encode_oid_der(&[arc::TCB]), tcb_inner]);
        let outer = encode_sequence(&[tcb_pair]);

        let ext = parse_sgx_extension(&outer).unwrap();
        assert_eq!(ext.tcb_comp_svn[0], 9);
        assert_eq!(ext.pcesvn, 10);
    }

    #[test]
    fn pck_leaf_and_intermediate_cns_are_distinguishable() {
        // The intermediate's CN contains "SGX PCK" as a substring of its own
        // name, so `chain::verify_chain` must key off the more specific
        // "SGX PCK Certificate" needle to avoid binding the leaf index to
        // the intermediate when a bundle isn't already leaf-first.
        let leaf_cn = "Intel SGX PCK Certificate";
        let platform_ca_cn = "Intel SGX PCK Platform CA";
        let processor_ca_cn = "Intel SGX PCK Processor CA";

        assert!(leaf_cn.contains("SGX PCK Certificate"));
        assert!(!platform_ca_cn.contains("SGX PCK Certificate"));
        assert!(!processor_ca_cn.contains("SGX PCK Certificate"));

        // Both still share the looser substring the old code matched on.
        assert!(platform_ca_cn.contains("SGX PCK"));
        assert!(processor_ca_cn.contains("SGX PCK"));
    }

    #[test]
    fn ignores_unknown_oids() {
        let unknown_pair = encode_sequence(&[
            {
                let mut v = vec![der::TAG_OID, 3];
                v.extend_from_slice(&[0x55, 0x04, 0x03]); // commonName OID, unrelated
                v
            },
            encode_octet_string(b"whatever"),
        ]);
        let outer = encode_sequence(&[unknown_pair]);
        let ext = parse_sgx_extension(&outer).unwrap();
        assert_eq!(ext, SgxExtension::default());
    }
}
