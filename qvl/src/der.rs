//! A tiny generic DER TLV walker.
//!
//! The quote header and bodies have a dense, fixed-width layout that
//! [`crate::byte_reader`] handles directly. A handful of fields nested
//! inside X.509 structures — the SGX PCK extension's
//! `SEQUENCE OF SEQUENCE { id, value }` and a CRL's
//! `revokedCertificates` list — are small, self-describing ASN.1
//! structures that don't justify pulling in a full schema-typed ASN.1
//! decoder. This module reads just enough DER (definite-length tag/length/
//! value triples) to walk those.

use crate::error::ParseError;

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OID: u8 = 0x06;
pub const TAG_SEQUENCE: u8 = 0x30;

/// One decoded tag-length-value triple. `content` is the value bytes only
/// (no tag or length octets).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Tlv<'a> {
    pub tag: u8,
    pub content: &'a [u8],
}

/// Reads a single DER TLV from the front of `input`, returning it with the
/// unread remainder. Definite-length form only (CRLs and X.509 extensions
/// are always DER, never BER indefinite-length).
pub fn read_tlv(input: &[u8]) -> Result<(Tlv<'_>, &[u8]), ParseError> {
    let &tag = input
        .first()
        .ok_or(ParseError::TruncatedField { field: "der_tag" })?;
    let len_byte = *input
        .get(1)
        .ok_or(ParseError::TruncatedField { field: "der_len" })?;

    let (len, header_len) = if len_byte & 0x80 == 0 {
        (len_byte as usize, 2usize)
    } else {
        let n = (len_byte & 0x7f) as usize;
        if n == 0 || n > 4 {
            return Err(ParseError::LengthOverflow { field: "der_len" });
        }
        let len_bytes = input
            .get(2..2 + n)
            .ok_or(ParseError::TruncatedField { field: "der_len_bytes" })?;
        let len = len_bytes
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        (len, 2 + n)
    };

    let content = input
        .get(header_len..header_len + len)
        .ok_or(ParseError::TruncatedField { field: "der_content" })?;
    let rest = &input[header_len + len..];
    Ok((Tlv { tag, content }, rest))
}

/// Walks a DER constructed value's content (e.g. a `SEQUENCE`'s payload),
/// returning each top-level TLV it contains in order.
pub fn sequence_items(content: &[u8]) -> Result<Vec<Tlv<'_>>, ParseError> {
    let mut items = Vec::new();
    let mut rest = content;
    while !rest.is_empty() {
        let (tlv, next) = read_tlv(rest)?;
        items.push(tlv);
        rest = next;
    }
    Ok(items)
}

/// Interprets a DER `INTEGER`'s content as an unsigned big-endian value,
/// with any DER sign-padding leading zero byte trimmed.
pub fn trim_integer_padding(content: &[u8]) -> &[u8] {
    let mut b = content;
    while b.len() > 1 && b[0] == 0 {
        b = &b[1..];
    }
    b
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reads_short_form_length() {
        let buf = [0x02u8, 0x01, 0x2a];
        let (tlv, rest) = read_tlv(&buf).unwrap();
        assert_eq!(tlv.tag, TAG_INTEGER);
        assert_eq!(tlv.content, &[0x2a]);
        assert!(rest.is_empty());
    }

    #[test]
    fn reads_long_form_length() {
        let content = vec![0xABu8; 200];
        let mut buf = vec![0x04u8, 0x81, 200];
        buf.extend_from_slice(&content);
        let (tlv, rest) = read_tlv(&buf).unwrap();
        assert_eq!(tlv.content, content.as_slice());
        assert!(rest.is_empty());
    }

    #[test]
    fn rejects_truncated_content() {
        let buf = [0x02u8, 0x05, 0x01];
        assert!(read_tlv(&buf).is_err());
    }

    #[test]
    fn sequence_items_walks_siblings() {
        // two INTEGERs back to back
        let buf = [0x02u8, 0x01, 0x01, 0x02, 0x01, 0x02];
        let items = sequence_items(&buf).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].content, &[0x01]);
        assert_eq!(items[1].content, &[0x02]);
    }

    #[test]
    fn trims_leading_zero_padding() {
        assert_eq!(trim_integer_padding(&[0x00, 0x01, 0x02]), &[0x01, 0x02]);
        assert_eq!(trim_integer_padding(&[0x00]), &[0x00]);
        assert_eq!(trim_integer_padding(&[0x01]), &[0x01]);
    }
}
