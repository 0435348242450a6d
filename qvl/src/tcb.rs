//! TCB policy hook.
//!
//! `qvl` does not embed or fetch Intel TCB info; it only extracts the
//! parsed leaf's FMSPC and hands it, alongside the quote, to a
//! caller-supplied predicate. Rejection fails the whole verification with
//! [`crate::error::VerifyError::TcbRejected`].

use crate::quote::ParsedQuote;

/// A caller-supplied TCB freshness/status predicate.
///
/// Implemented automatically for any `Fn(&str, &ParsedQuote) -> bool`, so
/// callers can pass a closure directly.
pub trait TcbPolicy {
    /// Returns `true` to accept the quote's platform TCB level, `false` to
    /// reject it. `fmspc_hex` is the lowercase hex FMSPC extracted from the
    /// PCK leaf's SGX extension.
    fn verify_tcb(&self, fmspc_hex: &str, quote: &ParsedQuote) -> bool;
}

impl<F> TcbPolicy for F
where
    F: Fn(&str, &ParsedQuote) -> bool,
{
    fn verify_tcb(&self, fmspc_hex: &str, quote: &ParsedQuote) -> bool {
        self(fmspc_hex, quote)
    }
}

/// A policy that accepts every FMSPC/quote. Useful for tests and for
/// callers who perform TCB freshness checks out-of-band.
pub struct AcceptAll;

impl TcbPolicy for AcceptAll {
    fn verify_tcb(&self, _fmspc_hex: &str, _quote: &ParsedQuote) -> bool {
        true
    }
}

/// A policy that rejects every quote. Useful as a negative-path test double.
pub struct RejectAll;

impl TcbPolicy for RejectAll {
    fn verify_tcb(&self, _fmspc_hex: &str, _quote: &ParsedQuote) -> bool {
        false
    }
}
