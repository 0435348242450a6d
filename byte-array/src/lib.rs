use std::{
    array::TryFromSliceError,
    fmt::{self, Debug, Display},
    hash::Hash,
};

use hex::{FromHex, HexDisplay};
pub use ref_cast::RefCast;

/// A trait for types represented in memory as a byte array. Should NOT be
/// implemented for types that require validation of the byte array contents.
pub trait ByteArray<const N: usize>:
    Copy + Debug + Eq + Hash + RefCast<From = [u8; N]> + Sized
{
    // --- Required: array --- //

    fn from_array(array: [u8; N]) -> Self;
    fn to_array(&self) -> [u8; N];
    fn as_array(&self) -> &[u8; N];

    // --- Provided: array / slice / vec --- //

    fn from_array_ref(array: &[u8; N]) -> &Self {
        Self::ref_cast(array)
    }
    fn as_slice(&self) -> &[u8] {
        self.as_array().as_slice()
    }
    fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
    fn try_from_slice(slice: &[u8]) -> Result<Self, TryFromSliceError> {
        <[u8; N]>::try_from(slice).map(Self::from_array)
    }
    fn try_from_vec(vec: Vec<u8>) -> Result<Self, TryFromSliceError> {
        Self::try_from_slice(&vec)
    }

    // --- Provided: hex --- //

    fn hex_display(&self) -> HexDisplay<'_> {
        hex::display(self.as_slice())
    }
    fn try_from_hexstr(s: &str) -> Result<Self, hex::DecodeError> {
        <[u8; N]>::from_hex(s).map(Self::from_array)
    }
    fn fmt_hexstr(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&hex::display(self.as_slice()), f)
    }
}

/// Implement [`ByteArray`] for a `#[repr(transparent)]` newtype wrapping
/// `[u8; N]`. The type must also derive [`RefCast`].
#[macro_export]
macro_rules! impl_byte_array {
    ($ty:ty, $n:expr) => {
        impl $crate::ByteArray<$n> for $ty {
            fn from_array(array: [u8; $n]) -> Self {
                Self(array)
            }
            fn to_array(&self) -> [u8; $n] {
                self.0
            }
            fn as_array(&self) -> &[u8; $n] {
                &self.0
            }
        }
    };
}

/// Implement [`FromStr`](std::str::FromStr) and a `from_hex`-style inherent
/// helper in terms of the type's [`ByteArray`] impl.
#[macro_export]
macro_rules! impl_fromstr_fromhex {
    ($ty:ty, $n:expr) => {
        impl std::str::FromStr for $ty {
            type Err = hex::DecodeError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$ty as $crate::ByteArray<$n>>::try_from_hexstr(s)
            }
        }
    };
}

/// Implement [`Debug`] and [`Display`] for a [`ByteArray`] type as its lower
/// hex encoding.
#[macro_export]
macro_rules! impl_debug_display_as_hex {
    ($ty:ty) => {
        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "\"{}\"", $crate::ByteArray::hex_display(self))
            }
        }
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                std::fmt::Display::fmt(&$crate::ByteArray::hex_display(self), f)
            }
        }
    };
}
