use byte_array::{ByteArray, RefCast};

/// A 32-byte measurement register: SGX `mr_enclave` / `mr_signer`.
#[derive(Copy, Clone, Eq, Hash, PartialEq, RefCast)]
#[repr(transparent)]
pub struct Measurement32([u8; 32]);

/// A 48-byte measurement register: TDX `mr_td`, `mr_seam`, `rtmr0..3`, etc.
#[derive(Copy, Clone, Eq, Hash, PartialEq, RefCast)]
#[repr(transparent)]
pub struct Measurement48([u8; 48]);

impl Measurement32 {
    pub const fn new(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl Measurement48 {
    pub const fn new(value: [u8; 48]) -> Self {
        Self(value)
    }
}

byte_array::impl_byte_array!(Measurement32, 32);
byte_array::impl_fromstr_fromhex!(Measurement32, 32);
byte_array::impl_debug_display_as_hex!(Measurement32);

byte_array::impl_byte_array!(Measurement48, 48);
byte_array::impl_fromstr_fromhex!(Measurement48, 48);
byte_array::impl_debug_display_as_hex!(Measurement48);

/// The 6-byte Family-Model-Stepping-Platform-CustomSKU platform identifier
/// found in the PCK leaf's SGX extension.
#[derive(Copy, Clone, Eq, Hash, PartialEq, RefCast)]
#[repr(transparent)]
pub struct Fmspc([u8; 6]);

impl Fmspc {
    pub const fn new(value: [u8; 6]) -> Self {
        Self(value)
    }
}

byte_array::impl_byte_array!(Fmspc, 6);
byte_array::impl_fromstr_fromhex!(Fmspc, 6);
byte_array::impl_debug_display_as_hex!(Fmspc);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn measurement_hex_roundtrip() {
        let m = Measurement32::new([0x42; 32]);
        let s = m.hex_display().to_string();
        let m2 = Measurement32::try_from_hexstr(&s).unwrap();
        assert_eq!(m, m2);
    }

    #[test]
    fn fmspc_hex_roundtrip() {
        let f = Fmspc::try_from_hexstr("30606a000000").unwrap();
        assert_eq!(f.hex_display().to_string(), "30606a000000");
    }
}
