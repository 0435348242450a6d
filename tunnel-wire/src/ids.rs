//! `requestId` / `connectionId`: the multiplexing keys for tunneled HTTP
//! requests and WS sub-connections. Unique within a session (`spec.md`
//! §3's invariant); generated client-side from an OS RNG, not a counter,
//! so a reconnect can't collide with IDs the prior session handed out.

use std::fmt;

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Copy, Clone, Eq, Hash, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Generates a fresh random id. Collisions within one session
            /// are astronomically unlikely (64 bits of OS randomness) and
            /// are not otherwise guarded against.
            pub fn generate() -> Self {
                Self(OsRng.next_u64())
            }

            pub const fn from_u64(value: u64) -> Self {
                Self(value)
            }

            pub const fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#018x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#018x}", self.0)
            }
        }
    };
}

id_type!(RequestId);
id_type!(ConnectionId);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generated_ids_are_distinct() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn roundtrips_through_cbor() {
        let id = ConnectionId::generate();
        let bytes = serde_cbor::to_vec(&id).unwrap();
        let back: ConnectionId = serde_cbor::from_slice(&bytes).unwrap();
        assert_eq!(id, back);
    }
}
