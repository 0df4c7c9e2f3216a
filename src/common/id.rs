//! Kademlia node Id or a lookup target

use std::convert::TryInto;
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 32;

#[derive(Clone, Copy, PartialEq, Ord, PartialOrd, Eq, Hash)]
/// Kademlia node Id or a lookup target
pub struct Id(pub [u8; ID_SIZE]);

/// The XOR distance between two [Id]s, ordered by unsigned magnitude.
///
/// For a fixed target, distance is injective: two distinct Ids never
/// share a distance.
#[derive(Clone, Copy, PartialEq, Ord, PartialOrd, Eq, Hash)]
pub struct Distance(pub [u8; ID_SIZE]);

impl Id {
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id, InvalidIdSize> {
        let bytes = bytes.as_ref();
        let bytes: [u8; ID_SIZE] = bytes.try_into().map_err(|_| InvalidIdSize(bytes.len()))?;

        Ok(Id(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    /// The XOR distance between this Id and `other`.
    pub fn xor(&self, other: &Id) -> Distance {
        let mut distance = [0_u8; ID_SIZE];

        for (i, byte) in distance.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        Distance(distance)
    }

    /// Compares the distances of `a` and `b` to this Id, without
    /// computing either distance in full.
    ///
    /// Returns [Ordering::Less](std::cmp::Ordering::Less) if `a` is closer,
    /// [Ordering::Greater](std::cmp::Ordering::Greater) if `b` is closer,
    /// and [Ordering::Equal](std::cmp::Ordering::Equal) only if `a == b`.
    pub fn three_way_compare(&self, a: &Id, b: &Id) -> std::cmp::Ordering {
        for i in 0..ID_SIZE {
            let da = self.0[i] ^ a.0[i];
            let db = self.0[i] ^ b.0[i];

            if da != db {
                return da.cmp(&db);
            }
        }

        std::cmp::Ordering::Equal
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }

        Ok(())
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({self})")
    }
}

impl Debug for Distance {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Distance(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

impl FromStr for Id {
    type Err = DecodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() % 2 != 0 {
            return Err(DecodeIdError::OddLength);
        }

        // Multibyte characters would break the byte ranges below.
        if !s.is_ascii() {
            return Err(DecodeIdError::InvalidHexCharacter);
        }

        let bytes = (0..s.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| DecodeIdError::InvalidHexCharacter)
            })
            .collect::<Result<Vec<u8>, DecodeIdError>>()?;

        Ok(Id::from_bytes(bytes)?)
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = serde_bytes::ByteBuf::deserialize(deserializer)?;

        Id::from_bytes(bytes).map_err(serde::de::Error::custom)
    }
}

#[derive(Error, Debug)]
#[error("Invalid Id size, expected 32 bytes, got {0}")]
pub struct InvalidIdSize(usize);

#[derive(Error, Debug)]
/// Errors while decoding an [Id] from a hex string.
pub enum DecodeIdError {
    #[error("Hex encoded Id should have an even number of characters")]
    OddLength,

    #[error("Invalid hex character")]
    InvalidHexCharacter,

    #[error(transparent)]
    InvalidIdSize(#[from] InvalidIdSize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_to_self_is_zero() {
        let id = Id::random();

        assert_eq!(id.xor(&id), Distance([0_u8; ID_SIZE]));
    }

    #[test]
    fn three_way_compare_orders_by_distance() {
        let target = Id::random();

        for _ in 0..100 {
            let a = Id::random();
            let b = Id::random();

            assert_eq!(
                target.three_way_compare(&a, &b),
                target.xor(&a).cmp(&target.xor(&b))
            );
            assert_eq!(
                target.three_way_compare(&b, &a),
                target.xor(&b).cmp(&target.xor(&a))
            );
        }
    }

    #[test]
    fn three_way_compare_equal_only_for_same_id() {
        let target = Id::random();
        let a = Id::random();

        assert_eq!(
            target.three_way_compare(&a, &a),
            std::cmp::Ordering::Equal
        );

        let mut b = a;
        b.0[ID_SIZE - 1] ^= 1;

        assert_ne!(
            target.three_way_compare(&a, &b),
            std::cmp::Ordering::Equal
        );
    }

    #[test]
    fn from_hex_roundtrip() {
        let id = Id::random();

        let decoded: Id = id.to_string().parse().unwrap();

        assert_eq!(decoded, id);
    }

    #[test]
    fn decode_errors() {
        assert!(matches!(
            Id::from_str("abc"),
            Err(DecodeIdError::OddLength)
        ));
        assert!(matches!(
            Id::from_str("zz"),
            Err(DecodeIdError::InvalidHexCharacter)
        ));
        assert!(matches!(
            Id::from_str("€a"),
            Err(DecodeIdError::InvalidHexCharacter)
        ));
        assert!(matches!(
            Id::from_str("0000"),
            Err(DecodeIdError::InvalidIdSize(_))
        ));
    }
}
