use std::fmt;
use std::str::FromStr;

use crate::{hex, HashError, HEX_LEN, ID_LEN};

/// The identity of a stored object: the digest of its framed content.
///
/// Twenty raw bytes, totally ordered byte-lexicographically, rendered as
/// forty lowercase hex characters. Immutable once constructed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; ID_LEN]);

impl ObjectId {
    /// The null id (all zeros).
    pub const NULL: Self = Self([0u8; ID_LEN]);

    /// Wrap a raw 20-byte digest.
    pub const fn new(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Create from a byte slice, which must be exactly 20 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HashError> {
        if bytes.len() != ID_LEN {
            return Err(HashError::InvalidIdLength {
                expected: ID_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; ID_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Parse a 40-character hex string (either case).
    pub fn from_hex(hex_str: &str) -> Result<Self, HashError> {
        if hex_str.len() != HEX_LEN {
            return Err(HashError::InvalidHexLength {
                expected: HEX_LEN,
                actual: hex_str.len(),
            });
        }
        let mut bytes = [0u8; ID_LEN];
        hex::decode(hex_str, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode_string(&self.0)
    }

    /// Whether this is the all-zero id.
    pub fn is_null(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// First byte of the digest (fan-out bucket).
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }

    /// Loose storage path component: `"xx/yyyy..."`.
    pub fn loose_path(&self) -> String {
        let hex = self.to_hex();
        format!("{}/{}", &hex[..2], &hex[2..])
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", &self.to_hex()[..8])
    }
}

impl FromStr for ObjectId {
    type Err = HashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const EMPTY_HEX: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

    #[test]
    fn hex_roundtrip() {
        let id = ObjectId::from_hex(EMPTY_HEX).unwrap();
        assert_eq!(id.to_string(), EMPTY_HEX);
        let parsed: ObjectId = EMPTY_HEX.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn from_bytes_roundtrip() {
        let id = ObjectId::from_hex(EMPTY_HEX).unwrap();
        let again = ObjectId::from_bytes(id.as_bytes()).unwrap();
        assert_eq!(id, again);
    }

    #[test]
    fn from_bytes_wrong_length() {
        let err = ObjectId::from_bytes(&[0; 10]).unwrap_err();
        assert!(matches!(
            err,
            HashError::InvalidIdLength {
                expected: 20,
                actual: 10
            }
        ));
    }

    #[test]
    fn from_hex_wrong_length() {
        assert!(matches!(
            ObjectId::from_hex("abcd"),
            Err(HashError::InvalidHexLength { .. })
        ));
    }

    #[test]
    fn from_hex_bad_character() {
        let err = ObjectId::from_hex("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz").unwrap_err();
        assert!(matches!(err, HashError::InvalidHex { .. }));
    }

    #[test]
    fn uppercase_decodes_equal() {
        let lower = ObjectId::from_hex(EMPTY_HEX).unwrap();
        let upper = ObjectId::from_hex(&EMPTY_HEX.to_uppercase()).unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn ordering_is_bytewise() {
        let a = ObjectId::from_hex("0000000000000000000000000000000000000001").unwrap();
        let b = ObjectId::from_hex("0000000000000000000000000000000000000002").unwrap();
        assert!(a < b);
    }

    #[test]
    fn usable_as_map_key() {
        let id = ObjectId::from_hex(EMPTY_HEX).unwrap();
        let mut map = HashMap::new();
        map.insert(id, "value");
        assert_eq!(map.get(&id), Some(&"value"));
    }

    #[test]
    fn null_id() {
        assert!(ObjectId::NULL.is_null());
        assert!(!ObjectId::from_hex(EMPTY_HEX).unwrap().is_null());
    }

    #[test]
    fn debug_is_short() {
        let id = ObjectId::from_hex(EMPTY_HEX).unwrap();
        assert_eq!(format!("{id:?}"), "ObjectId(da39a3ee)");
    }

    #[test]
    fn first_byte_and_loose_path() {
        let id = ObjectId::from_hex(EMPTY_HEX).unwrap();
        assert_eq!(id.first_byte(), 0xda);
        assert_eq!(id.loose_path(), format!("da/{}", &EMPTY_HEX[2..]));
    }
}
