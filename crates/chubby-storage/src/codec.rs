//! Slot index <-> engine key encoding
//!
//! Indices are stored as 16 lowercase hex characters of the big-endian
//! index, so byte order of the keys equals numeric order of the slots.

use chubby_common::{Error, Result};

/// Width of an encoded index in characters
pub const INDEX_KEY_LEN: usize = 16;

/// Encode a slot index as a fixed-width, order-preserving key
pub fn index_to_key(index: u64) -> String {
    hex::encode(index.to_be_bytes())
}

/// Decode a key produced by [`index_to_key`]
pub fn key_to_index(key: &str) -> Result<u64> {
    if key.len() != INDEX_KEY_LEN {
        return Err(Error::data_loss(format!(
            "index key '{key}' has length {}, expected {INDEX_KEY_LEN}",
            key.len()
        )));
    }
    let mut raw = [0u8; 8];
    hex::decode_to_slice(key, &mut raw)
        .map_err(|e| Error::data_loss(format!("index key '{key}' is not hex: {e}")))?;
    Ok(u64::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_keys() {
        assert_eq!(index_to_key(0), "0000000000000000");
        assert_eq!(index_to_key(255), "00000000000000ff");
        assert_eq!(index_to_key(i64::MAX as u64), "7fffffffffffffff");
        assert_eq!(key_to_index("00000000000000ff").unwrap(), 255);
    }

    #[test]
    fn test_decimal_ordering_pitfall() {
        // "10" < "9" as decimal strings; fixed-width hex must not have that problem
        assert!(index_to_key(9) < index_to_key(10));
        assert!(index_to_key(0xf) < index_to_key(0x10));
    }

    #[test]
    fn test_malformed_keys() {
        assert!(key_to_index("").is_err());
        assert!(key_to_index("#BINLOG_LENGTH#").is_err());
        assert!(key_to_index("000000000000000g").is_err());
        assert!(key_to_index("00000000000000001").is_err());
    }

    proptest! {
        #[test]
        fn prop_order_preserving(a in 0u64..(1 << 63), b in 0u64..(1 << 63)) {
            prop_assert_eq!(a.cmp(&b), index_to_key(a).cmp(&index_to_key(b)));
        }

        #[test]
        fn prop_inverse(i in 0u64..(1 << 63)) {
            let key = index_to_key(i);
            prop_assert_eq!(key.len(), INDEX_KEY_LEN);
            prop_assert_eq!(key_to_index(&key).unwrap(), i);
        }
    }
}
