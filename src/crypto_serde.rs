use base64::{engine::general_purpose::STANDARD, Engine as _};
use num_bigint::BigUint;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Encode a bignum as base64 of its big-endian bytes.
pub fn encode_biguint(value: &BigUint) -> String {
    STANDARD.encode(value.to_bytes_be())
}

pub fn decode_biguint(encoded: &str) -> Result<BigUint, base64::DecodeError> {
    let bytes = STANDARD.decode(encoded)?;
    Ok(BigUint::from_bytes_be(&bytes))
}

/// Serde helpers for bignums encoded as base64 strings.
pub mod biguint {
    use super::*;

    pub fn serialize<S>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&encode_biguint(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BigUint, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        decode_biguint(&s).map_err(DeError::custom)
    }
}

/// Serde helpers for `Vec<BigUint>` encoded as an array of base64 strings.
pub mod biguint_vec {
    use super::*;

    pub fn serialize<S>(values: &[BigUint], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded: Vec<String> = values.iter().map(encode_biguint).collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<BigUint>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .iter()
            .map(|s| decode_biguint(s).map_err(DeError::custom))
            .collect()
    }
}

/// Serde helpers for fixed 32-byte digests encoded as base64.
pub mod bytes32 {
    use super::*;

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(&s).map_err(DeError::custom)?;
        <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| DeError::invalid_length(bytes.len(), &"32 bytes"))
    }
}
