//! Text encodings for byte fields in JSON records.
//!
//! Keys, nonces and signatures travel as hex; ledger values and response
//! payloads as standard base64. Use through `#[serde(with = "...")]`.

use serde::{de::Error, Deserialize, Deserializer, Serializer};

fn serialize_with<S, B>(
    bytes: B,
    serializer: S,
    encode: fn(&[u8]) -> String,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    B: AsRef<[u8]>,
{
    serializer.serialize_str(&encode(bytes.as_ref()))
}

fn deserialize_with<'de, D, E>(
    deserializer: D,
    decode: fn(&str) -> Result<Vec<u8>, E>,
) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
    E: std::fmt::Display,
{
    let encoded = String::deserialize(deserializer)?;
    decode(&encoded).map_err(D::Error::custom)
}

pub(crate) mod hex_bytes {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        super::serialize_with(bytes, serializer, |b| hex::encode(b))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        super::deserialize_with(deserializer, |s| hex::decode(s))
    }
}

pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        super::serialize_with(bytes, serializer, |b| STANDARD.encode(b))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        super::deserialize_with(deserializer, |s| STANDARD.decode(s))
    }
}
