//! Encryption policy for point-to-point peers.

use serde::{Deserialize, Serialize};

/// How frames to a peer are protected by the radio stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PeerEncryption {
    #[default]
    Unencrypted,
    /// Use the key installed in the radio stack for all peers.
    DefaultKey,
    CustomKey {
        #[serde(with = "hex_key")]
        key: [u8; 16],
    },
}

impl PeerEncryption {
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, PeerEncryption::Unencrypted)
    }

    pub fn key(&self) -> Option<&[u8; 16]> {
        match self {
            PeerEncryption::CustomKey { key } => Some(key),
            _ => None,
        }
    }
}

mod hex_key {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 16], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 16], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 16 bytes"))
    }
}
