use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::{
    GENESIS_IMAGE_HASH, GENESIS_INDEX, GENESIS_LABEL, GENESIS_REQUEST_ID, HASH_SIZE,
};
use crate::error::{LedgerError, Result};

pub type Hash = [u8; HASH_SIZE];

/// `previous_hash` of the genesis block.
pub const ZERO_HASH: Hash = [0u8; HASH_SIZE];

/// Outcome attached to a classification by the producer.
///
/// The set is open: anything other than `verified` / `unverified` is kept
/// verbatim (it takes part in the block hash) and reads as unverified.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VerificationStatus {
    Verified,
    #[default]
    Unverified,
    Other(String),
}

impl VerificationStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Verified => "verified",
            Self::Unverified => "unverified",
            Self::Other(raw) => raw,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

impl From<String> for VerificationStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "verified" => Self::Verified,
            "unverified" => Self::Unverified,
            _ => Self::Other(raw),
        }
    }
}

impl From<&str> for VerificationStatus {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<VerificationStatus> for String {
    fn from(status: VerificationStatus) -> Self {
        match status {
            VerificationStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate fields supplied by the classification producer. The chain store
/// fills in index, timestamp and linkage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub request_id: String,
    pub plastic_type: String,
    pub confidence: f64,
    pub image_hash: String,
    #[serde(default)]
    pub verification_status: VerificationStatus,
}

impl Classification {
    pub fn validate(&self) -> Result<()> {
        if self.request_id.trim().is_empty() {
            return Err(LedgerError::rejected("request_id must not be empty"));
        }
        if self.plastic_type.trim().is_empty() {
            return Err(LedgerError::rejected("plastic_type must not be empty"));
        }
        if self.image_hash.trim().is_empty() {
            return Err(LedgerError::rejected("image_hash must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(LedgerError::rejected(format!(
                "confidence {} is outside [0.0, 1.0]",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// One ledger entry. Field names are the wire names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub request_id: String,
    pub plastic_type: String,
    pub confidence: f64,
    pub image_hash: String,
    pub verification_status: VerificationStatus,
    #[serde(with = "hex_hash")]
    pub previous_hash: Hash,
    #[serde(with = "hex_hash")]
    pub hash: Hash,
}

impl Block {
    /// Build a block from its content and seal it with its hash.
    pub fn seal(
        index: u64,
        timestamp: u64,
        classification: Classification,
        previous_hash: Hash,
    ) -> Self {
        let mut block = Self {
            index,
            timestamp,
            request_id: classification.request_id,
            plastic_type: classification.plastic_type,
            confidence: classification.confidence,
            image_hash: classification.image_hash,
            verification_status: classification.verification_status,
            previous_hash,
            hash: ZERO_HASH,
        };
        block.hash = block.compute_hash();
        block
    }

    /// Canonical encoding of every field except `hash`. Strings are
    /// length-prefixed so adjacent fields cannot run into each other.
    pub fn hash_bytes(&self) -> Vec<u8> {
        let strings = [
            self.request_id.as_str(),
            self.plastic_type.as_str(),
            self.image_hash.as_str(),
            self.verification_status.as_str(),
        ];
        let text_len: usize = strings.iter().map(|s| 8 + s.len()).sum();
        let mut bytes = Vec::with_capacity(8 + 8 + text_len + 8 + HASH_SIZE);
        bytes.extend_from_slice(&self.index.to_le_bytes());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        for s in strings {
            bytes.extend_from_slice(&(s.len() as u64).to_le_bytes());
            bytes.extend_from_slice(s.as_bytes());
        }
        bytes.extend_from_slice(&self.confidence.to_bits().to_le_bytes());
        bytes.extend_from_slice(&self.previous_hash);
        bytes
    }

    /// Recompute the hash from the current field values.
    pub fn compute_hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.hash_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(&digest[..]);
        out
    }

    pub fn is_genesis(&self) -> bool {
        self.index == GENESIS_INDEX
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

/// The synthetic anchor block. Every field is a fixed sentinel, so every
/// store produces the same genesis hash.
pub fn genesis_block() -> Block {
    Block::seal(
        GENESIS_INDEX,
        0,
        Classification {
            request_id: GENESIS_REQUEST_ID.to_string(),
            plastic_type: GENESIS_LABEL.to_string(),
            confidence: 0.0,
            image_hash: GENESIS_IMAGE_HASH.to_string(),
            verification_status: VerificationStatus::Other(GENESIS_LABEL.to_string()),
        },
        ZERO_HASH,
    )
}

/// Seconds since the Unix epoch; a clock before 1970 reads as 0 and is
/// then clamped by the chain's monotonic timestamp rule.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Lowercase hex (de)serialisation for 32-byte hashes.
pub mod hex_hash {
    use super::Hash;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let mut out = [0u8; super::HASH_SIZE];
        hex::decode_to_slice(&raw, &mut out).map_err(D::Error::custom)?;
        Ok(out)
    }
}
