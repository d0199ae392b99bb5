//! # Persisted record formats
//!
//! The pool persists exactly two record shapes in the coordination store:
//!
//! - [`PoolInfo`] - the singleton pool cursor (`start`, `end`, `next`)
//! - [`BlockInfo`] - one record per live block (`id`, `start`, `key`)
//!
//! Both are encoded as JSON objects with stable field names. Addresses are
//! rendered as dotted-quad strings. Only this crate writes these records, so a
//! decode failure indicates corruption and is handed to the configured
//! [`FailurePolicy`](crate::FailurePolicy).

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use std::net::Ipv4Addr;
use uuid::Uuid;

/// Failure to encode or decode a persisted record.
#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("failed to encode {kind} record: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode {kind} record at `{key}`: {source}")]
    Decode {
        kind: &'static str,
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A record type stored in the coordination store.
pub trait Record: Serialize + DeserializeOwned {
    /// Human-readable record kind used in error messages.
    const KIND: &'static str;

    fn encode(&self) -> Result<Bytes, CodecError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|source| CodecError::Encode {
                kind: Self::KIND,
                source,
            })
    }

    /// Decodes a record read from `key`.
    fn decode(key: &str, raw: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(raw).map_err(|source| CodecError::Decode {
            kind: Self::KIND,
            key: key.to_string(),
            source,
        })
    }
}

/// The pool cursor.
///
/// `start` and `end` are fixed when the record is first created; `next` is
/// advanced by one block on every allocation and never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInfo {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
    pub next: Ipv4Addr,
}

impl PoolInfo {
    /// Creates a fresh cursor pointing at the start of the range.
    pub const fn new(start: Ipv4Addr, end: Ipv4Addr) -> Self {
        Self {
            start,
            end,
            next: start,
        }
    }
}

impl Record for PoolInfo {
    const KIND: &'static str = "pool info";
}

/// A live block allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Time-ordered identifier minted at allocation time.
    pub id: Uuid,
    /// First address of the block; also the record's storage key suffix.
    pub start: Ipv4Addr,
    /// Optional caller-supplied ownership tag.
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub key: Option<String>,
}

impl BlockInfo {
    /// Mints a new block record with a fresh UUIDv7 identifier.
    pub fn new(start: Ipv4Addr, key: Option<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            start,
            key: key.filter(|k| !k.is_empty()),
        }
    }

    /// Returns `true` if this block is tagged with `key`.
    pub fn has_key(&self, key: &str) -> bool {
        self.key.as_deref() == Some(key)
    }
}

impl Record for BlockInfo {
    const KIND: &'static str = "block info";
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_info_uses_stable_field_names() {
        let info = PoolInfo {
            start: Ipv4Addr::new(10, 0, 0, 0),
            end: Ipv4Addr::new(10, 0, 0, 255),
            next: Ipv4Addr::new(10, 0, 0, 8),
        };
        let raw = info.encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "start": "10.0.0.0",
                "end": "10.0.0.255",
                "next": "10.0.0.8",
            })
        );
        assert_eq!(PoolInfo::decode("info", &raw).unwrap(), info);
    }

    #[test]
    fn new_cursor_starts_at_range_start() {
        let info = PoolInfo::new(Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(10, 0, 0, 255));
        assert_eq!(info.next, info.start);
    }

    #[test]
    fn block_without_key_omits_field() {
        let block = BlockInfo::new(Ipv4Addr::new(10, 0, 0, 4), None);
        let value: serde_json::Value = serde_json::from_slice(&block.encode().unwrap()).unwrap();
        assert_eq!(value["start"], "10.0.0.4");
        assert!(value.get("key").is_none());
        assert_eq!(value["id"], block.id.to_string());
    }

    #[test]
    fn empty_key_decodes_as_none() {
        let raw = br#"{"id":"01890a5d-ac96-774b-bcce-b302099a8057","start":"10.0.0.4","key":""}"#;
        let block = BlockInfo::decode("blocks/10.0.0.4", raw).unwrap();
        assert_eq!(block.key, None);

        let raw = br#"{"id":"01890a5d-ac96-774b-bcce-b302099a8057","start":"10.0.0.4","key":null}"#;
        assert_eq!(BlockInfo::decode("blocks/10.0.0.4", raw).unwrap().key, None);
    }

    #[test]
    fn minted_ids_are_time_ordered() {
        let a = BlockInfo::new(Ipv4Addr::new(10, 0, 0, 0), Some("svc".into()));
        let b = BlockInfo::new(Ipv4Addr::new(10, 0, 0, 4), None);
        assert_eq!(a.id.get_version_num(), 7);
        assert!(a.id < b.id);
        assert!(a.has_key("svc"));
        assert!(!b.has_key("svc"));
    }

    #[test]
    fn decode_failure_names_the_key() {
        let err = PoolInfo::decode("ipblock/pool/info", b"not json").unwrap_err();
        assert!(err.to_string().contains("ipblock/pool/info"));
    }
}
