use ipblock_pool::{ReleaseMode, Result, parse_block_address};
use serde::Deserialize;
use std::net::Ipv4Addr;

/// Query parameters accepted on `/pool/allocation`.
///
/// Every parameter is optional and an empty value counts as absent.
#[derive(Debug, Default, Deserialize)]
pub struct AllocationParams {
    /// Start address of a block.
    pub block: Option<String>,
    /// Caller-supplied ownership tag.
    pub key: Option<String>,
    /// `true` holds the pool lock after an allocation (contention demo).
    pub delay: Option<String>,
    /// `true` indents the JSON response.
    pub pretty: Option<String>,
}

impl AllocationParams {
    pub fn block(&self) -> Result<Option<Ipv4Addr>> {
        parse_block_address(self.block.as_deref())
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn release_mode(&self) -> ReleaseMode {
        if flag(self.delay.as_deref()) {
            ReleaseMode::Deferred
        } else {
            ReleaseMode::Immediate
        }
    }

    pub fn pretty(&self) -> bool {
        flag(self.pretty.as_deref())
    }
}

fn flag(raw: Option<&str>) -> bool {
    raw.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_case_insensitive() {
        let params = AllocationParams {
            delay: Some("TRUE".into()),
            pretty: Some("yes".into()),
            ..Default::default()
        };
        assert_eq!(params.release_mode(), ReleaseMode::Deferred);
        assert!(!params.pretty());
        assert_eq!(AllocationParams::default().release_mode(), ReleaseMode::Immediate);
    }

    #[test]
    fn empty_values_are_absent() {
        let params = AllocationParams {
            block: Some(String::new()),
            key: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(params.block().unwrap(), None);
        assert_eq!(params.key(), None);
    }
}
