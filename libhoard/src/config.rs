use crate::error::HoardResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_REMOTE_WEIGHT: i32 = 100;

/// the configuration document persisted as a blob at `refs/tags/config`
///
/// unrecognized keys are preserved across read-modify-write cycles
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct HoardConfig {
    #[serde(default)]
    pub boxes: BTreeMap<String, BoxOptions>,
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteOptions>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct BoxOptions {
    /// resolve every reachable blob after a remote head advance so reads
    /// never stall on the network
    #[serde(default)]
    pub prefetch: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RemoteOptions {
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: i32,
}

fn default_weight() -> i32 {
    DEFAULT_REMOTE_WEIGHT
}

impl HoardConfig {
    pub fn parse(bytes: &[u8]) -> HoardResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_bytes(&self) -> HoardResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn box_options(&self, name: &str) -> BoxOptions {
        self.boxes.get(name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips() -> HoardResult<()> {
        let config = HoardConfig::default();
        let parsed = HoardConfig::parse(&config.to_bytes()?)?;
        assert_eq!(config, parsed);
        Ok(())
    }

    #[test]
    fn unrecognized_keys_are_preserved() -> HoardResult<()> {
        let json = br#"{"boxes":{"music":{"prefetch":true}},"future-key":{"nested":1}}"#;
        let config = HoardConfig::parse(json)?;
        assert!(config.box_options("music").prefetch);
        assert!(!config.box_options("absent").prefetch);

        let rewritten = HoardConfig::parse(&config.to_bytes()?)?;
        assert_eq!(rewritten.extra.get("future-key"), config.extra.get("future-key"));
        Ok(())
    }

    #[test]
    fn remote_weight_defaults() -> HoardResult<()> {
        let config = HoardConfig::parse(br#"{"remotes":{"peer":{"url":"/tmp/peer"}}}"#)?;
        assert_eq!(config.remotes["peer"].weight, DEFAULT_REMOTE_WEIGHT);
        Ok(())
    }
}
