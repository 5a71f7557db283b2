//! Metadata entry written first into every archive.
//!
//! Serialized as `backup_metadata.json` with camelCase keys so archives stay
//! readable by the mobile client.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of snapshot an archive holds. Only `Full` is produced today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupType {
    Full,
    Incremental,
    Selective,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    /// Application version that produced the archive
    pub version: String,

    /// Creation time, milliseconds since the Unix epoch
    pub timestamp: i64,

    #[serde(rename = "type")]
    pub backup_type: BackupType,

    #[serde(default)]
    pub device_info: BTreeMap<String, String>,

    pub include_images: bool,
    pub include_videos: bool,
    pub include_database: bool,
    pub include_config: bool,
}

impl BackupMetadata {
    /// Metadata for a full snapshot with every component included.
    pub fn full(version: impl Into<String>, timestamp: i64, device_info: BTreeMap<String, String>) -> Self {
        Self {
            version: version.into(),
            timestamp,
            backup_type: BackupType::Full,
            device_info,
            include_images: true,
            include_videos: true,
            include_database: true,
            include_config: true,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_json_schema() {
        let mut device = BTreeMap::new();
        device.insert("os".to_string(), "android".to_string());

        let mut metadata = BackupMetadata::full("2.3.0", 1_704_067_200_000, device);
        metadata.include_database = false;

        let value: serde_json::Value = serde_json::from_slice(&metadata.to_json().unwrap()).unwrap();
        assert_eq!(value["version"], "2.3.0");
        assert_eq!(value["timestamp"], 1_704_067_200_000i64);
        assert_eq!(value["type"], "FULL");
        assert_eq!(value["deviceInfo"]["os"], "android");
        assert_eq!(value["includeImages"], true);
        assert_eq!(value["includeDatabase"], false);
    }

    #[test]
    fn test_metadata_parses_reserved_types() {
        let json = br#"{
            "version": "1.0.0",
            "timestamp": 1,
            "type": "SELECTIVE",
            "includeImages": false,
            "includeVideos": false,
            "includeDatabase": true,
            "includeConfig": true
        }"#;

        let metadata = BackupMetadata::from_json(json).unwrap();
        assert_eq!(metadata.backup_type, BackupType::Selective);
        assert!(metadata.device_info.is_empty());
    }
}
