//! Network configuration for the simulated channel.
//!
//! The defaults reproduce the three-bank test network the vault chaincode
//! was deployed on: `mychannel`, chaincode `usdt-secret`, and one private
//! collection readable by every bank organisation.

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::contracts::COLLECTION;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("collection {collection}: policy {policy:?} names no member organisations")]
    Policy { collection: String, policy: String },
    #[error("collection {collection}: requiredPeerCount {required} exceeds maxPeerCount {max}")]
    PeerCount {
        collection: String,
        required: u32,
        max: u32,
    },
    #[error("collection {0} defined more than once")]
    DuplicateCollection(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrgConfig {
    pub msp_id: String,
    /// Gateway role that acts for this organisation (e.g. `BankA`).
    pub role: String,
    pub admin: String,
}

impl OrgConfig {
    fn new(msp_id: &str, role: &str, domain: &str) -> Self {
        Self {
            msp_id: msp_id.to_string(),
            role: role.to_string(),
            admin: format!("Admin@{domain}"),
        }
    }
}

/// Private data collection definition, in the shape of a
/// `collections_config.json` entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionConfig {
    pub name: String,
    pub policy: String,
    #[serde(default)]
    pub required_peer_count: u32,
    #[serde(default)]
    pub max_peer_count: u32,
    /// Blocks an entry survives before purge; 0 keeps it forever.
    #[serde(default)]
    pub block_to_live: u64,
    #[serde(default)]
    pub member_only_read: bool,
    #[serde(default)]
    pub member_only_write: bool,
}

impl CollectionConfig {
    /// Organisations named by the membership policy.
    ///
    /// Every `'<MSPID>.<role>'` principal counts, whatever the surrounding
    /// `OR`/`AND`/`OutOf` combinator is.
    pub fn member_orgs(&self) -> Result<BTreeSet<String>, ConfigError> {
        let members: BTreeSet<String> = self
            .policy
            .split('\'')
            .skip(1)
            .step_by(2)
            .filter_map(|principal| principal.split_once('.'))
            .map(|(msp_id, _)| msp_id.trim().to_string())
            .filter(|msp_id| !msp_id.is_empty())
            .collect();
        if members.is_empty() {
            return Err(ConfigError::Policy {
                collection: self.name.clone(),
                policy: self.policy.clone(),
            });
        }
        Ok(members)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub channel: String,
    pub chaincode: String,
    pub organizations: Vec<OrgConfig>,
    pub collections: Vec<CollectionConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let organizations = vec![
            OrgConfig::new("Org1MSP", "BankA", "org1.example.com"),
            OrgConfig::new("Org2MSP", "BankB", "org2.example.com"),
            OrgConfig::new("Org3MSP", "Regulator", "org3.example.com"),
        ];
        let policy = format!(
            "OR({})",
            organizations
                .iter()
                .map(|org| format!("'{}.member'", org.msp_id))
                .collect::<Vec<_>>()
                .join(",")
        );
        Self {
            channel: "mychannel".into(),
            chaincode: "usdt-secret".into(),
            organizations,
            collections: vec![CollectionConfig {
                name: COLLECTION.into(),
                policy,
                required_peer_count: 0,
                max_peer_count: 3,
                block_to_live: 0,
                member_only_read: true,
                member_only_write: true,
            }],
        }
    }
}

impl NetworkConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_slice(&bytes).map_err(|source| ConfigError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise the built-in network.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for collection in &self.collections {
            if !seen.insert(collection.name.as_str()) {
                return Err(ConfigError::DuplicateCollection(collection.name.clone()));
            }
            collection.member_orgs()?;
            if collection.required_peer_count > collection.max_peer_count {
                return Err(ConfigError::PeerCount {
                    collection: collection.name.clone(),
                    required: collection.required_peer_count,
                    max: collection.max_peer_count,
                });
            }
        }
        Ok(())
    }

    pub fn org(&self, msp_id: &str) -> Option<&OrgConfig> {
        self.organizations.iter().find(|org| org.msp_id == msp_id)
    }

    pub fn org_for_role(&self, role: &str) -> Option<&OrgConfig> {
        self.organizations.iter().find(|org| org.role == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_network_matches_bank_setup() {
        let config = NetworkConfig::default();
        config.validate().unwrap();
        assert_eq!(config.channel, "mychannel");
        assert_eq!(config.chaincode, "usdt-secret");
        assert_eq!(config.org_for_role("BankB").unwrap().msp_id, "Org2MSP");
        assert_eq!(
            config.org("Org1MSP").unwrap().admin,
            "Admin@org1.example.com"
        );
        let members = config.collections[0].member_orgs().unwrap();
        assert_eq!(
            members.into_iter().collect::<Vec<_>>(),
            vec!["Org1MSP", "Org2MSP", "Org3MSP"]
        );
    }

    #[test]
    fn policy_parsing_ignores_combinator_and_roles() {
        let collection = CollectionConfig {
            name: "c".into(),
            policy: "OutOf(1, 'Org1MSP.peer', AND('Org2MSP.admin', 'Org1MSP.member'))".into(),
            required_peer_count: 0,
            max_peer_count: 1,
            block_to_live: 0,
            member_only_read: true,
            member_only_write: true,
        };
        let members = collection.member_orgs().unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.contains("Org1MSP"));
        assert!(members.contains("Org2MSP"));
    }

    #[test]
    fn policy_without_principals_is_rejected() {
        let mut config = NetworkConfig::default();
        config.collections[0].policy = "OR()".into();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Policy { .. }
        ));
    }

    #[test]
    fn peer_counts_are_checked() {
        let mut config = NetworkConfig::default();
        config.collections[0].required_peer_count = 4;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::PeerCount {
                required: 4,
                max: 3,
                ..
            }
        ));
    }

    #[test]
    fn loads_collections_config_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.json");
        let json = r#"{
            "channel": "vaultchannel",
            "chaincode": "usdt-secret",
            "organizations": [
                {"mspId": "Org1MSP", "role": "BankA", "admin": "Admin@org1.example.com"}
            ],
            "collections": [
                {"name": "USDTSecretCollection", "policy": "OR('Org1MSP.member')",
                 "requiredPeerCount": 0, "maxPeerCount": 1, "blockToLive": 5,
                 "memberOnlyRead": true}
            ]
        }"#;
        fs::write(&path, json).unwrap();
        let config = NetworkConfig::load(&path).unwrap();
        assert_eq!(config.channel, "vaultchannel");
        assert_eq!(config.collections[0].block_to_live, 5);
        assert!(!config.collections[0].member_only_write);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = NetworkConfig::load(Path::new("/nonexistent/network.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/network.json"));
    }
}
