//! Client side of the vault: bank roles, their wallets, and the balance
//! query that walks a caller through the private-data read.

use std::{collections::BTreeMap, fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{NetworkConfig, OrgConfig};
use crate::contracts::{ReserveAsset, COLLECTION};
use crate::identity::{Identity, IdentityError, Proposal, SignedProposal};
use crate::peer::Peer;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unknown user identity {0}")]
    UnknownRole(String),
    #[error("no organisation configured for role {0}")]
    UnmappedRole(String),
    #[error("wallet has no identity for {0}")]
    MissingIdentity(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    BankA,
    BankB,
    Regulator,
    Outsider,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::BankA => "BankA",
            Role::BankB => "BankB",
            Role::Regulator => "Regulator",
            Role::Outsider => "Outsider",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BankA" => Ok(Role::BankA),
            "BankB" => Ok(Role::BankB),
            "Regulator" => Ok(Role::Regulator),
            "Outsider" => Ok(Role::Outsider),
            other => Err(GatewayError::UnknownRole(other.to_string())),
        }
    }
}

/// Signing identities available to the gateway, keyed by MSP id.
#[derive(Default)]
pub struct Wallet {
    identities: BTreeMap<String, Identity>,
}

impl Wallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identity: Identity) {
        self.identities.insert(identity.msp_id.clone(), identity);
    }

    pub fn get(&self, msp_id: &str) -> Option<&Identity> {
        self.identities.get(msp_id)
    }

    /// Loads every organisation that has an `sk.hex` under `crypto_dir`.
    pub fn load(crypto_dir: &Path, orgs: &[OrgConfig]) -> Result<Self, IdentityError> {
        let mut wallet = Self::new();
        for org in orgs {
            if !crypto_dir.join(&org.msp_id).join("sk.hex").exists() {
                warn!(msp = %org.msp_id, "no signing key in wallet");
                continue;
            }
            wallet.insert(Identity::load(crypto_dir, org)?);
        }
        Ok(wallet)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BalanceReport {
    pub success: bool,
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ReserveAsset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BalanceReport {
    fn failed(logs: Vec<String>, message: &str) -> Self {
        Self {
            success: false,
            logs,
            data: None,
            message: Some(message.to_string()),
        }
    }
}

pub struct Gateway<'a> {
    config: &'a NetworkConfig,
    wallet: &'a Wallet,
}

impl<'a> Gateway<'a> {
    pub fn new(config: &'a NetworkConfig, wallet: &'a Wallet) -> Self {
        Self { config, wallet }
    }

    /// Signs a proposal for the configured channel and chaincode as `msp_id`.
    pub fn proposal(
        &self,
        msp_id: &str,
        function: &str,
        args: Vec<String>,
    ) -> Result<SignedProposal, GatewayError> {
        let identity = self
            .wallet
            .get(msp_id)
            .ok_or_else(|| GatewayError::MissingIdentity(msp_id.to_string()))?;
        Ok(identity.sign(Proposal::new(
            &self.config.channel,
            &self.config.chaincode,
            function,
            args,
            identity.creator(),
        )))
    }

    pub fn query_balance(&self, peer: &Peer, role: Role) -> Result<BalanceReport, GatewayError> {
        let mut logs = vec![format!("[Init] Incoming request: identify as '{role}'")];

        if role == Role::Outsider {
            warn!(role = %role, "outsider balance request rejected");
            logs.push(format!(
                "[Policy] WARNING: user '{role}' is NOT in the collection policy."
            ));
            logs.push("[Peer] REJECTED: access denied to private data.".to_string());
            return Ok(BalanceReport::failed(logs, "Access Denied"));
        }

        let org = self
            .config
            .org_for_role(role.as_str())
            .ok_or_else(|| GatewayError::UnmappedRole(role.to_string()))?;
        logs.push(format!("[System] Locating crypto material for {}", org.msp_id));
        let signed = self.proposal(&org.msp_id, "ReadBalance", Vec::new())?;
        logs.push(format!(
            "[Auth] Signing as {} ({})",
            signed.proposal.creator.name, org.msp_id
        ));
        logs.push(format!(
            "[Chaincode] Invoking 'ReadBalance' on '{}' in channel '{}'",
            self.config.chaincode, self.config.channel
        ));
        if let Some(collection) = self.config.collections.iter().find(|c| c.name == COLLECTION) {
            logs.push(format!(
                "[Privacy] Peer is verifying membership policy: {}",
                collection.policy
            ));
        }

        let response = peer.evaluate(&signed);
        let asset = if response.is_success() {
            serde_json::from_slice::<ReserveAsset>(&response.payload).map_err(|err| err.to_string())
        } else {
            Err(response.message)
        };

        match asset {
            Ok(asset) => {
                info!(role = %role, tx_id = %response.tx_id, value = asset.value, "balance served");
                logs.push("[Privacy] Policy check passed.".to_string());
                logs.push(format!("[Ledger] Value retrieved: {} USDT", asset.value));
                Ok(BalanceReport {
                    success: true,
                    logs,
                    data: Some(asset),
                    message: None,
                })
            }
            Err(message) => {
                warn!(role = %role, tx_id = %response.tx_id, error = %message, "balance refused");
                logs.push(format!("[Error] {message}"));
                logs.push("[Peer] The peer refused to return the private data.".to_string());
                Ok(BalanceReport::failed(logs, "Authorization Failed"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identity::MspRegistry;
    use crate::ledger::PrivateLedger;

    fn setup(orgs: &[&str]) -> (NetworkConfig, Wallet, Peer) {
        let config = NetworkConfig::default();
        let mut wallet = Wallet::new();
        let mut registry = MspRegistry::new();
        for org in config.organizations.iter().filter(|o| orgs.contains(&o.msp_id.as_str())) {
            let identity = Identity::generate(&org.msp_id, &org.admin);
            registry.enroll(&org.msp_id, identity.verifying_key());
            wallet.insert(identity);
        }
        let ledger = PrivateLedger::new(&config.collections).unwrap();
        let peer = Peer::new(&config, registry, ledger);
        (config, wallet, peer)
    }

    #[test]
    fn roles_parse_and_display() {
        assert_eq!("Regulator".parse::<Role>().unwrap(), Role::Regulator);
        assert_eq!(Role::BankB.to_string(), "BankB");
        assert!(matches!(
            "Mallory".parse::<Role>().unwrap_err(),
            GatewayError::UnknownRole(_)
        ));
    }

    #[test]
    fn outsider_is_rejected_before_the_peer() {
        let (config, wallet, peer) = setup(&[]);
        let report = Gateway::new(&config, &wallet)
            .query_balance(&peer, Role::Outsider)
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.message.as_deref(), Some("Access Denied"));
        assert_eq!(report.logs.len(), 3);
    }

    #[test]
    fn bank_reads_minted_reserve() {
        let (config, wallet, mut peer) = setup(&["Org1MSP", "Org2MSP"]);
        let gateway = Gateway::new(&config, &wallet);
        let mint = gateway.proposal("Org1MSP", "Mint", Vec::new()).unwrap();
        assert!(peer.submit(&mint).is_success());

        let report = gateway.query_balance(&peer, Role::BankB).unwrap();
        assert!(report.success, "{:?}", report.logs);
        assert_eq!(report.data, Some(ReserveAsset::reserve_total()));
        assert_eq!(report.logs.last().unwrap(), "[Ledger] Value retrieved: 2.5 USDT");

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("message").is_none());
        assert_eq!(json["data"]["id"], "reserve_total");
    }

    #[test]
    fn unminted_reserve_fails_authorization() {
        let (config, wallet, peer) = setup(&["Org1MSP"]);
        let report = Gateway::new(&config, &wallet)
            .query_balance(&peer, Role::BankA)
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.message.as_deref(), Some("Authorization Failed"));
        assert!(report
            .logs
            .contains(&"[Error] Asset not found or you are NOT authorized".to_string()));
    }

    #[test]
    fn missing_wallet_identity_is_an_error() {
        let (config, wallet, peer) = setup(&["Org1MSP"]);
        let err = Gateway::new(&config, &wallet)
            .query_balance(&peer, Role::Regulator)
            .unwrap_err();
        assert!(matches!(err, GatewayError::MissingIdentity(msp) if msp == "Org3MSP"));
    }

    #[test]
    fn wallet_loads_from_crypto_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = NetworkConfig::default();
        let org = &config.organizations[0];
        Identity::generate(&org.msp_id, &org.admin)
            .save(dir.path())
            .unwrap();
        let wallet = Wallet::load(dir.path(), &config.organizations).unwrap();
        assert!(wallet.get("Org1MSP").is_some());
        assert!(wallet.get("Org2MSP").is_none());
    }
}
