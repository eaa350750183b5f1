//! Simulated endorsing peer.
//!
//! A peer owns the channel's private ledger and the chaincodes installed on
//! it. Each proposal is authenticated against the MSP registry, executed in
//! a fresh transaction simulator and answered with a [`ProposalResponse`].
//! `evaluate` throws the simulated writes away; `submit` validates and
//! commits them as a new block.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::NetworkConfig;
use crate::contracts::{Contract, ContractError, UsdtVault};
use crate::identity::{IdentityError, MspRegistry, SignedProposal};
use crate::ledger::{LedgerError, PrivateLedger, TxRwSet};

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_ERROR: u16 = 500;

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("access denied: {0}")]
    Identity(#[from] IdentityError),
    #[error("channel {actual} not joined, this peer serves {expected}")]
    ChannelMismatch { expected: String, actual: String },
    #[error("chaincode {0} not installed")]
    ChaincodeNotFound(String),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProposalResponse {
    pub tx_id: String,
    pub status: u16,
    pub message: String,
    #[serde(with = "crate::codec::base64_bytes")]
    pub payload: Vec<u8>,
}

impl ProposalResponse {
    pub fn success(tx_id: String, payload: Vec<u8>) -> Self {
        Self {
            tx_id,
            status: STATUS_OK,
            message: String::new(),
            payload,
        }
    }

    pub fn error(tx_id: String, status: u16, message: impl Into<String>) -> Self {
        Self {
            tx_id,
            status,
            message: message.into(),
            payload: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }
}

pub struct Peer {
    channel: String,
    registry: MspRegistry,
    ledger: PrivateLedger,
    chaincodes: BTreeMap<String, Box<dyn Contract>>,
}

impl Peer {
    /// Joins `config.channel` and installs the vault under `config.chaincode`.
    pub fn new(config: &NetworkConfig, registry: MspRegistry, ledger: PrivateLedger) -> Self {
        let mut peer = Self {
            channel: config.channel.clone(),
            registry,
            ledger,
            chaincodes: BTreeMap::new(),
        };
        peer.install(&config.chaincode, Box::new(UsdtVault::new()));
        peer
    }

    pub fn install(&mut self, name: &str, contract: Box<dyn Contract>) {
        info!(chaincode = name, contract = contract.name(), channel = %self.channel, "chaincode installed");
        self.chaincodes.insert(name.to_string(), contract);
    }

    pub fn ledger(&self) -> &PrivateLedger {
        &self.ledger
    }

    fn execute(&self, signed: &SignedProposal) -> Result<(Vec<u8>, TxRwSet), PeerError> {
        let proposal = &signed.proposal;
        let creator = self.registry.authenticate(signed)?;
        if proposal.channel_id != self.channel {
            return Err(PeerError::ChannelMismatch {
                expected: self.channel.clone(),
                actual: proposal.channel_id.clone(),
            });
        }
        let contract = self
            .chaincodes
            .get(&proposal.chaincode)
            .ok_or_else(|| PeerError::ChaincodeNotFound(proposal.chaincode.clone()))?;

        let sim = self
            .ledger
            .simulate(proposal.tx_id(), &proposal.channel_id, creator);
        let payload = contract.invoke(&sim, &proposal.function, &proposal.args)?;
        Ok((payload, sim.into_rwset()))
    }

    /// Runs the proposal without touching committed state.
    pub fn evaluate(&self, signed: &SignedProposal) -> ProposalResponse {
        let tx_id = signed.proposal.tx_id();
        match self.execute(signed) {
            Ok((payload, _)) => {
                info!(tx_id = %tx_id, function = %signed.proposal.function, "evaluated");
                ProposalResponse::success(tx_id, payload)
            }
            Err(err) => {
                warn!(tx_id = %tx_id, function = %signed.proposal.function, error = %err, "evaluation failed");
                ProposalResponse::error(tx_id, STATUS_ERROR, err.to_string())
            }
        }
    }

    /// Runs the proposal and commits its write set.
    pub fn submit(&mut self, signed: &SignedProposal) -> ProposalResponse {
        let tx_id = signed.proposal.tx_id();
        let outcome = self.execute(signed).and_then(|(payload, rwset)| {
            let height = self.ledger.commit(rwset)?;
            Ok((payload, height))
        });
        match outcome {
            Ok((payload, height)) => {
                info!(
                    tx_id = %tx_id,
                    function = %signed.proposal.function,
                    block = height.block_num,
                    "submitted"
                );
                ProposalResponse::success(tx_id, payload)
            }
            Err(err) => {
                warn!(tx_id = %tx_id, function = %signed.proposal.function, error = %err, "submit failed");
                ProposalResponse::error(tx_id, STATUS_ERROR, err.to_string())
            }
        }
    }
}
