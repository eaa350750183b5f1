use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::OrgConfig;

const NONCE_SIZE: usize = 24;

/// Who invoked the running transaction, as the contract sees it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientIdentity {
    pub msp_id: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("creator MSP {0} is not known to this channel")]
    UnknownMsp(String),
    #[error("creator {name} is not enrolled with {msp_id}")]
    NotEnrolled { msp_id: String, name: String },
    #[error("malformed public key for creator {0}")]
    MalformedKey(String),
    #[error("malformed signature from creator {0}")]
    MalformedSignature(String),
    #[error("invalid signature from creator {0}")]
    InvalidSignature(String),
    #[error("key file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid hex in key file: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// An enrolled client: MSP membership plus the key it signs proposals with.
pub struct Identity {
    pub msp_id: String,
    pub name: String,
    signing_key: SigningKey,
}

impl Identity {
    pub fn generate(msp_id: impl Into<String>, name: impl Into<String>) -> Self {
        let mut rng = OsRng;
        Self {
            msp_id: msp_id.into(),
            name: name.into(),
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    pub fn from_secret_hex(
        msp_id: impl Into<String>,
        name: impl Into<String>,
        secret_hex: &str,
    ) -> Result<Self, IdentityError> {
        let msp_id = msp_id.into();
        let bytes = hex::decode(secret_hex.trim())?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdentityError::MalformedKey(msp_id.clone()))?;
        Ok(Self {
            msp_id,
            name: name.into(),
            signing_key: SigningKey::from_bytes(&secret),
        })
    }

    /// Reads `<crypto_dir>/<mspid>/sk.hex`.
    pub fn load(crypto_dir: &Path, org: &OrgConfig) -> Result<Self, IdentityError> {
        let path = crypto_dir.join(&org.msp_id).join("sk.hex");
        let secret_hex = read_key_file(&path)?;
        Self::from_secret_hex(&org.msp_id, &org.admin, &secret_hex)
    }

    /// Writes `sk.hex` and `pk.hex` under `<crypto_dir>/<mspid>/`.
    pub fn save(&self, crypto_dir: &Path) -> Result<PathBuf, IdentityError> {
        let dir = crypto_dir.join(&self.msp_id);
        fs::create_dir_all(&dir).map_err(|source| IdentityError::Io {
            path: dir.clone(),
            source,
        })?;
        write_key_file(&dir.join("sk.hex"), &hex::encode(self.signing_key.to_bytes()))?;
        write_key_file(
            &dir.join("pk.hex"),
            &hex::encode(self.verifying_key().as_bytes()),
        )?;
        Ok(dir)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn client_identity(&self) -> ClientIdentity {
        ClientIdentity {
            msp_id: self.msp_id.clone(),
            name: self.name.clone(),
        }
    }

    pub fn creator(&self) -> Creator {
        Creator {
            msp_id: self.msp_id.clone(),
            name: self.name.clone(),
            public_key: self.verifying_key().to_bytes().to_vec(),
        }
    }

    pub fn sign(&self, proposal: Proposal) -> SignedProposal {
        let signature = self.signing_key.sign(&proposal.digest());
        SignedProposal {
            proposal,
            signature: signature.to_bytes().to_vec(),
        }
    }
}

fn read_key_file(path: &Path) -> Result<String, IdentityError> {
    fs::read_to_string(path).map_err(|source| IdentityError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_key_file(path: &Path, contents: &str) -> Result<(), IdentityError> {
    fs::write(path, contents).map_err(|source| IdentityError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Creator {
    pub msp_id: String,
    pub name: String,
    #[serde(with = "crate::codec::hex_bytes")]
    pub public_key: Vec<u8>,
}

impl Creator {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for field in [self.msp_id.as_bytes(), self.name.as_bytes(), self.public_key.as_slice()] {
            buf.extend_from_slice(&(field.len() as u64).to_le_bytes());
            buf.extend_from_slice(field);
        }
        buf
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Proposal {
    pub channel_id: String,
    pub chaincode: String,
    pub function: String,
    pub args: Vec<String>,
    pub creator: Creator,
    #[serde(with = "crate::codec::hex_bytes")]
    pub nonce: Vec<u8>,
}

impl Proposal {
    pub fn new(
        channel_id: impl Into<String>,
        chaincode: impl Into<String>,
        function: impl Into<String>,
        args: Vec<String>,
        creator: Creator,
    ) -> Self {
        let mut nonce = vec![0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        Self {
            channel_id: channel_id.into(),
            chaincode: chaincode.into(),
            function: function.into(),
            args,
            creator,
            nonce,
        }
    }

    /// `hex(sha256(nonce || creator))`
    pub fn tx_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.nonce);
        hasher.update(self.creator.to_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        let mut field = |bytes: &[u8]| {
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };
        field(self.channel_id.as_bytes());
        field(self.chaincode.as_bytes());
        field(self.function.as_bytes());
        for arg in &self.args {
            field(arg.as_bytes());
        }
        field(&self.creator.to_bytes());
        field(&self.nonce);
        hasher.finalize().into()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedProposal {
    pub proposal: Proposal,
    #[serde(with = "crate::codec::hex_bytes")]
    pub signature: Vec<u8>,
}

/// Enrolled verifying keys, per MSP.
#[derive(Clone, Default)]
pub struct MspRegistry {
    members: BTreeMap<String, BTreeSet<[u8; 32]>>,
}

impl MspRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enroll(&mut self, msp_id: impl Into<String>, key: VerifyingKey) {
        self.members
            .entry(msp_id.into())
            .or_default()
            .insert(key.to_bytes());
    }

    /// Enrolls every organisation whose `pk.hex` exists under `crypto_dir`.
    pub fn from_crypto_dir(crypto_dir: &Path, orgs: &[OrgConfig]) -> Result<Self, IdentityError> {
        let mut registry = Self::new();
        for org in orgs {
            let path = crypto_dir.join(&org.msp_id).join("pk.hex");
            if !path.exists() {
                warn!(msp = %org.msp_id, path = %path.display(), "no public key, organisation not enrolled");
                continue;
            }
            let bytes = hex::decode(read_key_file(&path)?.trim())?;
            let key_bytes: [u8; 32] = bytes
                .try_into()
                .map_err(|_| IdentityError::MalformedKey(org.msp_id.clone()))?;
            let key = VerifyingKey::from_bytes(&key_bytes)
                .map_err(|_| IdentityError::MalformedKey(org.msp_id.clone()))?;
            registry.enroll(&org.msp_id, key);
        }
        Ok(registry)
    }

    pub fn msp_ids(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    pub fn authenticate(&self, signed: &SignedProposal) -> Result<ClientIdentity, IdentityError> {
        let creator = &signed.proposal.creator;
        let enrolled = self
            .members
            .get(&creator.msp_id)
            .ok_or_else(|| IdentityError::UnknownMsp(creator.msp_id.clone()))?;
        let key_bytes: [u8; 32] = creator
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| IdentityError::MalformedKey(creator.name.clone()))?;
        if !enrolled.contains(&key_bytes) {
            return Err(IdentityError::NotEnrolled {
                msp_id: creator.msp_id.clone(),
                name: creator.name.clone(),
            });
        }
        let key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| IdentityError::MalformedKey(creator.name.clone()))?;
        let signature = Signature::from_slice(&signed.signature)
            .map_err(|_| IdentityError::MalformedSignature(creator.name.clone()))?;
        key.verify_strict(&signed.proposal.digest(), &signature)
            .map_err(|_| IdentityError::InvalidSignature(creator.name.clone()))?;
        debug!(msp = %creator.msp_id, name = %creator.name, "proposal creator authenticated");
        Ok(ClientIdentity {
            msp_id: creator.msp_id.clone(),
            name: creator.name.clone(),
        })
    }
}
