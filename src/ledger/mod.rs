use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{CollectionConfig, ConfigError};
use crate::contracts::{ChaincodeStub, StubError, TransactionContext};
use crate::identity::ClientIdentity;

/// Version stamp of a committed write.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Height {
    pub block_num: u64,
    pub tx_num: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionedValue {
    #[serde(with = "crate::codec::base64_bytes")]
    pub value: Vec<u8>,
    pub version: Height,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("transaction {tx_id} invalidated: MVCC_READ_CONFLICT on {collection}/{key}")]
    MvccReadConflict {
        tx_id: String,
        collection: String,
        key: String,
    },
    #[error("transaction {0} invalidated: DUPLICATE_TXID")]
    DuplicateTxId(String),
    #[error("failed to access ledger snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode ledger snapshot {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to encode ledger snapshot: {0}")]
    Encode(serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Persisted form of the ledger.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub height: Height,
    pub collections: BTreeMap<String, BTreeMap<String, VersionedValue>>,
    #[serde(default)]
    pub committed_txs: BTreeSet<String>,
}

struct Collection {
    config: CollectionConfig,
    members: BTreeSet<String>,
    entries: BTreeMap<String, VersionedValue>,
}

/// Private data held by the peer, one keyspace per collection.
pub struct PrivateLedger {
    collections: BTreeMap<String, Collection>,
    height: Height,
    /// Every committed tx id, never pruned, like the peer's tx index.
    committed_txs: BTreeSet<String>,
}

impl PrivateLedger {
    pub fn new(configs: &[CollectionConfig]) -> Result<Self, LedgerError> {
        let mut collections = BTreeMap::new();
        for config in configs {
            let members = config.member_orgs()?;
            collections.insert(
                config.name.clone(),
                Collection {
                    config: config.clone(),
                    members,
                    entries: BTreeMap::new(),
                },
            );
        }
        Ok(Self {
            collections,
            height: Height::default(),
            committed_txs: BTreeSet::new(),
        })
    }

    pub fn height(&self) -> Height {
        self.height
    }

    fn collection(&self, name: &str) -> Result<&Collection, StubError> {
        self.collections
            .get(name)
            .ok_or_else(|| StubError::UnknownCollection(name.to_string()))
    }

    pub fn is_member(&self, collection: &str, msp_id: &str) -> Result<bool, StubError> {
        Ok(self.collection(collection)?.members.contains(msp_id))
    }

    pub fn can_read(&self, collection: &str, msp_id: &str) -> Result<bool, StubError> {
        let collection = self.collection(collection)?;
        Ok(collection.members.contains(msp_id) || !collection.config.member_only_read)
    }

    pub fn can_write(&self, collection: &str, msp_id: &str) -> Result<bool, StubError> {
        let collection = self.collection(collection)?;
        Ok(collection.members.contains(msp_id) || !collection.config.member_only_write)
    }

    pub fn committed(&self, collection: &str, key: &str) -> Option<&VersionedValue> {
        self.collections.get(collection)?.entries.get(key)
    }

    /// Starts a transaction against the current committed state.
    pub fn simulate(
        &self,
        tx_id: impl Into<String>,
        channel_id: impl Into<String>,
        creator: ClientIdentity,
    ) -> TxSimulator<'_> {
        let tx_id = tx_id.into();
        TxSimulator {
            ledger: self,
            rwset: RefCell::new(TxRwSet::new(tx_id.clone())),
            tx_id,
            channel_id: channel_id.into(),
            creator,
        }
    }

    /// Validates the read set against committed versions and, if nothing
    /// moved underneath it, applies the write set as a new block.
    pub fn commit(&mut self, rwset: TxRwSet) -> Result<Height, LedgerError> {
        if self.committed_txs.contains(&rwset.tx_id) {
            return Err(LedgerError::DuplicateTxId(rwset.tx_id));
        }
        for ((collection, key), read_version) in &rwset.reads {
            let current = self.committed(collection, key).map(|v| v.version);
            if current != *read_version {
                warn!(
                    tx_id = %rwset.tx_id,
                    collection = %collection,
                    key = %key,
                    "read version changed before commit"
                );
                return Err(LedgerError::MvccReadConflict {
                    tx_id: rwset.tx_id.clone(),
                    collection: collection.clone(),
                    key: key.clone(),
                });
            }
        }

        let height = Height {
            block_num: self.height.block_num + 1,
            tx_num: 0,
        };
        let writes = rwset.writes.len();
        for ((collection, key), value) in rwset.writes {
            if let Some(collection) = self.collections.get_mut(&collection) {
                collection.entries.insert(
                    key,
                    VersionedValue {
                        value,
                        version: height,
                    },
                );
            }
        }
        self.height = height;
        info!(tx_id = %rwset.tx_id, block = height.block_num, writes, "transaction committed");
        self.committed_txs.insert(rwset.tx_id);
        self.purge_expired();
        Ok(height)
    }

    fn purge_expired(&mut self) {
        let block = self.height.block_num;
        for (name, collection) in &mut self.collections {
            let block_to_live = collection.config.block_to_live;
            if block_to_live == 0 {
                continue;
            }
            collection.entries.retain(|key, entry| {
                // past u64::MAX the entry simply never expires
                let keep = entry
                    .version
                    .block_num
                    .checked_add(block_to_live)
                    .map_or(true, |last_live| block <= last_live);
                if !keep {
                    debug!(collection = %name, key = %key, block, "purged expired private data");
                }
                keep
            });
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            height: self.height,
            collections: self
                .collections
                .iter()
                .map(|(name, collection)| (name.clone(), collection.entries.clone()))
                .collect(),
            committed_txs: self.committed_txs.clone(),
        }
    }

    pub fn restore(configs: &[CollectionConfig], snapshot: Snapshot) -> Result<Self, LedgerError> {
        let mut ledger = Self::new(configs)?;
        for (name, entries) in snapshot.collections {
            match ledger.collections.get_mut(&name) {
                Some(collection) => collection.entries = entries,
                None => warn!(collection = %name, "snapshot collection not configured, dropping it"),
            }
        }
        ledger.height = snapshot.height;
        ledger.committed_txs = snapshot.committed_txs;
        Ok(ledger)
    }

    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        let bytes = serde_json::to_vec_pretty(&self.snapshot()).map_err(LedgerError::Encode)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        fs::write(path, bytes).map_err(|source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads a snapshot from `path`; a missing file yields an empty ledger.
    pub fn load(path: &Path, configs: &[CollectionConfig]) -> Result<Self, LedgerError> {
        if !path.exists() {
            info!(path = %path.display(), "no ledger snapshot, starting at genesis");
            return Self::new(configs);
        }
        let bytes = fs::read(path).map_err(|source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|source| LedgerError::Decode {
                path: path.to_path_buf(),
                source,
            })?;
        Self::restore(configs, snapshot)
    }
}

/// Keys observed and written by one simulated transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxRwSet {
    pub tx_id: String,
    reads: BTreeMap<(String, String), Option<Height>>,
    writes: BTreeMap<(String, String), Vec<u8>>,
}

impl TxRwSet {
    fn new(tx_id: String) -> Self {
        Self {
            tx_id,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Transaction context handed to the contract: a stub over committed state
/// that records reads and buffers writes until commit.
pub struct TxSimulator<'a> {
    ledger: &'a PrivateLedger,
    tx_id: String,
    channel_id: String,
    creator: ClientIdentity,
    rwset: RefCell<TxRwSet>,
}

impl TxSimulator<'_> {
    pub fn into_rwset(self) -> TxRwSet {
        self.rwset.into_inner()
    }
}

impl ChaincodeStub for TxSimulator<'_> {
    fn tx_id(&self) -> &str {
        &self.tx_id
    }

    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn get_private_data(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>, StubError> {
        if !self.ledger.can_read(collection, &self.creator.msp_id)? {
            debug!(
                tx_id = %self.tx_id,
                msp = %self.creator.msp_id,
                collection,
                "creator outside collection, returning no data"
            );
            return Ok(None);
        }
        let committed = self.ledger.committed(collection, key);
        self.rwset
            .borrow_mut()
            .reads
            .insert((collection.to_string(), key.to_string()), committed.map(|v| v.version));
        Ok(committed.map(|v| v.value.clone()))
    }

    fn put_private_data(&self, collection: &str, key: &str, value: Vec<u8>) -> Result<(), StubError> {
        if !self.ledger.can_write(collection, &self.creator.msp_id)? {
            return Err(StubError::WriteDenied {
                msp_id: self.creator.msp_id.clone(),
                collection: collection.to_string(),
            });
        }
        self.rwset
            .borrow_mut()
            .writes
            .insert((collection.to_string(), key.to_string()), value);
        Ok(())
    }
}

impl TransactionContext for TxSimulator<'_> {
    fn stub(&self) -> &dyn ChaincodeStub {
        self
    }

    fn client_identity(&self) -> &ClientIdentity {
        &self.creator
    }
}
