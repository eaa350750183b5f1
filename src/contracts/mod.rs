use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::identity::ClientIdentity;

/// Private data collection holding the reserve record.
pub const COLLECTION: &str = "USDTSecretCollection";
/// The only key this contract ever reads or writes.
pub const RESERVE_KEY: &str = "reserve_total";
/// Balance written by every mint.
pub const RESERVE_VALUE: f64 = 2.5;

/// Function name the contract runtime reserves for metadata queries.
pub const GET_METADATA: &str = "org.hyperledger.fabric:GetMetadata";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReserveAsset {
    pub id: String,
    pub value: f64,
}

impl ReserveAsset {
    pub fn reserve_total() -> Self {
        Self {
            id: RESERVE_KEY.to_string(),
            value: RESERVE_VALUE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StubError {
    #[error("collection {0} not defined")]
    UnknownCollection(String),
    #[error("tx creator {msp_id} does not have write access permission on collection {collection}")]
    WriteDenied { msp_id: String, collection: String },
}

/// Ledger access the host hands to a running transaction.
pub trait ChaincodeStub {
    fn tx_id(&self) -> &str;
    fn channel_id(&self) -> &str;
    /// Returns `Ok(None)` both when the key is absent and when the caller's
    /// organisation may not see the collection.
    fn get_private_data(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>, StubError>;
    fn put_private_data(&self, collection: &str, key: &str, value: Vec<u8>) -> Result<(), StubError>;
}

pub trait TransactionContext {
    fn stub(&self) -> &dyn ChaincodeStub;
    fn client_identity(&self) -> &ClientIdentity;
}

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("failed to put private data: {0}")]
    PutPrivateData(StubError),
    #[error("failed to read private data: {0}")]
    GetPrivateData(StubError),
    #[error("Asset not found or you are NOT authorized")]
    NotFoundOrUnauthorized,
    #[error("function {function} not found in contract {contract}")]
    FunctionNotFound { contract: String, function: String },
    #[error("incorrect number of params. expected {expected}, received {received}")]
    IncorrectParams { expected: usize, received: usize },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Submit,
    Evaluate,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionMetadata {
    pub name: String,
    pub tag: TransactionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractMetadata {
    pub name: String,
    pub transactions: Vec<TransactionMetadata>,
}

/// A callable chaincode: named transactions routed by function name.
pub trait Contract {
    fn name(&self) -> &str;
    fn transactions(&self) -> Vec<TransactionMetadata>;
    fn invoke(
        &self,
        ctx: &dyn TransactionContext,
        function: &str,
        args: &[String],
    ) -> Result<Vec<u8>, ContractError>;

    fn metadata(&self) -> ContractMetadata {
        ContractMetadata {
            name: self.name().to_string(),
            transactions: self.transactions(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct UsdtVault;

impl UsdtVault {
    pub fn new() -> Self {
        Self
    }

    pub fn mint(&self, ctx: &dyn TransactionContext) -> Result<(), ContractError> {
        let asset = ReserveAsset::reserve_total();
        let asset_json = serde_json::to_vec(&asset)?;

        ctx.stub()
            .put_private_data(COLLECTION, RESERVE_KEY, asset_json)
            .map_err(ContractError::PutPrivateData)?;

        info!(
            tx_id = ctx.stub().tx_id(),
            msp = %ctx.client_identity().msp_id,
            value = asset.value,
            "reserve minted"
        );
        Ok(())
    }

    pub fn read_balance(&self, ctx: &dyn TransactionContext) -> Result<ReserveAsset, ContractError> {
        let asset_json = ctx
            .stub()
            .get_private_data(COLLECTION, RESERVE_KEY)
            .map_err(ContractError::GetPrivateData)?;

        // absent and unauthorized look identical from here
        let asset_json = match asset_json {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => {
                debug!(
                    tx_id = ctx.stub().tx_id(),
                    msp = %ctx.client_identity().msp_id,
                    "reserve not visible to caller"
                );
                return Err(ContractError::NotFoundOrUnauthorized);
            }
        };

        Ok(serde_json::from_slice(&asset_json)?)
    }
}

fn expect_no_args(args: &[String]) -> Result<(), ContractError> {
    if !args.is_empty() {
        return Err(ContractError::IncorrectParams {
            expected: 0,
            received: args.len(),
        });
    }
    Ok(())
}

impl Contract for UsdtVault {
    fn name(&self) -> &str {
        "UsdtVault"
    }

    fn transactions(&self) -> Vec<TransactionMetadata> {
        vec![
            TransactionMetadata {
                name: "Mint".into(),
                tag: TransactionKind::Submit,
                returns: None,
            },
            TransactionMetadata {
                name: "ReadBalance".into(),
                tag: TransactionKind::Evaluate,
                returns: Some("ReserveAsset".into()),
            },
        ]
    }

    fn invoke(
        &self,
        ctx: &dyn TransactionContext,
        function: &str,
        args: &[String],
    ) -> Result<Vec<u8>, ContractError> {
        match function {
            "Mint" => {
                expect_no_args(args)?;
                self.mint(ctx)?;
                Ok(Vec::new())
            }
            "ReadBalance" => {
                expect_no_args(args)?;
                let asset = self.read_balance(ctx)?;
                Ok(serde_json::to_vec(&asset)?)
            }
            GET_METADATA => Ok(serde_json::to_vec(&self.metadata())?),
            _ => Err(ContractError::FunctionNotFound {
                contract: self.name().to_string(),
                function: function.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::collections::BTreeMap;

    struct FakeContext {
        identity: ClientIdentity,
        visible: bool,
        fail_reads: bool,
        fail_writes: bool,
        data: RefCell<BTreeMap<(String, String), Vec<u8>>>,
    }

    impl FakeContext {
        fn new() -> Self {
            Self {
                identity: ClientIdentity {
                    msp_id: "Org1MSP".into(),
                    name: "Admin@org1.example.com".into(),
                },
                visible: true,
                fail_reads: false,
                fail_writes: false,
                data: RefCell::new(BTreeMap::new()),
            }
        }
    }

    impl ChaincodeStub for FakeContext {
        fn tx_id(&self) -> &str {
            "tx-1"
        }

        fn channel_id(&self) -> &str {
            "mychannel"
        }

        fn get_private_data(
            &self,
            collection: &str,
            key: &str,
        ) -> Result<Option<Vec<u8>>, StubError> {
            if self.fail_reads {
                return Err(StubError::UnknownCollection(collection.to_string()));
            }
            if !self.visible {
                return Ok(None);
            }
            Ok(self
                .data
                .borrow()
                .get(&(collection.to_string(), key.to_string()))
                .cloned())
        }

        fn put_private_data(
            &self,
            collection: &str,
            key: &str,
            value: Vec<u8>,
        ) -> Result<(), StubError> {
            if self.fail_writes {
                return Err(StubError::WriteDenied {
                    msp_id: self.identity.msp_id.clone(),
                    collection: collection.to_string(),
                });
            }
            self.data
                .borrow_mut()
                .insert((collection.to_string(), key.to_string()), value);
            Ok(())
        }
    }

    impl TransactionContext for FakeContext {
        fn stub(&self) -> &dyn ChaincodeStub {
            self
        }

        fn client_identity(&self) -> &ClientIdentity {
            &self.identity
        }
    }

    #[test]
    fn mint_then_read_returns_reserve() {
        let ctx = FakeContext::new();
        let vault = UsdtVault::new();
        vault.mint(&ctx).unwrap();
        let asset = vault.read_balance(&ctx).unwrap();
        assert_eq!(asset.id, "reserve_total");
        assert_eq!(asset.value, 2.5);
    }

    #[test]
    fn mint_writes_wire_format_under_fixed_key() {
        let ctx = FakeContext::new();
        UsdtVault::new().mint(&ctx).unwrap();
        let stored = ctx
            .data
            .borrow()
            .get(&(COLLECTION.to_string(), RESERVE_KEY.to_string()))
            .cloned()
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&stored).unwrap();
        assert_eq!(json, serde_json::json!({"id": "reserve_total", "value": 2.5}));
    }

    #[test]
    fn mint_is_idempotent() {
        let ctx = FakeContext::new();
        let vault = UsdtVault::new();
        vault.mint(&ctx).unwrap();
        let first = vault.read_balance(&ctx).unwrap();
        vault.mint(&ctx).unwrap();
        vault.mint(&ctx).unwrap();
        assert_eq!(vault.read_balance(&ctx).unwrap(), first);
        assert_eq!(ctx.data.borrow().len(), 1);
    }

    #[test]
    fn read_before_mint_is_not_found() {
        let ctx = FakeContext::new();
        let err = UsdtVault::new().read_balance(&ctx).unwrap_err();
        assert!(matches!(err, ContractError::NotFoundOrUnauthorized));
        assert_eq!(err.to_string(), "Asset not found or you are NOT authorized");
    }

    #[test]
    fn hidden_collection_reads_as_not_found() {
        let mut ctx = FakeContext::new();
        UsdtVault::new().mint(&ctx).unwrap();
        ctx.visible = false;
        let err = UsdtVault::new().read_balance(&ctx).unwrap_err();
        assert!(matches!(err, ContractError::NotFoundOrUnauthorized));
    }

    #[test]
    fn write_failure_is_wrapped() {
        let mut ctx = FakeContext::new();
        ctx.fail_writes = true;
        let err = UsdtVault::new().mint(&ctx).unwrap_err();
        assert!(matches!(err, ContractError::PutPrivateData(_)));
        assert!(err.to_string().starts_with("failed to put private data: "));
    }

    #[test]
    fn read_failure_is_wrapped_not_conflated() {
        let mut ctx = FakeContext::new();
        UsdtVault::new().mint(&ctx).unwrap();
        ctx.fail_reads = true;
        let err = UsdtVault::new().read_balance(&ctx).unwrap_err();
        assert!(matches!(err, ContractError::GetPrivateData(_)));
        assert!(err.to_string().starts_with("failed to read private data: "));
    }

    #[test]
    fn corrupt_record_surfaces_serialization_error() {
        let ctx = FakeContext::new();
        ctx.put_private_data(COLLECTION, RESERVE_KEY, b"{not json".to_vec())
            .unwrap();
        let err = UsdtVault::new().read_balance(&ctx).unwrap_err();
        assert!(matches!(err, ContractError::Serialization(_)));
    }

    #[test]
    fn record_survives_json_round_trip() {
        let asset = ReserveAsset::reserve_total();
        let decoded: ReserveAsset =
            serde_json::from_slice(&serde_json::to_vec(&asset).unwrap()).unwrap();
        assert_eq!(decoded, asset);
    }

    #[test]
    fn dispatch_routes_and_rejects() {
        let ctx = FakeContext::new();
        let vault = UsdtVault::new();
        assert!(vault.invoke(&ctx, "Mint", &[]).unwrap().is_empty());

        let payload = vault.invoke(&ctx, "ReadBalance", &[]).unwrap();
        let asset: ReserveAsset = serde_json::from_slice(&payload).unwrap();
        assert_eq!(asset, ReserveAsset::reserve_total());

        let err = vault.invoke(&ctx, "Burn", &[]).unwrap_err();
        assert_eq!(err.to_string(), "function Burn not found in contract UsdtVault");

        let err = vault
            .invoke(&ctx, "Mint", &["100".to_string()])
            .unwrap_err();
        assert!(matches!(
            err,
            ContractError::IncorrectParams {
                expected: 0,
                received: 1
            }
        ));
    }

    #[test]
    fn metadata_tags_transactions() {
        let ctx = FakeContext::new();
        let payload = UsdtVault::new().invoke(&ctx, GET_METADATA, &[]).unwrap();
        let meta: ContractMetadata = serde_json::from_slice(&payload).unwrap();
        assert_eq!(meta.name, "UsdtVault");
        assert_eq!(meta.transactions.len(), 2);
        assert_eq!(meta.transactions[0].tag, TransactionKind::Submit);
        assert_eq!(meta.transactions[1].tag, TransactionKind::Evaluate);
    }
}
