//! USDT reserve vault.
//!
//! A two-transaction chaincode that mints a fixed reserve record into the
//! `USDTSecretCollection` private data collection and reads it back, plus the
//! pieces needed to run it outside a production peer:
//!
//! * [`contracts`]: the vault contract and the host traits it is written against.
//! * [`identity`]: MSP identities, signed proposals and transaction ids.
//! * [`ledger`]: versioned private-data collections with MVCC commit and purge.
//! * [`peer`]: proposal authentication, simulation and commit.
//! * [`gateway`]: bank roles, wallets and the balance query.
//! * [`config`]: channel, organisations and collection definitions.

mod codec;
pub mod config;
pub mod contracts;
pub mod gateway;
pub mod identity;
pub mod ledger;
pub mod peer;
