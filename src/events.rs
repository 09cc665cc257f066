//! The event vocabulary flowing from the chain listeners to the federator.

use serde::Serialize;
use serde_json::Value;

use crate::types::{AccountId, Amount, Bridge, EngineResult, TxHash};

/// The corridor a transfer moves along. Always derived from which chain the
/// observing listener watches and which side of the door the transaction
/// touched, never taken from the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    LockingToIssuing,
    IssuingToLocking,
}

impl Direction {
    pub fn was_locking_chain_send(self) -> bool {
        self == Direction::LockingToIssuing
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::LockingToIssuing => Direction::IssuingToLocking,
            Direction::IssuingToLocking => Direction::LockingToIssuing,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::LockingToIssuing => write!(f, "lockingToIssuing"),
            Direction::IssuingToLocking => write!(f, "issuingToLocking"),
        }
    }
}

/// A user-initiated cross-chain deposit seen on its source chain.
#[derive(Clone, Debug, Serialize)]
pub struct XChainCommitDetected {
    pub direction: Direction,
    pub source: AccountId,
    pub bridge: Bridge,
    pub delivered_amount: Option<Amount>,
    pub claim_id: u64,
    pub other_chain_account: Option<AccountId>,
    pub ledger_seq: u32,
    pub txn_hash: TxHash,
    pub status: EngineResult,
    pub rpc_order: i32,
    pub ledger_boundary: bool,
}

/// A deposit that also creates the destination account, seen on its source
/// chain. Unlike a plain commit the destination is mandatory and the sender
/// pledges a signature reward.
#[derive(Clone, Debug, Serialize)]
pub struct XChainAccountCreateCommitDetected {
    pub direction: Direction,
    pub source: AccountId,
    pub bridge: Bridge,
    pub delivered_amount: Option<Amount>,
    pub reward_amount: Amount,
    pub create_count: u64,
    pub destination: AccountId,
    pub ledger_seq: u32,
    pub txn_hash: TxHash,
    pub status: EngineResult,
    pub rpc_order: i32,
    pub ledger_boundary: bool,
}

/// The door account's own claim transaction on a destination chain. The
/// direction is the direction of the triggering transfer, so a
/// locking-to-issuing result is a transaction observed on the issuing chain.
#[derive(Clone, Debug, Serialize)]
pub struct XChainTransferResult {
    pub direction: Direction,
    pub destination: AccountId,
    pub delivered_amount: Option<Amount>,
    pub claim_id: u64,
    pub ledger_seq: u32,
    pub txn_hash: TxHash,
    pub status: EngineResult,
    pub rpc_order: i32,
}

#[derive(Clone, Debug, Serialize)]
pub enum FederatorEvent {
    Commit(XChainCommitDetected),
    AccountCreate(XChainAccountCreateCommitDetected),
    TransferResult(XChainTransferResult),
    Heartbeat,
}

impl FederatorEvent {
    /// Structured form for log fields.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FederatorEvent::Commit(_) => "XChainCommitDetected",
            FederatorEvent::AccountCreate(_) => "XChainAccountCreateCommitDetected",
            FederatorEvent::TransferResult(_) => "XChainTransferResult",
            FederatorEvent::Heartbeat => "HeartbeatTimer",
        }
    }
}
