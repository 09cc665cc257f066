//! Per-chain listener: subscribes to the door account's transaction history
//! stream, filters and normalizes push messages into federator events.
//!
//! Uninteresting traffic is dropped at trace level; messages that pass the
//! filters but are missing required pieces are dropped at warn. Neither is an
//! error: the stream carries plenty of transactions that are not ours.

use std::sync::{Arc, RwLock, Weak};

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tracing::{trace, warn};

use crate::{
    client::{ReplyCallback, WebsocketClient, Wire},
    events::{
        Direction, FederatorEvent, XChainAccountCreateCommitDetected, XChainCommitDetected,
        XChainTransferResult,
    },
    federator::Federator,
    types::{AccountId, Amount, Bridge, EngineResult, TxHash},
};

/// Which chain of the bridge this listener observes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ChainSide {
    Locking,
    Issuing,
}

impl ChainSide {
    pub fn name(self) -> &'static str {
        match self {
            ChainSide::Locking => "locking",
            ChainSide::Issuing => "issuing",
        }
    }

    pub fn door(self, bridge: &Bridge) -> AccountId {
        match self {
            ChainSide::Locking => bridge.locking_chain_door,
            ChainSide::Issuing => bridge.issuing_chain_door,
        }
    }

    /// Direction of a user deposit observed on this chain.
    fn commit_direction(self) -> Direction {
        match self {
            ChainSide::Locking => Direction::LockingToIssuing,
            ChainSide::Issuing => Direction::IssuingToLocking,
        }
    }

    /// Direction of the transfer that triggered a door-account claim
    /// observed on this chain (the source is the opposite side).
    fn result_direction(self) -> Direction {
        self.commit_direction().opposite()
    }
}

enum TxnType {
    Commit,
    Claim,
    CreateAccount,
}

pub struct ChainListener {
    side: ChainSide,
    bridge: Bridge,
    federator: Weak<Federator>,
    client: RwLock<Option<Arc<dyn Wire>>>,
}

impl ChainListener {
    pub fn new(side: ChainSide, bridge: Bridge, federator: Weak<Federator>) -> Arc<ChainListener> {
        Arc::new(ChainListener {
            side,
            bridge,
            federator,
            client: RwLock::new(None),
        })
    }

    pub fn side(&self) -> ChainSide {
        self.side
    }

    /// Open the websocket transport. Needs the listener behind an `Arc`
    /// because the client keeps non-owning callbacks into it; subscriptions
    /// are (re)issued from the connect callback on every connect.
    pub fn init(self: &Arc<Self>, endpoint: &str) {
        let on_push = {
            let listener = Arc::downgrade(self);
            Arc::new(move |msg: Value| {
                if let Some(listener) = listener.upgrade() {
                    listener.process_message(&msg);
                }
            }) as Arc<dyn Fn(Value) + Send + Sync>
        };
        let on_connect = {
            let listener = Arc::downgrade(self);
            Arc::new(move || {
                if let Some(listener) = listener.upgrade() {
                    listener.subscribe();
                }
            }) as Arc<dyn Fn() + Send + Sync>
        };
        let client = WebsocketClient::connect(endpoint.to_string(), on_push, on_connect);
        self.attach_client(client);
    }

    /// Install the transport this listener sends through.
    pub fn attach_client(&self, client: Arc<dyn Wire>) {
        *self.client.write().unwrap() = Some(client);
    }

    pub fn shutdown(&self) {
        if let Some(client) = self.client.read().unwrap().as_ref() {
            client.shutdown();
        }
    }

    pub fn send(&self, command: &str, params: Value) -> Result<u32> {
        trace!(chain = self.side.name(), command, %params, "chain listener send");
        match self.client.read().unwrap().as_ref() {
            Some(client) => client.send(command, params),
            None => Err(anyhow!("no transport attached")),
        }
    }

    pub fn send_with_callback(
        &self,
        command: &str,
        params: Value,
        on_reply: ReplyCallback,
    ) -> Result<u32> {
        trace!(chain = self.side.name(), command, "chain listener send");
        match self.client.read().unwrap().as_ref() {
            Some(client) => client.send_with_callback(command, params, on_reply),
            None => Err(anyhow!("no transport attached")),
        }
    }

    fn subscribe(&self) {
        let params = json!({
            "account_history_tx_stream": {
                "account": self.side.door(&self.bridge).to_base58(),
            }
        });
        if let Err(e) = self.send("subscribe", params) {
            warn!(chain = self.side.name(), error = %e, "subscribe failed");
        }
    }

    /// Tell the endpoint to stop replaying historical transactions; the live
    /// subscription stays up.
    pub fn stop_historical_txns(&self) {
        let params = json!({
            "account_history_tx_stream": {
                "account": self.side.door(&self.bridge).to_base58(),
                "stop_history_tx_only": true,
            }
        });
        if let Err(e) = self.send("unsubscribe", params) {
            warn!(chain = self.side.name(), error = %e, "stop history failed");
        }
    }

    fn push_event(&self, event: FederatorEvent) {
        // Non-owning back-reference: a federator mid-teardown just misses
        // the event.
        if let Some(federator) = self.federator.upgrade() {
            federator.push(event);
        }
    }

    pub fn process_message(&self, msg: &Value) {
        let chain = self.side.name();
        trace!(chain, %msg, "chain listener message");

        if !msg.get("validated").and_then(Value::as_bool).unwrap_or(false) {
            trace!(chain, reason = "not validated", "ignoring chain message");
            return;
        }
        let Some(result_code) = msg.get("engine_result_code").and_then(Value::as_i64) else {
            trace!(chain, reason = "no engine result code", "ignoring chain message");
            return;
        };
        let status = EngineResult(result_code as i32);
        let Some(history_index) = msg.get("account_history_tx_index").and_then(Value::as_i64)
        else {
            trace!(chain, reason = "no account history tx index", "ignoring chain message");
            return;
        };
        let rpc_order = history_index as i32;
        let Some(meta) = msg.get("meta").filter(|m| m.is_object()) else {
            trace!(chain, reason = "no tx meta", "ignoring chain message");
            return;
        };
        if msg.get("type").and_then(Value::as_str) != Some("transaction") {
            trace!(chain, reason = "not a transaction", "ignoring chain message");
            return;
        }
        let Some(txn) = msg.get("transaction") else {
            trace!(chain, reason = "no transaction body", "ignoring chain message");
            return;
        };

        let txn_type = match txn.get("TransactionType").and_then(Value::as_str) {
            Some("XChainCommit") => TxnType::Commit,
            Some("XChainClaim") => TxnType::Claim,
            Some("SidechainXChainAccountCreate") => TxnType::CreateAccount,
            _ => {
                trace!(chain, reason = "not a bridge transaction", "ignoring chain message");
                return;
            }
        };

        let bridge: Bridge = match txn.get("XChainBridge").cloned() {
            Some(v) => match serde_json::from_value(v) {
                Ok(bridge) => bridge,
                Err(e) => {
                    trace!(chain, reason = "unparseable bridge", error = %e, "ignoring chain message");
                    return;
                }
            },
            None => {
                trace!(chain, reason = "missing bridge", "ignoring chain message");
                return;
            }
        };
        if bridge != self.bridge {
            trace!(chain, reason = "bridge mismatch", "ignoring chain message");
            return;
        }

        let Some(txn_hash) = txn
            .get("hash")
            .and_then(Value::as_str)
            .and_then(|s| TxHash::from_hex(s).ok())
        else {
            warn!(chain, reason = "no tx hash", "ignoring chain message");
            return;
        };
        if parse_u64(txn.get("Sequence")).is_none() {
            warn!(chain, reason = "no tx sequence", "ignoring chain message");
            return;
        }
        let Some(ledger_seq) = msg.get("ledger_index").and_then(Value::as_u64) else {
            warn!(chain, reason = "no ledger index", "ignoring chain message");
            return;
        };
        let ledger_seq = ledger_seq as u32;
        let ledger_boundary = msg
            .get("account_history_boundary")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        // Prefer the delivered amount the ledger actually recorded; fall
        // back to the transaction's stated amount.
        let delivered_amount = meta
            .get("delivered_amount")
            .or_else(|| txn.get("Amount"))
            .and_then(|v| Amount::from_json(v).ok());

        let Some(source) = txn
            .get("Account")
            .and_then(Value::as_str)
            .and_then(|s| AccountId::from_base58(s).ok())
        else {
            warn!(chain, reason = "no source account", "ignoring chain message");
            return;
        };

        let dst_field = match txn_type {
            TxnType::Commit => "OtherChainAccount",
            TxnType::Claim | TxnType::CreateAccount => "Destination",
        };
        let destination = txn
            .get(dst_field)
            .and_then(Value::as_str)
            .and_then(|s| AccountId::from_base58(s).ok());

        match txn_type {
            TxnType::Claim => {
                let Some(claim_id) = parse_u64(txn.get("XChainClaimID")) else {
                    warn!(chain, reason = "no claim id", "ignoring chain message");
                    return;
                };
                let Some(destination) = destination else {
                    warn!(chain, reason = "no destination in claim", "ignoring chain message");
                    return;
                };
                self.push_event(FederatorEvent::TransferResult(XChainTransferResult {
                    direction: self.side.result_direction(),
                    destination,
                    delivered_amount,
                    claim_id,
                    ledger_seq,
                    txn_hash,
                    status,
                    rpc_order,
                }));
            }
            TxnType::Commit => {
                let Some(claim_id) = parse_u64(txn.get("XChainClaimID")) else {
                    warn!(chain, reason = "no claim id", "ignoring chain message");
                    return;
                };
                self.push_event(FederatorEvent::Commit(XChainCommitDetected {
                    direction: self.side.commit_direction(),
                    source,
                    bridge,
                    delivered_amount,
                    claim_id,
                    other_chain_account: destination,
                    ledger_seq,
                    txn_hash,
                    status,
                    rpc_order,
                    ledger_boundary,
                }));
            }
            TxnType::CreateAccount => {
                let Some(create_count) = extract_create_count(meta) else {
                    warn!(chain, reason = "no create count in meta", "ignoring chain message");
                    return;
                };
                let Some(reward_amount) = txn
                    .get("SignatureReward")
                    .and_then(|v| Amount::from_json(v).ok())
                else {
                    warn!(chain, reason = "no signature reward", "ignoring chain message");
                    return;
                };
                let Some(destination) = destination else {
                    warn!(chain, reason = "no destination in account create", "ignoring chain message");
                    return;
                };
                self.push_event(FederatorEvent::AccountCreate(
                    XChainAccountCreateCommitDetected {
                        direction: self.side.commit_direction(),
                        source,
                        bridge,
                        delivered_amount,
                        reward_amount,
                        create_count,
                        destination,
                        ledger_seq,
                        txn_hash,
                        status,
                        rpc_order,
                        ledger_boundary,
                    },
                ));
            }
        }
    }
}

fn parse_u64(v: Option<&Value>) -> Option<u64> {
    match v? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s
            .parse::<u64>()
            .ok()
            .or_else(|| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()),
        _ => None,
    }
}

/// The create count is the bridge ledger entry's account-create counter
/// after the transaction, recorded in the affected-nodes metadata.
fn extract_create_count(meta: &Value) -> Option<u64> {
    for node in meta.get("AffectedNodes")?.as_array()? {
        let Some(entry) = node.get("ModifiedNode").or_else(|| node.get("CreatedNode")) else {
            continue;
        };
        if entry.get("LedgerEntryType").and_then(Value::as_str) != Some("Bridge") {
            continue;
        }
        let Some(fields) = entry.get("FinalFields").or_else(|| entry.get("NewFields")) else {
            continue;
        };
        if let Some(count) = parse_u64(fields.get("XChainAccountCreateCount")) {
            return Some(count);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        crypto::{KeyType, SecretKey},
        db::Db,
        federator::make_federator,
        types::Issue,
    };

    fn bridge() -> Bridge {
        Bridge {
            locking_chain_door: AccountId([1u8; 20]),
            locking_chain_issue: Issue::xrp(),
            issuing_chain_door: AccountId([2u8; 20]),
            issuing_chain_issue: Issue::xrp(),
        }
    }

    fn setup(side: ChainSide) -> (Arc<Federator>, Arc<ChainListener>) {
        let federator = make_federator(
            Arc::new(Db::new(None).unwrap()),
            bridge(),
            SecretKey::random(KeyType::Secp256k1),
            AccountId([11u8; 20]),
            AccountId([12u8; 20]),
            true,
        );
        let listener = federator.listener(side).unwrap();
        (federator, listener)
    }

    fn commit_msg() -> Value {
        json!({
            "type": "transaction",
            "validated": true,
            "engine_result_code": 0,
            "account_history_tx_index": 5,
            "ledger_index": 1000,
            "meta": { "delivered_amount": "10000000" },
            "transaction": {
                "TransactionType": "XChainCommit",
                "XChainBridge": serde_json::to_value(bridge()).unwrap(),
                "Account": AccountId([3u8; 20]).to_base58(),
                "OtherChainAccount": AccountId([4u8; 20]).to_base58(),
                "Amount": "10000000",
                "XChainClaimID": "7",
                "hash": "AB".repeat(32),
                "Sequence": 1,
            },
        })
    }

    #[test]
    fn commit_on_locking_chain_emits_locking_to_issuing() {
        let (federator, listener) = setup(ChainSide::Locking);
        listener.process_message(&commit_msg());

        let events = federator.drain_events_for_test();
        assert_eq!(events.len(), 1);
        let FederatorEvent::Commit(e) = &events[0] else {
            panic!("expected commit event, got {}", events[0].name());
        };
        assert_eq!(e.direction, Direction::LockingToIssuing);
        assert_eq!(e.claim_id, 7);
        assert_eq!(e.source, AccountId([3u8; 20]));
        assert_eq!(e.other_chain_account, Some(AccountId([4u8; 20])));
        assert_eq!(e.delivered_amount, Some(Amount::drops(10_000_000)));
        assert_eq!(e.ledger_seq, 1000);
        assert_eq!(e.rpc_order, 5);
        assert!(e.status.is_success());
        assert!(!e.ledger_boundary);
    }

    #[test]
    fn commit_on_issuing_chain_emits_issuing_to_locking() {
        let (federator, listener) = setup(ChainSide::Issuing);
        listener.process_message(&commit_msg());

        let events = federator.drain_events_for_test();
        let FederatorEvent::Commit(e) = &events[0] else {
            panic!("expected commit event");
        };
        assert_eq!(e.direction, Direction::IssuingToLocking);
    }

    #[test]
    fn filter_chain_drops_uninteresting_traffic() {
        let (federator, listener) = setup(ChainSide::Locking);

        let mut not_validated = commit_msg();
        not_validated["validated"] = json!(false);
        listener.process_message(&not_validated);

        let mut no_result_code = commit_msg();
        no_result_code.as_object_mut().unwrap().remove("engine_result_code");
        listener.process_message(&no_result_code);

        let mut no_history_index = commit_msg();
        no_history_index.as_object_mut().unwrap().remove("account_history_tx_index");
        listener.process_message(&no_history_index);

        let mut no_meta = commit_msg();
        no_meta.as_object_mut().unwrap().remove("meta");
        listener.process_message(&no_meta);

        let mut wrong_type = commit_msg();
        wrong_type["type"] = json!("ledgerClosed");
        listener.process_message(&wrong_type);

        let mut payment = commit_msg();
        payment["transaction"]["TransactionType"] = json!("Payment");
        listener.process_message(&payment);

        let mut other_bridge = commit_msg();
        other_bridge["transaction"]["XChainBridge"]["IssuingChainDoor"] =
            json!(AccountId([9u8; 20]).to_base58());
        listener.process_message(&other_bridge);

        assert!(federator.drain_events_for_test().is_empty());
    }

    #[test]
    fn missing_claim_id_drops_message() {
        let (federator, listener) = setup(ChainSide::Locking);
        let mut msg = commit_msg();
        msg["transaction"].as_object_mut().unwrap().remove("XChainClaimID");
        listener.process_message(&msg);
        assert!(federator.drain_events_for_test().is_empty());
    }

    #[test]
    fn delivered_amount_prefers_metadata() {
        let (federator, listener) = setup(ChainSide::Locking);
        let mut msg = commit_msg();
        msg["meta"]["delivered_amount"] = json!("9999999");
        listener.process_message(&msg);

        let events = federator.drain_events_for_test();
        let FederatorEvent::Commit(e) = &events[0] else {
            panic!("expected commit event");
        };
        assert_eq!(e.delivered_amount, Some(Amount::drops(9_999_999)));
    }

    #[test]
    fn claim_emits_transfer_result_with_opposite_source() {
        let (federator, listener) = setup(ChainSide::Issuing);
        let mut msg = commit_msg();
        msg["transaction"]["TransactionType"] = json!("XChainClaim");
        msg["transaction"]["Destination"] = json!(AccountId([8u8; 20]).to_base58());
        listener.process_message(&msg);

        let events = federator.drain_events_for_test();
        assert_eq!(events.len(), 1);
        let FederatorEvent::TransferResult(e) = &events[0] else {
            panic!("expected transfer result, got {}", events[0].name());
        };
        // Observed on the issuing chain, so the triggering transfer came
        // from the locking chain.
        assert_eq!(e.direction, Direction::LockingToIssuing);
        assert_eq!(e.claim_id, 7);
        assert_eq!(e.destination, AccountId([8u8; 20]));
    }

    #[test]
    fn account_create_extracts_count_from_meta() {
        let (federator, listener) = setup(ChainSide::Locking);
        let mut msg = commit_msg();
        msg["transaction"]["TransactionType"] = json!("SidechainXChainAccountCreate");
        msg["transaction"]["Destination"] = json!(AccountId([6u8; 20]).to_base58());
        msg["transaction"]["SignatureReward"] = json!("1000");
        msg["meta"]["AffectedNodes"] = json!([
            { "DeletedNode": { "LedgerEntryType": "Offer" } },
            {
                "ModifiedNode": {
                    "LedgerEntryType": "Bridge",
                    "FinalFields": { "XChainAccountCreateCount": "3" },
                }
            },
        ]);
        listener.process_message(&msg);

        let events = federator.drain_events_for_test();
        assert_eq!(events.len(), 1);
        let FederatorEvent::AccountCreate(e) = &events[0] else {
            panic!("expected account create, got {}", events[0].name());
        };
        assert_eq!(e.create_count, 3);
        assert_eq!(e.reward_amount, Amount::drops(1000));
        assert_eq!(e.destination, AccountId([6u8; 20]));
        assert_eq!(e.direction, Direction::LockingToIssuing);
    }

    #[test]
    fn account_create_without_count_is_dropped() {
        let (federator, listener) = setup(ChainSide::Locking);
        let mut msg = commit_msg();
        msg["transaction"]["TransactionType"] = json!("SidechainXChainAccountCreate");
        msg["transaction"]["Destination"] = json!(AccountId([6u8; 20]).to_base58());
        msg["transaction"]["SignatureReward"] = json!("1000");
        listener.process_message(&msg);
        assert!(federator.drain_events_for_test().is_empty());
    }

    #[test]
    fn ledger_boundary_flag_carries_through() {
        let (federator, listener) = setup(ChainSide::Locking);
        let mut msg = commit_msg();
        msg["account_history_boundary"] = json!(true);
        listener.process_message(&msg);

        let events = federator.drain_events_for_test();
        let FederatorEvent::Commit(e) = &events[0] else {
            panic!("expected commit event");
        };
        assert!(e.ledger_boundary);
    }

    #[test]
    fn parse_u64_accepts_number_decimal_and_hex() {
        assert_eq!(parse_u64(Some(&json!(7))), Some(7));
        assert_eq!(parse_u64(Some(&json!("7"))), Some(7));
        assert_eq!(parse_u64(Some(&json!("0x10"))), Some(16));
        assert_eq!(parse_u64(Some(&json!("xyz"))), None);
        assert_eq!(parse_u64(None), None);
    }
}
