//! Signature-harvesting lookups: a counterparty quotes the transfer it saw
//! and gets back this witness's stored attestation as a single-element batch.

use std::sync::Arc;

use anyhow::Result;
use jsonrpsee::{types::Params, RpcModule};
use serde_json::{json, Value};
use tracing::warn;

use crate::{
    api::RpcContext,
    attestation::{AttestationBatch, ClaimAttestation, CreateAccountAttestation},
    crypto::{PublicKey, SignatureBytes},
    db::{ClaimLookup, CreateAccountLookup},
    events::Direction,
    ser,
    types::{AccountId, Amount, Bridge},
};

pub fn rpc_module(ctx: Arc<RpcContext>) -> RpcModule<Arc<RpcContext>> {
    super::declare_module!(
        ctx,
        [
            ("witness", witness),
            ("witness_account_create", witness_account_create),
        ]
    )
}

fn witness(params: Params<'_>, ctx: &Arc<RpcContext>) -> Result<Value> {
    let request = super::request_object(params);
    do_witness(ctx, &request)
}

fn witness_account_create(params: Params<'_>, ctx: &Arc<RpcContext>) -> Result<Value> {
    let request = super::request_object(params);
    do_witness_account_create(ctx, &request)
}

fn opt_bridge(request: &Value, field: &str) -> Option<Bridge> {
    serde_json::from_value(request.get(field)?.clone()).ok()
}

fn opt_amount(request: &Value, field: &str) -> Option<Amount> {
    Amount::from_json(request.get(field)?).ok()
}

fn opt_u64(request: &Value, field: &str) -> Option<u64> {
    match request.get(field)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn opt_account(request: &Value, field: &str) -> Option<AccountId> {
    AccountId::from_base58(request.get(field)?.as_str()?).ok()
}

fn account_from_blob(blob: &[u8]) -> Option<AccountId> {
    <[u8; 20]>::try_from(blob).ok().map(AccountId)
}

/// Derive the transfer direction from the quoted door account, or explain
/// why neither door matches.
fn direction_for_door(bridge: &Bridge, door: AccountId) -> Result<Direction, Value> {
    if door == bridge.locking_chain_door {
        Ok(Direction::LockingToIssuing)
    } else if door == bridge.issuing_chain_door {
        Ok(Direction::IssuingToLocking)
    } else {
        Err(json!(
            "Specified door account does not match any bridge door account."
        ))
    }
}

pub fn do_witness(ctx: &RpcContext, request: &Value) -> Result<Value> {
    let mut result = json!({ "request": request.clone() });

    let bridge = opt_bridge(request, "bridge");
    let sending_amount = opt_amount(request, "sending_amount");
    let claim_id = opt_u64(request, "claim_id");
    let door = opt_account(request, "door");
    let sending_account = opt_account(request, "sending_account");
    let reward_account = opt_account(request, "reward_account");
    let destination = opt_account(request, "destination");

    let missing = if bridge.is_none() {
        Some("bridge")
    } else if sending_amount.is_none() {
        Some("sending_amount")
    } else if claim_id.is_none() {
        Some("claim_id")
    } else if door.is_none() {
        Some("door")
    } else if sending_account.is_none() {
        Some("sending_account")
    } else if reward_account.is_none() {
        Some("reward_account")
    } else {
        None
    };
    if let Some(field) = missing {
        result["error"] = json!(format!("Missing or invalid field: {field}"));
        return Ok(result);
    }
    let (bridge, sending_amount, claim_id, door, sending_account) = (
        bridge.unwrap(),
        sending_amount.unwrap(),
        claim_id.unwrap(),
        door.unwrap(),
        sending_account.unwrap(),
    );

    let direction = match direction_for_door(&bridge, door) {
        Ok(direction) => direction,
        Err(error) => {
            result["error"] = error;
            return Ok(result);
        }
    };

    let lookup = ClaimLookup {
        claim_id,
        delivered_amount: ser::encode_amount(&sending_amount),
        bridge: ser::encode_bridge(&bridge),
        sending_account: sending_account.as_bytes().to_vec(),
        other_chain_account: destination.map(|a| a.as_bytes().to_vec()),
    };
    let row = ctx.db.find_claim(direction, &lookup)?;

    let attestation = row.and_then(|row| {
        let public_key = PublicKey::from_bytes(&row.public_key).ok()?;
        let stored_reward = account_from_blob(&row.reward_account)?;
        let signature = row.signature?;
        Some(ClaimAttestation {
            public_key,
            signature: SignatureBytes(signature),
            sending_account,
            sending_amount: sending_amount.clone(),
            // The attestation commits to the reward account recorded at
            // observation time, not whatever the caller quoted.
            reward_account: stored_reward,
            was_locking_chain_send: direction.was_locking_chain_send(),
            claim_id,
            destination,
        })
    });

    match attestation {
        Some(attestation) => {
            let batch = AttestationBatch {
                bridge,
                claims: vec![attestation],
                creates: vec![],
            };
            result["result"] = json!({ "XChainAttestationBatch": batch.to_json() });
        }
        None => {
            warn!(claim_id, direction = %direction, "witness lookup found no attestation");
            result["error"] = json!("No such transaction");
        }
    }
    Ok(result)
}

pub fn do_witness_account_create(ctx: &RpcContext, request: &Value) -> Result<Value> {
    let mut result = json!({ "request": request.clone() });

    let bridge = opt_bridge(request, "bridge");
    let sending_amount = opt_amount(request, "sending_amount");
    let reward_amount = opt_amount(request, "reward_amount");
    let create_count = opt_u64(request, "create_count");
    let door = opt_account(request, "door");
    let sending_account = opt_account(request, "sending_account");
    let reward_account = opt_account(request, "reward_account");
    let destination = opt_account(request, "destination");

    let missing = if bridge.is_none() {
        Some("bridge")
    } else if sending_amount.is_none() {
        Some("sending_amount")
    } else if reward_amount.is_none() {
        Some("reward_amount")
    } else if create_count.is_none() {
        Some("create_count")
    } else if door.is_none() {
        Some("door")
    } else if sending_account.is_none() {
        Some("sending_account")
    } else if reward_account.is_none() {
        Some("reward_account")
    } else if destination.is_none() {
        Some("destination")
    } else {
        None
    };
    if let Some(field) = missing {
        result["error"] = json!(format!("Missing or invalid field: {field}"));
        return Ok(result);
    }
    let (bridge, sending_amount, reward_amount, create_count, door, sending_account, destination) = (
        bridge.unwrap(),
        sending_amount.unwrap(),
        reward_amount.unwrap(),
        create_count.unwrap(),
        door.unwrap(),
        sending_account.unwrap(),
        destination.unwrap(),
    );

    let direction = match direction_for_door(&bridge, door) {
        Ok(direction) => direction,
        Err(error) => {
            result["error"] = error;
            return Ok(result);
        }
    };

    let lookup = CreateAccountLookup {
        create_count,
        delivered_amount: ser::encode_amount(&sending_amount),
        reward_amount: ser::encode_amount(&reward_amount),
        bridge: ser::encode_bridge(&bridge),
        sending_account: sending_account.as_bytes().to_vec(),
        other_chain_account: destination.as_bytes().to_vec(),
    };
    let row = ctx.db.find_create_account(direction, &lookup)?;

    let attestation = row.and_then(|row| {
        let public_key = PublicKey::from_bytes(&row.public_key).ok()?;
        let stored_reward = account_from_blob(&row.reward_account)?;
        let signature = row.signature?;
        Some(CreateAccountAttestation {
            public_key,
            signature: SignatureBytes(signature),
            sending_account,
            sending_amount: sending_amount.clone(),
            reward_amount: reward_amount.clone(),
            reward_account: stored_reward,
            was_locking_chain_send: direction.was_locking_chain_send(),
            create_count,
            destination,
        })
    });

    match attestation {
        Some(attestation) => {
            let batch = AttestationBatch {
                bridge,
                claims: vec![],
                creates: vec![attestation],
            };
            result["result"] = json!({ "XChainAttestationBatch": batch.to_json() });
        }
        None => {
            warn!(create_count, direction = %direction, "witness lookup found no attestation");
            result["error"] = json!("No such transaction");
        }
    }
    Ok(result)
}
