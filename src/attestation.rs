//! Signed witness attestations and the batches submitted to the chains.

use serde_json::{json, Value};

use crate::{
    crypto::{PublicKey, SecretKey, SignatureBytes},
    ser,
    types::{AccountId, Amount, Bridge},
};

/// A witness's signed statement that a claim transfer was observed and
/// validated on its source chain.
#[derive(Clone, Debug)]
pub struct ClaimAttestation {
    pub public_key: PublicKey,
    pub signature: SignatureBytes,
    pub sending_account: AccountId,
    pub sending_amount: Amount,
    pub reward_account: AccountId,
    pub was_locking_chain_send: bool,
    pub claim_id: u64,
    pub destination: Option<AccountId>,
}

impl ClaimAttestation {
    /// Sign a fresh attestation over the canonical claim message.
    #[allow(clippy::too_many_arguments)]
    pub fn sign(
        key: &SecretKey,
        bridge: &Bridge,
        sending_account: AccountId,
        sending_amount: Amount,
        reward_account: AccountId,
        was_locking_chain_send: bool,
        claim_id: u64,
        destination: Option<AccountId>,
    ) -> anyhow::Result<ClaimAttestation> {
        let message = ser::claim_attestation_message(
            bridge,
            &sending_account,
            &sending_amount,
            &reward_account,
            was_locking_chain_send,
            claim_id,
            destination.as_ref(),
        );
        let signature = key.sign(&message)?;
        Ok(ClaimAttestation {
            public_key: key.public_key(),
            signature,
            sending_account,
            sending_amount,
            reward_account,
            was_locking_chain_send,
            claim_id,
            destination,
        })
    }

    pub fn message(&self, bridge: &Bridge) -> Vec<u8> {
        ser::claim_attestation_message(
            bridge,
            &self.sending_account,
            &self.sending_amount,
            &self.reward_account,
            self.was_locking_chain_send,
            self.claim_id,
            self.destination.as_ref(),
        )
    }

    pub fn verify(&self, bridge: &Bridge) -> bool {
        self.public_key.verify(&self.message(bridge), &self.signature)
    }

    pub fn to_json(&self) -> Value {
        let mut element = json!({
            "Account": self.sending_account.to_base58(),
            "Amount": self.sending_amount.to_json(),
            "AttestationRewardAccount": self.reward_account.to_base58(),
            "PublicKey": self.public_key.to_string(),
            "Signature": self.signature.to_string(),
            "WasLockingChainSend": self.was_locking_chain_send as u8,
            "XChainClaimID": self.claim_id.to_string(),
        });
        if let Some(destination) = &self.destination {
            element["Destination"] = Value::String(destination.to_base58());
        }
        json!({ "XChainClaimAttestationBatchElement": element })
    }
}

/// Like [`ClaimAttestation`] but for first-time destination-account creation;
/// carries the signature reward and the per-direction create count, and the
/// destination is mandatory.
#[derive(Clone, Debug)]
pub struct CreateAccountAttestation {
    pub public_key: PublicKey,
    pub signature: SignatureBytes,
    pub sending_account: AccountId,
    pub sending_amount: Amount,
    pub reward_amount: Amount,
    pub reward_account: AccountId,
    pub was_locking_chain_send: bool,
    pub create_count: u64,
    pub destination: AccountId,
}

impl CreateAccountAttestation {
    #[allow(clippy::too_many_arguments)]
    pub fn sign(
        key: &SecretKey,
        bridge: &Bridge,
        sending_account: AccountId,
        sending_amount: Amount,
        reward_amount: Amount,
        reward_account: AccountId,
        was_locking_chain_send: bool,
        create_count: u64,
        destination: AccountId,
    ) -> anyhow::Result<CreateAccountAttestation> {
        let message = ser::create_account_attestation_message(
            bridge,
            &sending_account,
            &sending_amount,
            &reward_amount,
            &reward_account,
            was_locking_chain_send,
            create_count,
            &destination,
        );
        let signature = key.sign(&message)?;
        Ok(CreateAccountAttestation {
            public_key: key.public_key(),
            signature,
            sending_account,
            sending_amount,
            reward_amount,
            reward_account,
            was_locking_chain_send,
            create_count,
            destination,
        })
    }

    pub fn message(&self, bridge: &Bridge) -> Vec<u8> {
        ser::create_account_attestation_message(
            bridge,
            &self.sending_account,
            &self.sending_amount,
            &self.reward_amount,
            &self.reward_account,
            self.was_locking_chain_send,
            self.create_count,
            &self.destination,
        )
    }

    pub fn verify(&self, bridge: &Bridge) -> bool {
        self.public_key.verify(&self.message(bridge), &self.signature)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "XChainCreateAccountAttestationBatchElement": {
                "Account": self.sending_account.to_base58(),
                "Amount": self.sending_amount.to_json(),
                "SignatureReward": self.reward_amount.to_json(),
                "AttestationRewardAccount": self.reward_account.to_base58(),
                "Destination": self.destination.to_base58(),
                "PublicKey": self.public_key.to_string(),
                "Signature": self.signature.to_string(),
                "WasLockingChainSend": self.was_locking_chain_send as u8,
                "XChainAccountCreateCount": self.create_count.to_string(),
            }
        })
    }
}

/// An ordered set of attestations for one bridge, in the shape the chain's
/// `XChainAddAttestation` transaction expects.
#[derive(Clone, Debug)]
pub struct AttestationBatch {
    pub bridge: Bridge,
    pub claims: Vec<ClaimAttestation>,
    pub creates: Vec<CreateAccountAttestation>,
}

impl AttestationBatch {
    pub fn len(&self) -> usize {
        self.claims.len() + self.creates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> Value {
        json!({
            "XChainBridge": serde_json::to_value(&self.bridge).unwrap(),
            "XChainClaimAttestationBatch":
                self.claims.iter().map(ClaimAttestation::to_json).collect::<Vec<_>>(),
            "XChainCreateAccountAttestationBatch":
                self.creates.iter().map(CreateAccountAttestation::to_json).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyType;
    use crate::types::Issue;

    fn bridge() -> Bridge {
        Bridge {
            locking_chain_door: AccountId([1u8; 20]),
            locking_chain_issue: Issue::xrp(),
            issuing_chain_door: AccountId([2u8; 20]),
            issuing_chain_issue: Issue::xrp(),
        }
    }

    #[test]
    fn signed_claim_verifies() {
        let key = SecretKey::random(KeyType::Secp256k1);
        let att = ClaimAttestation::sign(
            &key,
            &bridge(),
            AccountId([3u8; 20]),
            Amount::drops(10_000_000),
            AccountId([4u8; 20]),
            true,
            7,
            Some(AccountId([5u8; 20])),
        )
        .unwrap();
        assert!(att.verify(&bridge()));

        let mut wrong_bridge = bridge();
        wrong_bridge.locking_chain_door = AccountId([9u8; 20]);
        assert!(!att.verify(&wrong_bridge));
    }

    #[test]
    fn signed_create_account_verifies() {
        let key = SecretKey::random(KeyType::Ed25519);
        let att = CreateAccountAttestation::sign(
            &key,
            &bridge(),
            AccountId([3u8; 20]),
            Amount::drops(20_000_000),
            Amount::drops(1_000),
            AccountId([4u8; 20]),
            false,
            3,
            AccountId([6u8; 20]),
        )
        .unwrap();
        assert!(att.verify(&bridge()));
    }

    #[test]
    fn batch_json_shape() {
        let key = SecretKey::random(KeyType::Secp256k1);
        let att = ClaimAttestation::sign(
            &key,
            &bridge(),
            AccountId([3u8; 20]),
            Amount::drops(1),
            AccountId([4u8; 20]),
            true,
            1,
            None,
        )
        .unwrap();
        let batch = AttestationBatch {
            bridge: bridge(),
            claims: vec![att],
            creates: vec![],
        };
        let json = batch.to_json();
        assert_eq!(json["XChainClaimAttestationBatch"].as_array().unwrap().len(), 1);
        assert!(json["XChainBridge"]["LockingChainDoor"].is_string());
        let element = &json["XChainClaimAttestationBatch"][0]["XChainClaimAttestationBatchElement"];
        assert_eq!(element["XChainClaimID"], "1");
        assert_eq!(element["WasLockingChainSend"], 1);
    }
}
