//! Canonical binary serialization for signed and persisted chain values.
//!
//! The chain defines a field-tagged binary format for its objects; amounts,
//! accounts, bridges and attestation signing messages must be produced in
//! exactly this form so signatures verify on-chain and stored blobs survive
//! field-definition upgrades. Only the pieces the witness signs or persists
//! are implemented here.

use crate::types::{AccountId, Amount, Bridge, Issue};

// Wire type codes.
const TYPE_UINT64: u8 = 3;
const TYPE_AMOUNT: u8 = 6;
const TYPE_ACCOUNT: u8 = 8;
const TYPE_UINT8: u8 = 16;
const TYPE_ISSUE: u8 = 24;
const TYPE_BRIDGE: u8 = 25;

// (type, field) pairs for the fields that appear in attestation messages.
pub const FIELD_XCHAIN_CLAIM_ID: (u8, u8) = (TYPE_UINT64, 20);
pub const FIELD_XCHAIN_CREATE_COUNT: (u8, u8) = (TYPE_UINT64, 21);
pub const FIELD_AMOUNT: (u8, u8) = (TYPE_AMOUNT, 1);
pub const FIELD_SIGNATURE_REWARD: (u8, u8) = (TYPE_AMOUNT, 29);
pub const FIELD_OTHER_CHAIN_SOURCE: (u8, u8) = (TYPE_ACCOUNT, 18);
pub const FIELD_OTHER_CHAIN_DESTINATION: (u8, u8) = (TYPE_ACCOUNT, 19);
pub const FIELD_REWARD_ACCOUNT: (u8, u8) = (TYPE_ACCOUNT, 21);
pub const FIELD_LOCKING_CHAIN_DOOR: (u8, u8) = (TYPE_ACCOUNT, 22);
pub const FIELD_ISSUING_CHAIN_DOOR: (u8, u8) = (TYPE_ACCOUNT, 23);
pub const FIELD_LOCKING_CHAIN_ISSUE: (u8, u8) = (TYPE_ISSUE, 1);
pub const FIELD_ISSUING_CHAIN_ISSUE: (u8, u8) = (TYPE_ISSUE, 2);
pub const FIELD_WAS_LOCKING_CHAIN_SEND: (u8, u8) = (TYPE_UINT8, 19);
pub const FIELD_XCHAIN_BRIDGE: (u8, u8) = (TYPE_BRIDGE, 1);

const NOT_NATIVE_BIT: u64 = 0x8000_0000_0000_0000;
const POSITIVE_BIT: u64 = 0x4000_0000_0000_0000;

/// Append-only canonical serializer.
#[derive(Default)]
pub struct Serializer {
    buf: Vec<u8>,
}

impl Serializer {
    pub fn new() -> Serializer {
        Serializer::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // Field header: one to three bytes depending on the magnitudes of the
    // type and field codes.
    fn field_header(&mut self, (type_code, field_code): (u8, u8)) {
        match (type_code < 16, field_code < 16) {
            (true, true) => self.buf.push((type_code << 4) | field_code),
            (true, false) => {
                self.buf.push(type_code << 4);
                self.buf.push(field_code);
            }
            (false, true) => {
                self.buf.push(field_code);
                self.buf.push(type_code);
            }
            (false, false) => {
                self.buf.push(0);
                self.buf.push(type_code);
                self.buf.push(field_code);
            }
        }
    }

    fn vl_length(&mut self, len: usize) {
        if len <= 192 {
            self.buf.push(len as u8);
        } else if len <= 12_480 {
            let len = len - 193;
            self.buf.push(193 + (len >> 8) as u8);
            self.buf.push((len & 0xff) as u8);
        } else {
            let len = len - 12_481;
            self.buf.push(241 + (len >> 16) as u8);
            self.buf.push(((len >> 8) & 0xff) as u8);
            self.buf.push((len & 0xff) as u8);
        }
    }

    pub fn add_u8(&mut self, field: (u8, u8), value: u8) {
        self.field_header(field);
        self.buf.push(value);
    }

    pub fn add_u64(&mut self, field: (u8, u8), value: u64) {
        self.field_header(field);
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn add_account(&mut self, field: (u8, u8), account: &AccountId) {
        self.field_header(field);
        self.vl_length(20);
        self.buf.extend_from_slice(account.as_bytes());
    }

    pub fn add_amount(&mut self, field: (u8, u8), amount: &Amount) {
        self.field_header(field);
        self.buf.extend_from_slice(&encode_amount(amount));
    }

    pub fn add_issue(&mut self, field: (u8, u8), issue: &Issue) {
        self.field_header(field);
        self.buf.extend_from_slice(&encode_issue(issue));
    }

    pub fn add_bridge(&mut self, field: (u8, u8), bridge: &Bridge) {
        self.field_header(field);
        self.buf.extend_from_slice(&encode_bridge(bridge));
    }
}

/// Amount wire form: 8 bytes for the native asset (positive bit set over the
/// drop count), 48 bytes for an issued asset (sign/exponent/mantissa word,
/// 160-bit currency, 160-bit issuer).
pub fn encode_amount(amount: &Amount) -> Vec<u8> {
    match amount {
        Amount::Drops(drops) => (POSITIVE_BIT | drops).to_be_bytes().to_vec(),
        Amount::Issued {
            value,
            currency,
            issuer,
        } => {
            let word = if value.is_zero() {
                NOT_NATIVE_BIT
            } else {
                let sign = if value.negative { 0 } else { POSITIVE_BIT };
                let exponent = ((value.exponent + 97) as u64) << 54;
                NOT_NATIVE_BIT | sign | exponent | value.mantissa
            };
            let mut out = Vec::with_capacity(48);
            out.extend_from_slice(&word.to_be_bytes());
            out.extend_from_slice(&currency.0);
            out.extend_from_slice(issuer.as_bytes());
            out
        }
    }
}

/// Issue wire form: the currency alone for the native asset, currency plus
/// issuer otherwise.
pub fn encode_issue(issue: &Issue) -> Vec<u8> {
    let mut out = Vec::with_capacity(40);
    out.extend_from_slice(&issue.currency.0);
    if let Some(issuer) = &issue.issuer {
        out.extend_from_slice(issuer.as_bytes());
    }
    out
}

/// Bridge wire form: the two door accounts and two issues in canonical field
/// order. This is the blob persisted alongside every attestation.
pub fn encode_bridge(bridge: &Bridge) -> Vec<u8> {
    let mut s = Serializer::new();
    s.add_account(FIELD_LOCKING_CHAIN_DOOR, &bridge.locking_chain_door);
    s.add_issue(FIELD_LOCKING_CHAIN_ISSUE, &bridge.locking_chain_issue);
    s.add_account(FIELD_ISSUING_CHAIN_DOOR, &bridge.issuing_chain_door);
    s.add_issue(FIELD_ISSUING_CHAIN_ISSUE, &bridge.issuing_chain_issue);
    s.into_bytes()
}

/// The message a witness signs to attest to a claim transfer.
#[allow(clippy::too_many_arguments)]
pub fn claim_attestation_message(
    bridge: &Bridge,
    sending_account: &AccountId,
    sending_amount: &Amount,
    reward_account: &AccountId,
    was_locking_chain_send: bool,
    claim_id: u64,
    destination: Option<&AccountId>,
) -> Vec<u8> {
    let mut s = Serializer::new();
    s.add_bridge(FIELD_XCHAIN_BRIDGE, bridge);
    s.add_account(FIELD_OTHER_CHAIN_SOURCE, sending_account);
    s.add_amount(FIELD_AMOUNT, sending_amount);
    s.add_account(FIELD_REWARD_ACCOUNT, reward_account);
    s.add_u8(FIELD_WAS_LOCKING_CHAIN_SEND, was_locking_chain_send as u8);
    s.add_u64(FIELD_XCHAIN_CLAIM_ID, claim_id);
    if let Some(destination) = destination {
        s.add_account(FIELD_OTHER_CHAIN_DESTINATION, destination);
    }
    s.into_bytes()
}

/// The message a witness signs to attest to an account-create transfer.
#[allow(clippy::too_many_arguments)]
pub fn create_account_attestation_message(
    bridge: &Bridge,
    sending_account: &AccountId,
    sending_amount: &Amount,
    reward_amount: &Amount,
    reward_account: &AccountId,
    was_locking_chain_send: bool,
    create_count: u64,
    destination: &AccountId,
) -> Vec<u8> {
    let mut s = Serializer::new();
    s.add_bridge(FIELD_XCHAIN_BRIDGE, bridge);
    s.add_account(FIELD_OTHER_CHAIN_SOURCE, sending_account);
    s.add_amount(FIELD_AMOUNT, sending_amount);
    s.add_amount(FIELD_SIGNATURE_REWARD, reward_amount);
    s.add_account(FIELD_REWARD_ACCOUNT, reward_account);
    s.add_u8(FIELD_WAS_LOCKING_CHAIN_SEND, was_locking_chain_send as u8);
    s.add_u64(FIELD_XCHAIN_CREATE_COUNT, create_count);
    s.add_account(FIELD_OTHER_CHAIN_DESTINATION, destination);
    s.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Currency, IouValue};

    fn bridge() -> Bridge {
        Bridge {
            locking_chain_door: AccountId([1u8; 20]),
            locking_chain_issue: Issue::xrp(),
            issuing_chain_door: AccountId([2u8; 20]),
            issuing_chain_issue: Issue::xrp(),
        }
    }

    #[test]
    fn native_amount_encoding() {
        let bytes = encode_amount(&Amount::Drops(10_000_000));
        assert_eq!(bytes.len(), 8);
        assert_eq!(u64::from_be_bytes(bytes.try_into().unwrap()), 0x4000_0000_0098_9680);
    }

    #[test]
    fn issued_amount_encoding() {
        let amount = Amount::Issued {
            value: "1".parse::<IouValue>().unwrap(),
            currency: "USD".parse::<Currency>().unwrap(),
            issuer: AccountId([9u8; 20]),
        };
        let bytes = encode_amount(&amount);
        assert_eq!(bytes.len(), 48);
        let word = u64::from_be_bytes(bytes[..8].try_into().unwrap());
        // not-native and positive bits, exponent -15 biased by 97.
        assert_ne!(word & NOT_NATIVE_BIT, 0);
        assert_ne!(word & POSITIVE_BIT, 0);
        assert_eq!((word >> 54) & 0xff, (97 - 15) as u64);
        assert_eq!(word & ((1 << 54) - 1), 1_000_000_000_000_000);
    }

    #[test]
    fn zero_issued_amount_encoding() {
        let amount = Amount::Issued {
            value: IouValue::ZERO,
            currency: "USD".parse::<Currency>().unwrap(),
            issuer: AccountId([9u8; 20]),
        };
        let word = u64::from_be_bytes(encode_amount(&amount)[..8].try_into().unwrap());
        assert_eq!(word, NOT_NATIVE_BIT);
    }

    #[test]
    fn claim_message_is_deterministic() {
        let src = AccountId([3u8; 20]);
        let reward = AccountId([4u8; 20]);
        let amount = Amount::Drops(42);
        let a = claim_attestation_message(&bridge(), &src, &amount, &reward, true, 7, None);
        let b = claim_attestation_message(&bridge(), &src, &amount, &reward, true, 7, None);
        assert_eq!(a, b);
    }

    #[test]
    fn claim_message_binds_every_field() {
        let src = AccountId([3u8; 20]);
        let dst = AccountId([5u8; 20]);
        let reward = AccountId([4u8; 20]);
        let amount = Amount::Drops(42);
        let base = claim_attestation_message(&bridge(), &src, &amount, &reward, true, 7, None);

        let other_claim = claim_attestation_message(&bridge(), &src, &amount, &reward, true, 8, None);
        assert_ne!(base, other_claim);

        let other_dir = claim_attestation_message(&bridge(), &src, &amount, &reward, false, 7, None);
        assert_ne!(base, other_dir);

        let with_dst =
            claim_attestation_message(&bridge(), &src, &amount, &reward, true, 7, Some(&dst));
        assert_ne!(base, with_dst);
    }

    #[test]
    fn bridge_blob_distinguishes_bridges() {
        let a = encode_bridge(&bridge());
        let mut other = bridge();
        other.issuing_chain_door = AccountId([7u8; 20]);
        assert_ne!(a, encode_bridge(&other));
    }
}
