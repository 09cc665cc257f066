//! Chain-facing value types: accounts, currencies, amounts, bridges and
//! transaction results.
//!
//! JSON renderings match what the observed chains emit on their transaction
//! streams, so these types deserialize directly out of push messages and
//! RPC requests.

use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// A 20-byte account identifier, rendered in the chain's base58-check form
/// (Ripple alphabet, version byte 0x00).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountId(pub [u8; 20]);

impl AccountId {
    pub fn from_base58(s: &str) -> Result<AccountId, TypeError> {
        let bytes = bs58::decode(s)
            .with_alphabet(bs58::Alphabet::RIPPLE)
            .with_check(Some(0x00))
            .into_vec()
            .map_err(|_| TypeError::BadAccount(s.to_string()))?;
        // First byte is the version, already checked above.
        if bytes.len() != 21 {
            return Err(TypeError::BadAccount(s.to_string()));
        }
        let mut id = [0u8; 20];
        id.copy_from_slice(&bytes[1..]);
        Ok(AccountId(id))
    }

    pub fn to_base58(self) -> String {
        let mut payload = Vec::with_capacity(21);
        payload.push(0x00);
        payload.extend_from_slice(&self.0);
        bs58::encode(payload)
            .with_alphabet(bs58::Alphabet::RIPPLE)
            .with_check()
            .into_string()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.to_base58())
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl FromStr for AccountId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountId::from_base58(s)
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        AccountId::from_base58(&s).map_err(de::Error::custom)
    }
}

/// A 160-bit currency code. Three-letter codes use the chain's standard
/// layout (ASCII at bytes 12..15, zero elsewhere); anything else is the raw
/// 160 bits in hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Currency(pub [u8; 20]);

impl Currency {
    pub const XRP: Currency = Currency([0u8; 20]);

    pub fn is_xrp(&self) -> bool {
        self.0 == [0u8; 20]
    }

    fn standard_code(&self) -> Option<String> {
        let mut rest = self.0;
        rest[12..15].copy_from_slice(&[0, 0, 0]);
        if rest != [0u8; 20] {
            return None;
        }
        let code = &self.0[12..15];
        if code.iter().all(|b| b.is_ascii_alphanumeric()) {
            Some(String::from_utf8(code.to_vec()).unwrap())
        } else {
            None
        }
    }
}

impl FromStr for Currency {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "XRP" {
            return Ok(Currency::XRP);
        }
        if s.len() == 3 && s.bytes().all(|b| b.is_ascii_alphanumeric()) {
            let mut bytes = [0u8; 20];
            bytes[12..15].copy_from_slice(s.as_bytes());
            return Ok(Currency(bytes));
        }
        if s.len() == 40 {
            let mut bytes = [0u8; 20];
            hex::decode_to_slice(s, &mut bytes)
                .map_err(|_| TypeError::BadCurrency(s.to_string()))?;
            return Ok(Currency(bytes));
        }
        Err(TypeError::BadCurrency(s.to_string()))
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_xrp() {
            return write!(f, "XRP");
        }
        match self.standard_code() {
            Some(code) => write!(f, "{code}"),
            None => write!(f, "{}", hex::encode_upper(self.0)),
        }
    }
}

impl fmt::Debug for Currency {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Currency({self})")
    }
}

impl Serialize for Currency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// The asset issued on one side of a bridge. The native asset has no issuer.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Issue {
    pub currency: Currency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<AccountId>,
}

impl Issue {
    pub fn xrp() -> Issue {
        Issue {
            currency: Currency::XRP,
            issuer: None,
        }
    }
}

/// The immutable 4-tuple identifying one cross-chain corridor. Field names
/// match the chain's `XChainBridge` JSON object.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bridge {
    #[serde(rename = "LockingChainDoor")]
    pub locking_chain_door: AccountId,
    #[serde(rename = "LockingChainIssue")]
    pub locking_chain_issue: Issue,
    #[serde(rename = "IssuingChainDoor")]
    pub issuing_chain_door: AccountId,
    #[serde(rename = "IssuingChainIssue")]
    pub issuing_chain_issue: Issue,
}

/// An issued-asset decimal value, held in the chain's mantissa/exponent
/// normal form so serialization is canonical.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct IouValue {
    pub mantissa: u64,
    pub exponent: i32,
    pub negative: bool,
}

const MANTISSA_MIN: u64 = 1_000_000_000_000_000;
const MANTISSA_MAX: u64 = 10_000_000_000_000_000;
const EXPONENT_MIN: i32 = -96;
const EXPONENT_MAX: i32 = 80;

impl IouValue {
    pub const ZERO: IouValue = IouValue {
        mantissa: 0,
        exponent: 0,
        negative: false,
    };

    pub fn is_zero(&self) -> bool {
        self.mantissa == 0
    }

    fn normalize(mut mantissa: u128, mut exponent: i32, negative: bool) -> Result<Self, TypeError> {
        if mantissa == 0 {
            return Ok(IouValue::ZERO);
        }
        while mantissa < MANTISSA_MIN as u128 {
            mantissa *= 10;
            exponent -= 1;
        }
        while mantissa >= MANTISSA_MAX as u128 {
            if mantissa % 10 != 0 {
                return Err(TypeError::BadValue("loses precision".into()));
            }
            mantissa /= 10;
            exponent += 1;
        }
        if !(EXPONENT_MIN..=EXPONENT_MAX).contains(&exponent) {
            return Err(TypeError::BadValue("exponent out of range".into()));
        }
        Ok(IouValue {
            mantissa: mantissa as u64,
            exponent,
            negative,
        })
    }
}

impl FromStr for IouValue {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TypeError::BadValue(s.to_string());
        let (negative, rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let (number, exp_part) = match rest.split_once(['e', 'E']) {
            Some((n, e)) => (n, Some(e)),
            None => (rest, None),
        };
        let mut exponent: i32 = match exp_part {
            Some(e) => e.parse().map_err(|_| bad())?,
            None => 0,
        };
        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(bad());
        }
        let digits: String = [int_part, frac_part].concat();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) || digits.len() > 32 {
            return Err(bad());
        }
        exponent -= frac_part.len() as i32;
        let mantissa: u128 = digits.parse().map_err(|_| bad())?;
        IouValue::normalize(mantissa, exponent, negative)
    }
}

impl Display for IouValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "0");
        }
        if self.negative {
            write!(f, "-")?;
        }
        let digits = self.mantissa.to_string();
        let point = digits.len() as i32 + self.exponent;
        let trimmed = digits.trim_end_matches('0');
        let trimmed = if trimmed.is_empty() { "0" } else { trimmed };
        if point <= 0 {
            write!(f, "0.{}{}", "0".repeat(-point as usize), trimmed)
        } else if (point as usize) >= trimmed.len() {
            write!(f, "{}{}", trimmed, "0".repeat(point as usize - trimmed.len()))
        } else {
            let (int_part, frac_part) = trimmed.split_at(point as usize);
            write!(f, "{int_part}.{frac_part}")
        }
    }
}

/// A transfer amount: either native drops or an issued-asset value. The JSON
/// form is the chain's (a decimal string of drops, or a
/// currency/issuer/value object).
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Amount {
    Drops(u64),
    Issued {
        value: IouValue,
        currency: Currency,
        issuer: AccountId,
    },
}

impl Amount {
    pub fn drops(n: u64) -> Amount {
        Amount::Drops(n)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Amount::Drops(n) => serde_json::Value::String(n.to_string()),
            Amount::Issued {
                value,
                currency,
                issuer,
            } => serde_json::json!({
                "currency": currency.to_string(),
                "issuer": issuer.to_base58(),
                "value": value.to_string(),
            }),
        }
    }

    pub fn from_json(v: &serde_json::Value) -> Result<Amount, TypeError> {
        match v {
            serde_json::Value::String(s) => {
                let n = s
                    .parse::<u64>()
                    .map_err(|_| TypeError::BadValue(s.clone()))?;
                Ok(Amount::Drops(n))
            }
            serde_json::Value::Number(n) => n
                .as_u64()
                .map(Amount::Drops)
                .ok_or_else(|| TypeError::BadValue(n.to_string())),
            serde_json::Value::Object(obj) => {
                let field = |name: &str| -> Result<&str, TypeError> {
                    obj.get(name)
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| TypeError::MissingField(name.to_string()))
                };
                Ok(Amount::Issued {
                    value: field("value")?.parse()?,
                    currency: field("currency")?.parse()?,
                    issuer: AccountId::from_base58(field("issuer")?)?,
                })
            }
            other => Err(TypeError::BadValue(other.to_string())),
        }
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = serde_json::Value::deserialize(deserializer)?;
        Amount::from_json(&v).map_err(de::Error::custom)
    }
}

/// A 256-bit transaction hash, hex round-trip.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(pub [u8; 32]);

impl TxHash {
    pub fn from_hex(s: &str) -> Result<TxHash, TypeError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| TypeError::BadHash(s.to_string()))?;
        Ok(TxHash(bytes))
    }
}

impl Display for TxHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({self})")
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// A transaction's ternary engine result code. Zero is success, small
/// negative codes are retriable, everything else is a permanent failure.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct EngineResult(pub i32);

impl EngineResult {
    pub const SUCCESS: EngineResult = EngineResult(0);

    pub fn is_success(&self) -> bool {
        self.0 == 0
    }

    pub fn is_retriable(&self) -> bool {
        (-99..=-1).contains(&self.0)
    }
}

impl Display for EngineResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            write!(f, "tesSUCCESS")
        } else {
            write!(f, "ter({})", self.0)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    #[error("invalid account: {0}")]
    BadAccount(String),
    #[error("invalid currency: {0}")]
    BadCurrency(String),
    #[error("invalid value: {0}")]
    BadValue(String),
    #[error("invalid hash: {0}")]
    BadHash(String),
    #[error("missing field: {0}")]
    MissingField(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_base58_round_trip() {
        let id = AccountId([7u8; 20]);
        let encoded = id.to_base58();
        assert!(encoded.starts_with('r'));
        assert_eq!(AccountId::from_base58(&encoded).unwrap(), id);
    }

    #[test]
    fn account_rejects_garbage() {
        assert!(AccountId::from_base58("not-an-account").is_err());
        assert!(AccountId::from_base58("").is_err());
    }

    #[test]
    fn currency_standard_and_hex() {
        let usd: Currency = "USD".parse().unwrap();
        assert_eq!(usd.to_string(), "USD");
        assert!(!usd.is_xrp());
        let xrp: Currency = "XRP".parse().unwrap();
        assert!(xrp.is_xrp());
        let raw: Currency = "0158415500000000C1F76FF6ECB0BAC600000000".parse().unwrap();
        assert_eq!(raw.to_string(), "0158415500000000C1F76FF6ECB0BAC600000000");
    }

    #[test]
    fn iou_value_normal_form() {
        let one: IouValue = "1".parse().unwrap();
        assert_eq!(one.mantissa, 1_000_000_000_000_000);
        assert_eq!(one.exponent, -15);
        assert!(!one.negative);
        assert_eq!(one.to_string(), "1");

        let half: IouValue = "-0.5".parse().unwrap();
        assert_eq!(half.mantissa, 5_000_000_000_000_000);
        assert_eq!(half.exponent, -16);
        assert!(half.negative);
        assert_eq!(half.to_string(), "-0.5");

        let sci: IouValue = "25e2".parse().unwrap();
        assert_eq!(sci.to_string(), "2500");

        assert!("abc".parse::<IouValue>().is_err());
    }

    #[test]
    fn amount_json_round_trip() {
        let drops = Amount::from_json(&serde_json::json!("10000000")).unwrap();
        assert_eq!(drops, Amount::Drops(10_000_000));
        assert_eq!(drops.to_json(), serde_json::json!("10000000"));

        let issuer = AccountId([3u8; 20]);
        let iou = Amount::from_json(&serde_json::json!({
            "currency": "USD",
            "issuer": issuer.to_base58(),
            "value": "12.5",
        }))
        .unwrap();
        let round = Amount::from_json(&iou.to_json()).unwrap();
        assert_eq!(iou, round);
    }

    #[test]
    fn bridge_json_round_trip() {
        let bridge = Bridge {
            locking_chain_door: AccountId([1u8; 20]),
            locking_chain_issue: Issue::xrp(),
            issuing_chain_door: AccountId([2u8; 20]),
            issuing_chain_issue: Issue::xrp(),
        };
        let json = serde_json::to_value(&bridge).unwrap();
        assert!(json["LockingChainDoor"].is_string());
        let parsed: Bridge = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, bridge);
    }

    #[test]
    fn engine_result_classification() {
        assert!(EngineResult(0).is_success());
        assert!(EngineResult(-50).is_retriable());
        assert!(!EngineResult(-150).is_retriable());
        assert!(!EngineResult(100).is_success());
    }
}
