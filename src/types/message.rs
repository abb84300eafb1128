use std::fmt;

use alloy::primitives::U256;
use fastnum::{D128, decimal::Context};
use serde_json::{Map, Number, Value};

use crate::dedup::DedupKey;

/// Largest integer a double represents exactly (2^53).
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Side of the trade from the point of view of the reported party.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn from_is_buy(is_buy: bool) -> Self {
        if is_buy { TradeSide::Buy } else { TradeSide::Sell }
    }

    /// Parses the string spellings used by upstream feeds.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "buy" | "bid" | "long" => Some(TradeSide::Buy),
            "sell" | "ask" | "short" => Some(TradeSide::Sell),
            _ => None,
        }
    }
}

/// Numeric trade field.
///
/// On-chain amounts routinely exceed the range of a double, so integers, both
/// JSON numbers and digit strings, are kept as 256-bit values and never
/// rounded. JSON numbers are read from their source text.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Amount {
    Integer(U256),
    Decimal(D128),
}

impl Amount {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Self::parse(&n.to_string()),
            Value::String(s) => Self::parse(s),
            _ => None,
        }
    }

    /// Parses decimal digits or `0x` hex as an integer, anything else as a
    /// decimal number.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return U256::from_str_radix(hex, 16).ok().map(Amount::Integer);
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            return U256::from_str_radix(s, 10).ok().map(Amount::Integer);
        }
        D128::from_str(s, Context::default())
            .ok()
            .map(Amount::Decimal)
    }

    pub fn as_integer(&self) -> Option<U256> {
        match self {
            Amount::Integer(v) => Some(*v),
            Amount::Decimal(_) => None,
        }
    }

    pub fn as_decimal(&self) -> Option<D128> {
        match self {
            Amount::Integer(_) => None,
            Amount::Decimal(v) => Some(*v),
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Integer(v) => write!(f, "{v}"),
            Amount::Decimal(v) => write!(f, "{v}"),
        }
    }
}

/// Normalized trade/fill event extracted from one candidate object.
///
/// Upstream producers disagree on naming, so every field is optional and
/// several spellings are accepted. The candidate object itself is kept and
/// available through [`TradeMessage::raw`].
#[derive(Clone, Debug, PartialEq)]
pub struct TradeMessage {
    key: DedupKey,
    id: Option<String>,
    account: Option<String>,
    trader: Option<String>,
    sender: Option<String>,
    owner: Option<String>,
    from: Option<String>,
    to: Option<String>,
    side: Option<TradeSide>,
    amount_in: Option<Amount>,
    amount_out: Option<Amount>,
    price: Option<Amount>,
    token_symbol: Option<String>,
    timestamp: Option<u64>,
    transaction_id: Option<String>,
    raw: Map<String, Value>,
}

impl TradeMessage {
    pub(crate) fn new(key: DedupKey, raw: Map<String, Value>) -> Self {
        let text = |names: &[&str]| lookup(&raw, names).and_then(value_to_text);
        let amount = |names: &[&str]| lookup(&raw, names).and_then(Amount::from_value);

        let side = match lookup(&raw, &["isBuy", "is_buy"]) {
            Some(Value::Bool(is_buy)) => Some(TradeSide::from_is_buy(*is_buy)),
            _ => match lookup(&raw, &["side"]) {
                Some(Value::Bool(is_buy)) => Some(TradeSide::from_is_buy(*is_buy)),
                Some(Value::String(s)) => TradeSide::parse(s),
                _ => None,
            },
        };

        let transaction_id = text(&["transactionId", "transaction_id"]).or_else(|| {
            raw.get("transaction")
                .and_then(|t| t.get("id"))
                .and_then(value_to_text)
        });

        Self {
            id: text(&["id"]),
            account: text(&["account"]),
            trader: text(&["trader"]),
            sender: text(&["sender"]),
            owner: text(&["owner"]),
            from: text(&["from"]),
            to: text(&["to"]),
            side,
            amount_in: amount(&["amountIn", "amount_in"]),
            amount_out: amount(&["amountOut", "amount_out"]),
            price: amount(&["price"]),
            token_symbol: text(&["tokenSymbol", "token_symbol", "symbol"]),
            timestamp: lookup(&raw, &["timestamp", "time", "ts"]).and_then(value_to_timestamp),
            transaction_id,
            key,
            raw,
        }
    }

    /// Builds a message from an arbitrary candidate value.
    ///
    /// Returns `None` for non-objects and for objects without a usable
    /// dedup key.
    pub fn from_candidate(candidate: Value) -> Option<Self> {
        match candidate {
            Value::Object(map) => DedupKey::derive(&map).map(|key| Self::new(key, map)),
            _ => None,
        }
    }

    /// Key the message was deduplicated by.
    pub fn key(&self) -> &DedupKey {
        &self.key
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub fn trader(&self) -> Option<&str> {
        self.trader.as_deref()
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn from(&self) -> Option<&str> {
        self.from.as_deref()
    }

    pub fn to(&self) -> Option<&str> {
        self.to.as_deref()
    }

    /// Party that initiated the trade, reconciled from the differently named
    /// party fields (account, trader, sender, owner, from).
    pub fn party(&self) -> Option<&str> {
        self.account()
            .or(self.trader())
            .or(self.sender())
            .or(self.owner())
            .or(self.from())
    }

    pub fn side(&self) -> Option<TradeSide> {
        self.side
    }

    pub fn amount_in(&self) -> Option<Amount> {
        self.amount_in
    }

    pub fn amount_out(&self) -> Option<Amount> {
        self.amount_out
    }

    pub fn price(&self) -> Option<Amount> {
        self.price
    }

    pub fn token_symbol(&self) -> Option<&str> {
        self.token_symbol.as_deref()
    }

    /// Event time as reported upstream (unit is feed specific).
    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    /// The candidate object exactly as received.
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    pub fn into_raw(self) -> Map<String, Value> {
        self.raw
    }
}

/// First present, non-null value among `names`.
pub(crate) fn lookup<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| map.get(*name))
        .find(|v| !v.is_null())
}

/// Identifier-like rendering of a scalar; empty strings count as absent.
///
/// Whole-number floats render like integers (`1.0` as `1`), the way
/// JavaScript producers stringify them.
pub(crate) fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(number_to_text(n)),
        _ => None,
    }
}

fn number_to_text(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < MAX_SAFE_INTEGER => {
            format!("{}", f as i64)
        }
        _ => n.to_string(),
    }
}

fn value_to_timestamp(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn message(value: Value) -> TradeMessage {
        TradeMessage::from_candidate(value).expect("keyed message")
    }

    #[test]
    fn test_side_decoding() {
        assert_eq!(message(json!({"id": 1, "isBuy": true})).side(), Some(TradeSide::Buy));
        assert_eq!(message(json!({"id": 1, "is_buy": false})).side(), Some(TradeSide::Sell));
        assert_eq!(message(json!({"id": 1, "side": "SELL"})).side(), Some(TradeSide::Sell));
        assert_eq!(message(json!({"id": 1, "side": "bid"})).side(), Some(TradeSide::Buy));
        assert_eq!(message(json!({"id": 1, "side": "sideways"})).side(), None);
        assert_eq!(message(json!({"id": 1, "side": "b"})).side(), None);
        assert_eq!(message(json!({"id": 1})).side(), None);
    }

    #[test]
    fn test_amounts_keep_precision() {
        let m = message(json!({
            "id": "a",
            "amountIn": "123456789012345678901234567890",
            "amount_out": 42,
            "price": "1834.25",
        }));
        assert_eq!(
            m.amount_in(),
            Some(Amount::Integer(
                U256::from_str_radix("123456789012345678901234567890", 10).unwrap()
            ))
        );
        assert_eq!(m.amount_out(), Some(Amount::Integer(U256::from(42))));
        assert_eq!(
            m.price(),
            Some(Amount::Decimal(D128::from_str("1834.25", Context::default()).unwrap()))
        );
    }

    #[test]
    fn test_wei_sized_json_number_is_exact() {
        let m = message(
            serde_json::from_str(r#"{"id": "w", "amountIn": 123456789012345678901234567890}"#)
                .unwrap(),
        );
        assert_eq!(
            m.amount_in(),
            Some(Amount::Integer(
                U256::from_str_radix("123456789012345678901234567890", 10).unwrap()
            ))
        );
    }

    #[test]
    fn test_whole_float_renders_as_integer() {
        assert_eq!(value_to_text(&serde_json::from_str("1.0").unwrap()).as_deref(), Some("1"));
        assert_eq!(value_to_text(&json!(7)).as_deref(), Some("7"));
        assert_eq!(value_to_text(&json!(1.5)).as_deref(), Some("1.5"));
    }

    #[test]
    fn test_amount_parse() {
        assert_eq!(Amount::parse("0xff"), Some(Amount::Integer(U256::from(255))));
        assert_eq!(Amount::parse(" 10 "), Some(Amount::Integer(U256::from(10))));
        assert!(matches!(Amount::parse("-1.5"), Some(Amount::Decimal(_))));
        assert_eq!(Amount::parse(""), None);
        assert_eq!(Amount::parse("ten"), None);
        assert_eq!(Amount::parse("0xzz"), None);
        assert!(matches!(
            Amount::from_value(&json!(0.25)),
            Some(Amount::Decimal(_))
        ));
        assert_eq!(Amount::from_value(&json!(true)), None);
        assert_eq!(Amount::parse("0x10").unwrap().to_string(), "16");
    }

    #[test]
    fn test_party_reconciliation() {
        assert_eq!(message(json!({"id": 1, "sender": "0xs", "from": "0xf"})).party(), Some("0xs"));
        assert_eq!(message(json!({"id": 1, "trader": "t", "owner": "o"})).party(), Some("t"));
        assert_eq!(message(json!({"id": 1, "from": "0xf", "to": "0xt"})).party(), Some("0xf"));
        assert_eq!(message(json!({"id": 1, "to": "0xt"})).party(), None);
    }

    #[test]
    fn test_transaction_id_sources() {
        assert_eq!(
            message(json!({"id": 1, "transactionId": "tx-1"})).transaction_id(),
            Some("tx-1")
        );
        assert_eq!(
            message(json!({"transaction": {"id": "tx-2"}})).transaction_id(),
            Some("tx-2")
        );
    }

    #[test]
    fn test_misc_fields() {
        let m = message(json!({
            "id": 7,
            "tokenSymbol": "WETH",
            "timestamp": "1700000000",
            "extra": [1, 2],
        }));
        assert_eq!(m.id(), Some("7"));
        assert_eq!(m.token_symbol(), Some("WETH"));
        assert_eq!(m.timestamp(), Some(1_700_000_000));
        assert_eq!(m.raw().get("extra"), Some(&json!([1, 2])));
    }

    #[test]
    fn test_from_candidate_rejects() {
        assert!(TradeMessage::from_candidate(json!(null)).is_none());
        assert!(TradeMessage::from_candidate(json!([1, 2])).is_none());
        assert!(TradeMessage::from_candidate(json!({"price": 1})).is_none());
        assert!(TradeMessage::from_candidate(json!({"id": ""})).is_none());
    }
}
