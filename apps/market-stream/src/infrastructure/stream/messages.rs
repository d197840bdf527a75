//! Stream Wire Message Types
//!
//! Wire format types for the two supported provider protocols.
//!
//! # Protocols
//!
//! ## JSON (`WireProtocol::Json`)
//! - Subscribe: `{"type":"subscribe","symbol":"EUR/USD"}`
//! - Unsubscribe: `{"type":"unsubscribe","symbol":"EUR/USD"}`
//! - Heartbeat: `{"type":"ping"}`
//!
//! ## Framed (`WireProtocol::Framed`)
//! Every message is a method call `{"m":method,"p":[...]}` wrapped in a
//! length-prefixed frame `~m~<len>~m~<payload>`.
//! - Handshake: `set_auth_token`, `quote_create_session`, `quote_set_fields`
//! - Subscribe: `quote_add_symbols` + `quote_fast_symbols`
//! - Unsubscribe: `quote_remove_symbols`
//! - Heartbeat: `ping`
//! - Quote data arrives as `qsd` with `{"n":symbol,"v":{lp,bid,ask,volume}}`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::codec::{CodecError, encode_frame};
use crate::domain::subscription::SymbolMapping;

/// Token sent in `set_auth_token` for anonymous sessions.
pub const ANONYMOUS_AUTH_TOKEN: &str = "unauthorized_user";

/// Quote fields requested from framed providers.
pub const QUOTE_FIELDS: &[&str] = &["lp", "bid", "ask", "volume", "ch", "chp", "lp_time"];

// =============================================================================
// Protocol Selection
// =============================================================================

/// Provider wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireProtocol {
    /// Plain JSON text messages.
    #[default]
    Json,
    /// Length-prefixed method-call frames with exchange-prefixed symbols.
    Framed,
}

impl WireProtocol {
    /// Configuration name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Framed => "framed",
        }
    }

    /// Symbol spelling expected by the provider.
    #[must_use]
    pub const fn symbol_mapping(&self) -> SymbolMapping {
        match self {
            Self::Json => SymbolMapping::Identity,
            Self::Framed => SymbolMapping::ExchangePrefixed,
        }
    }
}

impl fmt::Display for WireProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown protocol name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown wire protocol: {0}")]
pub struct UnknownProtocol(pub String);

impl FromStr for WireProtocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "framed" | "tradingview" => Ok(Self::Framed),
            _ => Err(UnknownProtocol(s.to_string())),
        }
    }
}

// =============================================================================
// Outbound Messages
// =============================================================================

/// JSON protocol command.
#[derive(Debug, Clone, Serialize)]
pub struct StreamCommand<'a> {
    /// Command type (`subscribe`, `unsubscribe`, `ping`).
    #[serde(rename = "type")]
    pub kind: &'a str,
    /// Target symbol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<&'a str>,
}

/// Framed protocol method call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodCall {
    /// Method name.
    pub m: String,
    /// Positional parameters.
    #[serde(default)]
    pub p: Vec<Value>,
}

impl MethodCall {
    /// Create a method call.
    #[must_use]
    pub fn new(method: &str, params: Vec<Value>) -> Self {
        Self {
            m: method.to_string(),
            p: params,
        }
    }
}

/// Builds outbound messages for one session.
#[derive(Debug, Clone)]
pub struct OutboundMessages {
    protocol: WireProtocol,
    session_id: String,
}

impl OutboundMessages {
    /// Create a builder with a fresh quote session id.
    #[must_use]
    pub fn new(protocol: WireProtocol) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            protocol,
            session_id: format!("qs_{}", &id[..12]),
        }
    }

    /// Protocol in use.
    #[must_use]
    pub const fn protocol(&self) -> WireProtocol {
        self.protocol
    }

    /// Quote session id (framed protocol).
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Messages sent right after the socket opens.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn handshake(&self) -> Result<Vec<String>, CodecError> {
        match self.protocol {
            WireProtocol::Json => Ok(Vec::new()),
            WireProtocol::Framed => {
                let mut fields = vec![Value::from(self.session_id.as_str())];
                fields.extend(QUOTE_FIELDS.iter().map(|f| Value::from(*f)));
                [
                    MethodCall::new("set_auth_token", vec![ANONYMOUS_AUTH_TOKEN.into()]),
                    MethodCall::new("quote_create_session", vec![self.session_id.as_str().into()]),
                    MethodCall::new("quote_set_fields", fields),
                ]
                .iter()
                .map(framed)
                .collect()
            }
        }
    }

    /// Messages subscribing to `provider_symbol`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn subscribe(&self, provider_symbol: &str) -> Result<Vec<String>, CodecError> {
        match self.protocol {
            WireProtocol::Json => Ok(vec![command("subscribe", Some(provider_symbol))?]),
            WireProtocol::Framed => ["quote_add_symbols", "quote_fast_symbols"]
                .iter()
                .map(|method| framed(&self.session_call(method, provider_symbol)))
                .collect(),
        }
    }

    /// Messages unsubscribing from `provider_symbol`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn unsubscribe(&self, provider_symbol: &str) -> Result<Vec<String>, CodecError> {
        match self.protocol {
            WireProtocol::Json => Ok(vec![command("unsubscribe", Some(provider_symbol))?]),
            WireProtocol::Framed => Ok(vec![framed(
                &self.session_call("quote_remove_symbols", provider_symbol),
            )?]),
        }
    }

    /// Keep-alive message.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn heartbeat(&self) -> Result<String, CodecError> {
        match self.protocol {
            WireProtocol::Json => command("ping", None),
            WireProtocol::Framed => framed(&MethodCall::new("ping", Vec::new())),
        }
    }

    /// Wrap an already-serialized payload for the wire.
    #[must_use]
    pub fn wrap(&self, payload: &str) -> String {
        match self.protocol {
            WireProtocol::Json => payload.to_string(),
            WireProtocol::Framed => encode_frame(payload),
        }
    }

    fn session_call(&self, method: &str, provider_symbol: &str) -> MethodCall {
        MethodCall::new(
            method,
            vec![self.session_id.as_str().into(), provider_symbol.into()],
        )
    }
}

fn command(kind: &str, symbol: Option<&str>) -> Result<String, CodecError> {
    Ok(serde_json::to_string(&StreamCommand { kind, symbol })?)
}

fn framed(call: &MethodCall) -> Result<String, CodecError> {
    Ok(encode_frame(&serde_json::to_string(call)?))
}

// =============================================================================
// Inbound Messages
// =============================================================================

/// Quote session data payload (`qsd` second parameter).
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteData {
    /// Provider symbol.
    pub n: String,
    /// Status (`ok` or `error`).
    #[serde(default)]
    pub s: Option<String>,
    /// Changed fields.
    #[serde(default)]
    pub v: QuoteValues,
}

/// Quote fields. Updates carry only the fields that changed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuoteValues {
    /// Last price.
    #[serde(default)]
    pub lp: Option<f64>,
    /// Best bid.
    #[serde(default)]
    pub bid: Option<f64>,
    /// Best ask.
    #[serde(default)]
    pub ask: Option<f64>,
    /// Session volume.
    #[serde(default)]
    pub volume: Option<f64>,
    /// Last price time (seconds).
    #[serde(default)]
    pub lp_time: Option<i64>,
}

impl QuoteValues {
    /// Last price, or the mid when only the book changed.
    #[must_use]
    pub fn price(&self) -> Option<f64> {
        self.lp.or(match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::infrastructure::stream::codec::split_frames;

    fn unframe(text: &str) -> Value {
        let mut frames = split_frames(text);
        assert_eq!(frames.len(), 1);
        serde_json::from_str(frames.remove(0).unwrap()).unwrap()
    }

    #[test]
    fn protocol_from_str() {
        assert_eq!("JSON".parse::<WireProtocol>().unwrap(), WireProtocol::Json);
        assert_eq!("tradingview".parse::<WireProtocol>().unwrap(), WireProtocol::Framed);
        assert!("xml".parse::<WireProtocol>().is_err());
    }

    #[test]
    fn json_commands() {
        let out = OutboundMessages::new(WireProtocol::Json);
        assert!(out.handshake().unwrap().is_empty());
        assert_eq!(
            out.subscribe("EUR/USD").unwrap(),
            vec![r#"{"type":"subscribe","symbol":"EUR/USD"}"#.to_string()]
        );
        assert_eq!(
            out.unsubscribe("EUR/USD").unwrap(),
            vec![r#"{"type":"unsubscribe","symbol":"EUR/USD"}"#.to_string()]
        );
        assert_eq!(out.heartbeat().unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(out.wrap("{}"), "{}");
    }

    #[test]
    fn framed_handshake() {
        let out = OutboundMessages::new(WireProtocol::Framed);
        let handshake = out.handshake().unwrap();
        assert_eq!(handshake.len(), 3);

        assert_eq!(
            unframe(&handshake[0]),
            json!({"m": "set_auth_token", "p": ["unauthorized_user"]})
        );
        assert_eq!(
            unframe(&handshake[1]),
            json!({"m": "quote_create_session", "p": [out.session_id()]})
        );
        assert_eq!(unframe(&handshake[2])["p"][1], "lp");
    }

    #[test]
    fn framed_subscribe_sends_both_methods() {
        let out = OutboundMessages::new(WireProtocol::Framed);
        let messages = out.subscribe("FX:EURUSD").unwrap();

        let methods: Vec<Value> = messages.iter().map(|m| unframe(m)["m"].clone()).collect();
        assert_eq!(methods, vec![json!("quote_add_symbols"), json!("quote_fast_symbols")]);
        assert_eq!(unframe(&messages[0])["p"][1], "FX:EURUSD");
    }

    #[test]
    fn framed_heartbeat_and_wrap() {
        let out = OutboundMessages::new(WireProtocol::Framed);
        assert_eq!(unframe(&out.heartbeat().unwrap())["m"], "ping");
        assert_eq!(out.wrap(r#"{"a":1}"#), r#"~m~7~m~{"a":1}"#);
    }

    #[test]
    fn session_ids_are_unique() {
        let a = OutboundMessages::new(WireProtocol::Framed);
        let b = OutboundMessages::new(WireProtocol::Framed);
        assert!(a.session_id().starts_with("qs_"));
        assert_eq!(a.session_id().len(), 15);
        assert_ne!(a.session_id(), b.session_id());
    }

    #[test]
    fn quote_price_falls_back_to_mid() {
        let values: QuoteValues = serde_json::from_value(json!({"bid": 1.0, "ask": 1.2})).unwrap();
        assert!((values.price().unwrap() - 1.1).abs() < 1e-12);

        let values: QuoteValues = serde_json::from_value(json!({"volume": 10})).unwrap();
        assert!(values.price().is_none());
    }
}
