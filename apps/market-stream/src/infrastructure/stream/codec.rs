//! Stream Codec Module
//!
//! Decodes inbound provider text into [`InboundMessage`]s.
//!
//! - **Framing**: `~m~<len>~m~<payload>`, where `<len>` is the payload
//!   length in bytes. Several frames may be concatenated in one text
//!   message. Text that does not start with a frame marker is a single
//!   unframed payload.
//! - **Provider heartbeats**: `~h~<n>` payloads, echoed back verbatim.
//! - **Payloads**: generic envelopes, flat ticks, quote session data and
//!   control messages. Arrays are decoded element by element.

use serde_json::{Map, Value};

use super::messages::{MethodCall, QuoteData};
use crate::domain::streaming::parser::ParseError;
use crate::domain::streaming::{MarketDataParser, MarketEvent, MarketTick, RawMarketMessage};

const FRAME_MARKER: &str = "~m~";
const HEARTBEAT_MARKER: &str = "~h~";

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame header or length is malformed.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Payload failed validation.
    #[error("invalid payload: {0}")]
    Payload(#[from] ParseError),

    /// Valid JSON with an unknown shape.
    #[error("unrecognized message: {0}")]
    Unrecognized(String),
}

/// A decoded inbound unit.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Market data.
    Event(MarketEvent),
    /// Provider heartbeat frame to echo back (already framed).
    Heartbeat(String),
    /// Control traffic consumed silently (`ping`, `pong`, acks, ...).
    Control(String),
}

/// Wrap a payload in a length-prefixed frame.
#[must_use]
pub fn encode_frame(payload: &str) -> String {
    format!("{FRAME_MARKER}{}{FRAME_MARKER}{payload}", payload.len())
}

/// Split a text message into frame payloads.
///
/// Frames before a malformed header are kept; the malformed remainder
/// yields a single trailing error since its boundaries are unknown.
#[must_use]
pub fn split_frames(text: &str) -> Vec<Result<&str, CodecError>> {
    if !text.starts_with(FRAME_MARKER) {
        return vec![Ok(text)];
    }

    let mut frames = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        match next_frame(rest) {
            Ok((frame, tail)) => {
                frames.push(Ok(frame));
                rest = tail;
            }
            Err(e) => {
                frames.push(Err(e));
                break;
            }
        }
    }
    frames
}

fn next_frame(rest: &str) -> Result<(&str, &str), CodecError> {
    let after_marker = rest
        .strip_prefix(FRAME_MARKER)
        .ok_or_else(|| CodecError::InvalidFrame(truncate(rest)))?;
    let (len_str, body) = after_marker
        .split_once(FRAME_MARKER)
        .ok_or_else(|| CodecError::InvalidFrame(truncate(rest)))?;
    let len: usize = len_str
        .parse()
        .map_err(|_| CodecError::InvalidFrame(format!("bad length {len_str:?}")))?;
    if len > body.len() || !body.is_char_boundary(len) {
        return Err(CodecError::InvalidFrame(format!(
            "length {len} exceeds remaining {} bytes",
            body.len()
        )));
    }
    Ok(body.split_at(len))
}

/// Decode one text message.
///
/// Each frame yields its own result so that one malformed frame does not
/// discard its neighbours.
#[must_use]
pub fn decode(text: &str) -> Vec<Result<InboundMessage, CodecError>> {
    split_frames(text)
        .into_iter()
        .flat_map(|frame| match frame {
            Ok(payload) => decode_payload(payload),
            Err(e) => vec![Err(e)],
        })
        .collect()
}

fn decode_payload(payload: &str) -> Vec<Result<InboundMessage, CodecError>> {
    let trimmed = payload.trim();
    if trimmed.starts_with(HEARTBEAT_MARKER) {
        return vec![Ok(InboundMessage::Heartbeat(encode_frame(trimmed)))];
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => items.into_iter().map(decode_value).collect(),
        Ok(value) => vec![decode_value(value)],
        Err(e) => vec![Err(CodecError::Json(e))],
    }
}

fn decode_value(value: Value) -> Result<InboundMessage, CodecError> {
    let Value::Object(obj) = value else {
        return Err(CodecError::Unrecognized(truncate(&value.to_string())));
    };

    if obj.contains_key("m") {
        return decode_method(obj);
    }

    if let Some(kind) = obj.get("type").and_then(Value::as_str) {
        if obj.contains_key("data") && obj.contains_key("symbol") {
            let raw: RawMarketMessage = serde_json::from_value(Value::Object(obj))?;
            return Ok(MarketDataParser::parse_envelope(&raw)?
                .map_or_else(|| InboundMessage::Control(raw.kind.clone()), InboundMessage::Event));
        }
        if !obj.contains_key("price") {
            return Ok(InboundMessage::Control(kind.to_string()));
        }
    }

    let symbol = obj.get("symbol").and_then(Value::as_str).map(str::to_owned);
    if let Some(symbol) = symbol.filter(|_| obj.contains_key("price")) {
        let data = Value::Object(obj);
        let tick = MarketDataParser::parse_tick(&symbol, &data, None)?;
        return Ok(InboundMessage::Event(MarketEvent::Tick(tick)));
    }

    Err(CodecError::Unrecognized(truncate(&Value::Object(obj).to_string())))
}

fn decode_method(obj: Map<String, Value>) -> Result<InboundMessage, CodecError> {
    let call: MethodCall = serde_json::from_value(Value::Object(obj))?;
    if call.m != "qsd" {
        return Ok(InboundMessage::Control(call.m));
    }

    let Some(data) = call.p.into_iter().nth(1) else {
        return Err(CodecError::Unrecognized("qsd without quote data".to_string()));
    };
    let quote: QuoteData = serde_json::from_value(data)?;
    if quote.s.as_deref() == Some("error") {
        return Ok(InboundMessage::Control(format!("qsd_error:{}", quote.n)));
    }
    let Some(price) = quote.v.price() else {
        return Ok(InboundMessage::Control("qsd".to_string()));
    };
    if !MarketDataParser::is_valid_price(price) {
        return Err(ParseError::InvalidNumber {
            field: "lp",
            value: price.to_string(),
        }
        .into());
    }

    let timestamp = quote.v.lp_time.map(Value::from);
    let tick = MarketTick {
        symbol: quote.n,
        price,
        bid: quote.v.bid,
        ask: quote.v.ask,
        volume: quote.v.volume,
        timestamp: MarketDataParser::normalize_timestamp(timestamp.as_ref()),
    };
    Ok(InboundMessage::Event(MarketEvent::Tick(tick)))
}

fn truncate(s: &str) -> String {
    s.chars().take(64).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::streaming::Candle;

    fn single(text: &str) -> Result<InboundMessage, CodecError> {
        let mut out = decode(text);
        assert_eq!(out.len(), 1, "expected one message from {text}");
        out.remove(0)
    }

    fn payloads(text: &str) -> Vec<&str> {
        split_frames(text).into_iter().map(Result::unwrap).collect()
    }

    fn tick(message: InboundMessage) -> MarketTick {
        match message {
            InboundMessage::Event(MarketEvent::Tick(t)) => t,
            other => panic!("expected tick, got {other:?}"),
        }
    }

    #[test]
    fn frame_roundtrip_uses_byte_length() {
        let payload = r#"{"n":"€"}"#;
        let framed = encode_frame(payload);
        assert_eq!(framed, format!("~m~{}~m~{payload}", payload.len()));
        assert_eq!(payloads(&framed), vec![payload]);
    }

    #[test]
    fn split_concatenated_frames() {
        let text = format!("{}{}", encode_frame("~h~1"), encode_frame("{}"));
        assert_eq!(payloads(&text), vec!["~h~1", "{}"]);
    }

    #[test]
    fn split_rejects_overrun() {
        assert!(matches!(
            split_frames("~m~50~m~{}").as_slice(),
            [Err(CodecError::InvalidFrame(_))]
        ));
        assert!(matches!(
            split_frames("~m~x~m~{}").as_slice(),
            [Err(CodecError::InvalidFrame(_))]
        ));
    }

    #[test]
    fn unframed_text_is_one_payload() {
        assert_eq!(payloads(r#"{"a":1}"#), vec![r#"{"a":1}"#]);
    }

    #[test]
    fn provider_heartbeat_is_echoed_framed() {
        let message = single("~m~4~m~~h~7").unwrap();
        assert_eq!(message, InboundMessage::Heartbeat("~m~4~m~~h~7".to_string()));
    }

    #[test]
    fn flat_tick() {
        let t = tick(
            single(r#"{"symbol":"EUR/USD","price":1.085,"bid":1.0849,"ask":1.0851,"timestamp":1700000000000}"#)
                .unwrap(),
        );
        assert_eq!(t.symbol, "EUR/USD");
        assert_eq!(t.ask, Some(1.0851));
        assert_eq!(t.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn envelope_candle() {
        let text = json!({
            "type": "candle",
            "symbol": "BTC/USD",
            "timestamp": 1_700_000_040,
            "data": {"open": 10.0, "high": 12.0, "low": 9.0, "close": 11.0, "volume": 5.0}
        })
        .to_string();

        match single(&text).unwrap() {
            InboundMessage::Event(MarketEvent::Candle { symbol, candle }) => {
                assert_eq!(symbol, "BTC/USD");
                assert_eq!(candle, Candle {
                    timestamp: 1_700_000_040_000,
                    open: 10.0,
                    high: 12.0,
                    low: 9.0,
                    close: 11.0,
                    volume: 5.0,
                });
            }
            other => panic!("expected candle, got {other:?}"),
        }
    }

    #[test]
    fn control_messages_are_consumed() {
        assert_eq!(
            single(r#"{"type":"pong"}"#).unwrap(),
            InboundMessage::Control("pong".to_string())
        );
        assert_eq!(
            single(&encode_frame(r#"{"m":"timescale_update","p":[]}"#)).unwrap(),
            InboundMessage::Control("timescale_update".to_string())
        );
        assert_eq!(
            single(r#"{"type":"volume","symbol":"X","data":{"volume":1}}"#).unwrap(),
            InboundMessage::Control("volume".to_string())
        );
    }

    #[test]
    fn quote_session_data() {
        let payload = json!({
            "m": "qsd",
            "p": ["qs_abc", {"n": "FX:EURUSD", "s": "ok", "v": {"lp": 1.0852, "bid": 1.0851, "ask": 1.0853, "lp_time": 1_700_000_000}}]
        })
        .to_string();

        let t = tick(single(&encode_frame(&payload)).unwrap());
        assert_eq!(t.symbol, "FX:EURUSD");
        assert_eq!(t.price, 1.0852);
        assert_eq!(t.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn quote_without_price_is_control() {
        let payload = r#"{"m":"qsd","p":["qs_abc",{"n":"FX:EURUSD","v":{"ch":0.1}}]}"#;
        assert_eq!(
            single(payload).unwrap(),
            InboundMessage::Control("qsd".to_string())
        );
    }

    #[test]
    fn array_payload_yields_each_element() {
        let text = r#"[{"symbol":"A","price":1},{"symbol":"B","price":-1},{"type":"ping"}]"#;
        let out = decode(text);
        assert_eq!(out.len(), 3);
        assert!(out[0].is_ok());
        assert!(matches!(out[1], Err(CodecError::Payload(_))));
        assert!(matches!(out[2], Ok(InboundMessage::Control(_))));
    }

    #[test]
    fn malformed_frame_does_not_hide_neighbours() {
        let text = format!("{}{}", encode_frame("not json"), encode_frame(r#"{"symbol":"A","price":2}"#));
        let out = decode(&text);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Err(CodecError::Json(_))));
        assert_eq!(tick(out.into_iter().nth(1).unwrap().unwrap()).price, 2.0);
    }

    #[test]
    fn bad_header_keeps_preceding_frames() {
        let good = encode_frame(r#"{"symbol":"EUR/USD","price":1.08}"#);
        let text = format!("{good}~m~zz~m~{{}}");
        let out = decode(&text);
        assert_eq!(out.len(), 2);
        assert!(matches!(&out[1], Err(CodecError::InvalidFrame(m)) if m.contains("zz")));

        let t = tick(out.into_iter().next().unwrap().unwrap());
        assert_eq!(t.symbol, "EUR/USD");
        assert_eq!(t.price, 1.08);
    }

    #[test]
    fn unknown_shapes_are_errors() {
        assert!(matches!(single(r#"{"hello":"world"}"#), Err(CodecError::Unrecognized(_))));
        assert!(matches!(single("42"), Err(CodecError::Unrecognized(_))));
    }
}
