//! Engine.IO v4 text frames carrying Socket.IO v5 packets.
//!
//! Only what a notification client needs: open, ping/pong, close, and the
//! connect / disconnect / event / connect-error packets. Binary attachments
//! and acknowledgements are recognized and ignored.

use docket_core::event::RawEvent;
use docket_core::{DocketError, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

pub const PONG: &str = "3";

/// Payload of the Engine.IO open frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

impl Handshake {
    /// Silence after which the server is considered gone.
    pub fn liveness(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Message(Packet),
    /// Upgrade and noop frames.
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect { namespace: String },
    Disconnect { namespace: String },
    Event { namespace: String, event: RawEvent },
    ConnectError { namespace: String, message: String },
    /// Acks and binary packets.
    Unsupported { namespace: String },
}

impl Packet {
    pub fn namespace(&self) -> &str {
        match self {
            Packet::Connect { namespace }
            | Packet::Disconnect { namespace }
            | Packet::Event { namespace, .. }
            | Packet::ConnectError { namespace, .. }
            | Packet::Unsupported { namespace } => namespace,
        }
    }
}

pub fn decode(text: &str) -> Result<Frame> {
    let mut chars = text.chars();
    let Some(kind) = chars.next() else {
        return Err(invalid("empty frame"));
    };
    let rest = chars.as_str();

    match kind {
        '0' => serde_json::from_str(rest)
            .map(Frame::Open)
            .map_err(|e| invalid(format!("open frame: {e}"))),
        '1' => Ok(Frame::Close),
        '2' => Ok(Frame::Ping),
        '3' => Ok(Frame::Pong),
        '4' => decode_packet(rest).map(Frame::Message),
        '5' | '6' => Ok(Frame::Noop),
        other => Err(invalid(format!("unknown frame type '{other}'"))),
    }
}

fn decode_packet(text: &str) -> Result<Packet> {
    let mut chars = text.chars();
    let Some(kind) = chars.next() else {
        return Err(invalid("empty packet"));
    };
    let mut rest = chars.as_str();
    if matches!(kind, '5' | '6') {
        rest = strip_attachment_count(rest);
    }
    let (namespace, body) = split_namespace(rest);

    match kind {
        '0' => Ok(Packet::Connect { namespace }),
        '1' => Ok(Packet::Disconnect { namespace }),
        '2' => {
            let event = decode_event(body)?;
            Ok(Packet::Event { namespace, event })
        }
        '4' => {
            let message = match serde_json::from_str::<Value>(body) {
                Ok(Value::Object(fields)) => fields
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| Value::Object(fields).to_string()),
                Ok(other) => other.to_string(),
                Err(_) => body.to_string(),
            };
            Ok(Packet::ConnectError { namespace, message })
        }
        '3' | '5' | '6' => Ok(Packet::Unsupported { namespace }),
        other => Err(invalid(format!("unknown packet type '{other}'"))),
    }
}

/// Binary packets carry `<attachments>-` before the namespace.
fn strip_attachment_count(text: &str) -> &str {
    match text.split_once('-') {
        Some((count, rest)) if !count.is_empty() && count.bytes().all(|b| b.is_ascii_digit()) => {
            rest
        }
        _ => text,
    }
}

/// `/chat,rest` -> (`/chat`, `rest`); no leading slash means the main namespace.
fn split_namespace(text: &str) -> (String, &str) {
    if !text.starts_with('/') {
        return ("/".to_string(), text);
    }
    match text.split_once(',') {
        Some((namespace, body)) => (namespace.to_string(), body),
        None => (text.to_string(), ""),
    }
}

fn decode_event(body: &str) -> Result<RawEvent> {
    // Optional ack id before the argument array
    let body = body.trim_start_matches(|c: char| c.is_ascii_digit());
    let args: Vec<Value> =
        serde_json::from_str(body).map_err(|e| invalid(format!("event arguments: {e}")))?;

    let mut args = args.into_iter();
    let name = match args.next() {
        Some(Value::String(name)) => name,
        _ => return Err(invalid("event without a name")),
    };
    Ok(RawEvent::new(name, args.next().unwrap_or(Value::Null)))
}

fn namespace_prefix(namespace: &str) -> String {
    if namespace == "/" {
        String::new()
    } else {
        format!("{namespace},")
    }
}

pub fn encode_connect(namespace: &str) -> String {
    format!("40{}", namespace_prefix(namespace))
}

pub fn encode_disconnect(namespace: &str) -> String {
    format!("41{}", namespace_prefix(namespace))
}

pub fn encode_event(namespace: &str, event: &RawEvent) -> Result<String> {
    let args = serde_json::to_string(&json!([event.name, event.payload]))?;
    Ok(format!("42{}{}", namespace_prefix(namespace), args))
}

fn invalid(reason: impl std::fmt::Display) -> DocketError {
    DocketError::transport(format!("invalid Socket.IO frame: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_open() {
        let frame = decode(
            r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[],"pingInterval":25000,"pingTimeout":5000,"maxPayload":1000000}"#,
        )
        .unwrap();
        let handshake = match frame {
            Frame::Open(handshake) => handshake,
            other => panic!("expected open, got {other:?}"),
        };
        assert_eq!(handshake.sid, "lv_VI97HAXpY6yYWAAAC");
        assert_eq!(handshake.liveness(), Duration::from_secs(30));
    }

    #[test]
    fn test_decode_control_frames() {
        assert_eq!(decode("1").unwrap(), Frame::Close);
        assert_eq!(decode("2").unwrap(), Frame::Ping);
        assert_eq!(decode("3").unwrap(), Frame::Pong);
        assert_eq!(decode("6").unwrap(), Frame::Noop);
        assert!(decode("").unwrap_err().is_transport());
        assert!(decode("9").unwrap_err().is_transport());
    }

    #[test]
    fn test_decode_namespaced_event() {
        let frame = decode(r#"42/chat,["new_emails",{"count":2}]"#).unwrap();
        assert_eq!(
            frame,
            Frame::Message(Packet::Event {
                namespace: "/chat".to_string(),
                event: RawEvent::new("new_emails", json!({ "count": 2 })),
            })
        );
    }

    #[test]
    fn test_decode_event_with_ack_id_and_no_payload() {
        let Frame::Message(packet) = decode(r#"4213["request_email_count"]"#).unwrap() else {
            panic!("expected a packet");
        };
        assert_eq!(packet.namespace(), "/");
        assert_eq!(
            packet,
            Packet::Event {
                namespace: "/".to_string(),
                event: RawEvent::new("request_email_count", Value::Null),
            }
        );
    }

    #[test]
    fn test_decode_rejects_nameless_event() {
        assert!(decode(r#"42/chat,[1,2]"#).unwrap_err().is_transport());
        assert!(decode(r#"42/chat,{"a":1}"#).unwrap_err().is_transport());
    }

    #[test]
    fn test_decode_connect_error() {
        let frame = decode(r#"44/chat,{"message":"Not authorized"}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Message(Packet::ConnectError {
                namespace: "/chat".to_string(),
                message: "Not authorized".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_connect_ack_and_binary() {
        assert_eq!(
            decode(r#"40/chat,{"sid":"wZX3oN0bSVIhsaknAAAI"}"#).unwrap(),
            Frame::Message(Packet::Connect {
                namespace: "/chat".to_string()
            })
        );
        assert_eq!(
            decode("451-/chat,[\"upload\",{\"_placeholder\":true,\"num\":0}]").unwrap(),
            Frame::Message(Packet::Unsupported {
                namespace: "/chat".to_string()
            })
        );
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode_connect("/chat"), "40/chat,");
        assert_eq!(encode_connect("/"), "40");
        assert_eq!(encode_disconnect("/chat"), "41/chat,");

        let event = RawEvent::new("mark_email_read", json!({ "user_id": "7", "email_id": "42" }));
        let text = encode_event("/chat", &event).unwrap();
        assert!(text.starts_with(r#"42/chat,["mark_email_read","#));
        // Decoding what we sent gives the event back
        assert_eq!(
            decode(&text).unwrap(),
            Frame::Message(Packet::Event {
                namespace: "/chat".to_string(),
                event,
            })
        );
    }
}
