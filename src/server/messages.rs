use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::engine::{
    chips_to_credits, display_multiplier, Chips, HistoryEntry, RoundId, RoundSnapshot, UserId,
    Wager,
};

/// Outbound frames, serialized as `{"type": ..., "payload": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerMessage {
    Welcome(WelcomePayload),
    State(RoundSnapshot),
    Tick(TickPayload),
    RoundOpen(RoundOpenPayload),
    RoundStart(RoundStartPayload),
    RoundCrash(RoundCrashPayload),
    Bet(BetPayload),
    Cashout(CashoutPayload),
    Balance(BalancePayload),
    Error(ErrorPayload),
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Welcome(_) => "welcome",
            ServerMessage::State(_) => "state",
            ServerMessage::Tick(_) => "tick",
            ServerMessage::RoundOpen(_) => "roundOpen",
            ServerMessage::RoundStart(_) => "roundStart",
            ServerMessage::RoundCrash(_) => "roundCrash",
            ServerMessage::Bet(_) => "bet",
            ServerMessage::Cashout(_) => "cashout",
            ServerMessage::Balance(_) => "balance",
            ServerMessage::Error(_) => "error",
        }
    }

    pub fn balance(balance: Chips) -> Self {
        ServerMessage::Balance(BalancePayload {
            balance: chips_to_credits(balance),
        })
    }

    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorPayload {
            code,
            message: message.into(),
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomePayload {
    pub user: WelcomeUser,
    pub history: Vec<HistoryEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeUser {
    pub id: UserId,
    pub nick: String,
    pub balance: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickPayload {
    pub round_id: RoundId,
    pub multiplier: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundOpenPayload {
    pub round_id: RoundId,
    pub bet_window_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundStartPayload {
    pub round_id: RoundId,
    pub started_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundCrashPayload {
    pub round_id: RoundId,
    pub crash_at: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BetPayload {
    pub user_id: UserId,
    pub nick: String,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto: Option<f64>,
}

impl BetPayload {
    pub fn from_wager(wager: &Wager) -> Self {
        Self {
            user_id: wager.user_id,
            nick: wager.display_name.clone(),
            amount: chips_to_credits(wager.amount),
            auto: wager.auto_cashout,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashoutPayload {
    pub user_id: UserId,
    pub nick: String,
    pub multiplier: f64,
    pub payout: f64,
    pub auto: bool,
}

impl CashoutPayload {
    pub fn from_wager(wager: &Wager, auto: bool) -> Self {
        Self {
            user_id: wager.user_id,
            nick: wager.display_name.clone(),
            multiplier: display_multiplier(wager.cashed_out_at().unwrap_or(1.0)),
            payout: chips_to_credits(wager.payout()),
            auto,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BalancePayload {
    pub balance: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
}

/// Inbound frames. Unknown types and unparseable JSON are reported as [`MessageError`] and
/// dropped by the session.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    Hello { nick: String },
    PlaceBet { amount: f64, auto: Option<f64> },
    Cashout,
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported message type `{0}`")]
    UnknownType(String),
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: JsonValue,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct HelloPayload {
    nick: String,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct PlaceBetPayload {
    amount: JsonValue,
    auto: JsonValue,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        let payload = match raw.payload {
            JsonValue::Null => JsonValue::Object(Default::default()),
            other => other,
        };
        match raw.kind.as_str() {
            "hello" => {
                let hello: HelloPayload = serde_json::from_value(payload)?;
                Ok(ClientMessage::Hello { nick: hello.nick })
            }
            "placeBet" => {
                let bet: PlaceBetPayload = serde_json::from_value(payload)?;
                Ok(ClientMessage::PlaceBet {
                    amount: lenient_number(&bet.amount).unwrap_or(f64::NAN),
                    auto: match bet.auto {
                        JsonValue::Null => None,
                        ref value => Some(lenient_number(value).unwrap_or(f64::NAN)),
                    },
                })
            }
            "cashout" => Ok(ClientMessage::Cashout),
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }
}

/// Accepts JSON numbers and numeric strings. Anything else is left for validation to
/// reject as invalid input.
fn lenient_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(number) => number.as_f64(),
        JsonValue::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn parses_inbound_frames() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"hello","payload":{"nick":"ada"}}"#).unwrap(),
            ClientMessage::Hello { nick: "ada".into() }
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"placeBet","payload":{"amount":100,"auto":1.5}}"#)
                .unwrap(),
            ClientMessage::PlaceBet {
                amount: 100.0,
                auto: Some(1.5)
            }
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"placeBet","payload":{"amount":"12.5"}}"#).unwrap(),
            ClientMessage::PlaceBet {
                amount: 12.5,
                auto: None
            }
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"cashout","payload":{}}"#).unwrap(),
            ClientMessage::Cashout
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"cashout"}"#).unwrap(),
            ClientMessage::Cashout
        );
    }

    #[test]
    fn non_numeric_amount_becomes_nan() {
        match ClientMessage::parse(r#"{"type":"placeBet","payload":{"amount":"lots"}}"#) {
            Ok(ClientMessage::PlaceBet { amount, auto }) => {
                assert!(amount.is_nan());
                assert_eq!(auto, None);
            }
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn rejects_garbage_and_unknown_types() {
        assert!(matches!(
            ClientMessage::parse("not json"),
            Err(MessageError::Json(_))
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"chat","payload":{"text":"hi"}}"#),
            Err(MessageError::UnknownType(kind)) if kind == "chat"
        ));
    }

    #[test]
    fn outbound_frames_use_type_and_payload() {
        let round_id = Uuid::new_v4();
        let message = ServerMessage::RoundCrash(RoundCrashPayload {
            round_id,
            crash_at: 1.87,
        });
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({"type": "roundCrash", "payload": {"roundId": round_id, "crashAt": 1.87}})
        );
        assert_eq!(message.kind(), "roundCrash");

        let value = serde_json::to_value(ServerMessage::balance(110_000)).unwrap();
        assert_eq!(value, json!({"type": "balance", "payload": {"balance": 1100.0}}));

        let value =
            serde_json::to_value(ServerMessage::error("wrong_phase", "bets are closed")).unwrap();
        assert_eq!(value["payload"]["code"], "wrong_phase");
    }
}
