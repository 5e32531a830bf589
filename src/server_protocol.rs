use serde_json::Value;

use crate::server_utils::{is_valid_attendee_id, parse_coordinate};

#[derive(Debug, PartialEq)]
pub enum ParsedClientMessage {
    Hold { id: String },
    Move { id: String, x: f32, y: f32 },
    Release { id: String },
    StartDraw,
    DismissDraw,
    Ping { t: f64 },
}

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "hold" => Some(ParsedClientMessage::Hold {
            id: parse_id(object.get("id"))?,
        }),
        "move" => {
            let id = parse_id(object.get("id"))?;
            let x = parse_coordinate(object.get("x")?.as_f64())?;
            let y = parse_coordinate(object.get("y")?.as_f64())?;
            Some(ParsedClientMessage::Move { id, x, y })
        }
        "release" => Some(ParsedClientMessage::Release {
            id: parse_id(object.get("id"))?,
        }),
        "start_draw" => Some(ParsedClientMessage::StartDraw),
        "dismiss_draw" => Some(ParsedClientMessage::DismissDraw),
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Ping { t })
        }
        _ => None,
    }
}

fn parse_id(value: Option<&Value>) -> Option<String> {
    let id = match value? {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    is_valid_attendee_id(&id).then_some(id)
}
