use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::common::config::RunConfig;

/*
    A node's state is the only thing peers exchange. It is published as
    JSON on /getState and read back by every other node while polling:

        { "x": 0 | 1 | "?" | null, "decided": bool | null, "k": int | null, "killed": bool }

    A faulty node reports nulls for x, decided and k. Anything that does
    not parse into this shape is treated as if the peer had not answered.
*/

/// Round recorded on a node that settled in a single exchange.
pub const SINGLE_SHOT_ROUND: u64 = 2;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(try_from = "WireValue", into = "WireValue")]
pub enum Value {
    Zero,
    One,
    Undecided,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireValue {
    Bit(u8),
    Marker(String),
}

impl From<Value> for WireValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Zero => WireValue::Bit(0),
            Value::One => WireValue::Bit(1),
            Value::Undecided => WireValue::Marker("?".to_string()),
        }
    }
}

impl TryFrom<WireValue> for Value {
    type Error = String;

    fn try_from(wire: WireValue) -> Result<Self, Self::Error> {
        match wire {
            WireValue::Bit(0) => Ok(Value::Zero),
            WireValue::Bit(1) => Ok(Value::One),
            WireValue::Marker(marker) if marker == "?" => Ok(Value::Undecided),
            WireValue::Bit(other) => Err(format!("value out of range: {other}")),
            WireValue::Marker(other) => Err(format!("unknown value marker: {other:?}")),
        }
    }
}

impl FromStr for Value {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" => Ok(Value::Zero),
            "1" => Ok(Value::One),
            "?" => Ok(Value::Undecided),
            other => Err(format!("expected 0, 1 or ?, got {other:?}")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Zero => write!(f, "0"),
            Value::One => write!(f, "1"),
            Value::Undecided => write!(f, "?"),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct NodeState {
    pub x: Option<Value>,
    pub decided: Option<bool>,
    pub k: Option<u64>,
    pub killed: bool,
}

impl NodeState {
    pub fn initial(config: &RunConfig) -> Self {
        if config.is_faulty {
            return NodeState {
                x: None,
                decided: None,
                k: None,
                killed: false,
            };
        }
        NodeState {
            x: Some(config.initial_value),
            decided: Some(false),
            k: Some(0),
            killed: false,
        }
    }

    /// Reachable, participating and still running.
    pub fn is_healthy(&self) -> bool {
        self.x.is_some() && !self.killed
    }

    pub fn is_decided(&self) -> bool {
        self.decided == Some(true)
    }

    fn is_frozen(&self) -> bool {
        self.killed || self.decided != Some(false)
    }

    /// Settles on `value` in a single exchange. No-op once frozen.
    pub fn decide(&mut self, value: Value) -> bool {
        if self.is_frozen() || value == Value::Undecided {
            return false;
        }
        self.x = Some(value);
        self.decided = Some(true);
        self.k = Some(SINGLE_SHOT_ROUND);
        true
    }

    /// Moves `k` to at least 1 before the fallback rounds begin.
    pub fn enter_rounds(&mut self) -> Option<u64> {
        if self.is_frozen() {
            return None;
        }
        let k = self.k.map(|k| k.max(1))?;
        self.k = Some(k);
        Some(k)
    }

    /// Advances `k` by one and returns it, unless the node is frozen.
    pub fn advance_round(&mut self) -> Option<u64> {
        if self.is_frozen() {
            return None;
        }
        let k = self.k? + 1;
        self.k = Some(k);
        Some(k)
    }

    /// One way: nothing clears `killed`.
    pub fn kill(&mut self) {
        self.killed = true;
    }
}

/// Inbound peer message delivered on /message.
///
/// The vote content is not interpreted yet; every field is optional and
/// anything unrecognised is kept in `extra` so it still shows up in logs.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct PeerMessage {
    #[serde(default)]
    pub from: Option<usize>,
    #[serde(default)]
    pub round: Option<u64>,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub x: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn healthy(initial: Value) -> NodeState {
        NodeState::initial(&RunConfig::new(0, 4, 1, initial, false))
    }

    #[test]
    fn test_value_wire_format() {
        assert_eq!(serde_json::to_value(Value::Zero).unwrap(), json!(0));
        assert_eq!(serde_json::to_value(Value::One).unwrap(), json!(1));
        assert_eq!(serde_json::to_value(Value::Undecided).unwrap(), json!("?"));

        assert_eq!(serde_json::from_value::<Value>(json!("?")).unwrap(), Value::Undecided);
        assert!(serde_json::from_value::<Value>(json!(2)).is_err());
        assert!(serde_json::from_value::<Value>(json!("yes")).is_err());
    }

    #[test]
    fn test_value_from_str() {
        assert_eq!("1".parse::<Value>().unwrap(), Value::One);
        assert_eq!(" 0 ".parse::<Value>().unwrap(), Value::Zero);
        assert_eq!("?".parse::<Value>().unwrap(), Value::Undecided);
        assert!("2".parse::<Value>().is_err());
    }

    #[test]
    fn test_faulty_state_is_all_null() {
        let state = NodeState::initial(&RunConfig::new(3, 4, 1, Value::One, true));
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({ "x": null, "decided": null, "k": null, "killed": false })
        );
        assert!(!state.is_healthy());
    }

    #[test]
    fn test_decide_freezes_state() {
        let mut state = healthy(Value::Zero);
        assert!(state.decide(Value::One));
        assert_eq!(state.x, Some(Value::One));
        assert_eq!(state.k, Some(SINGLE_SHOT_ROUND));

        // Frozen: neither a second decision nor a round tick changes anything
        assert!(!state.decide(Value::Zero));
        assert_eq!(state.advance_round(), None);
        assert_eq!(state.x, Some(Value::One));
        assert_eq!(state.k, Some(SINGLE_SHOT_ROUND));
    }

    #[test]
    fn test_rounds_stop_after_kill() {
        let mut state = healthy(Value::One);
        assert_eq!(state.enter_rounds(), Some(1));
        assert_eq!(state.advance_round(), Some(2));

        state.kill();
        assert_eq!(state.advance_round(), None);
        assert_eq!(state.k, Some(2));
        assert!(state.killed);
        assert!(!state.is_healthy());
    }

    #[test]
    fn test_faulty_state_never_advances() {
        let mut state = NodeState::initial(&RunConfig::new(1, 4, 2, Value::One, true));
        assert_eq!(state.enter_rounds(), None);
        assert_eq!(state.advance_round(), None);
        assert!(!state.decide(Value::One));
        assert_eq!(state.k, None);
    }

    #[test]
    fn test_peer_message_keeps_unknown_fields() {
        let message: PeerMessage = serde_json::from_value(json!({
            "from": 2,
            "round": 1,
            "x": "?",
            "signature": "abc"
        }))
        .unwrap();

        assert_eq!(message.from, Some(2));
        assert_eq!(message.x, Some(Value::Undecided));
        assert_eq!(message.phase, None);
        assert_eq!(message.extra.get("signature"), Some(&json!("abc")));
    }
}
