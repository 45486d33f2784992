//! Messages exchanged between paired devices.
//!
//! Request: `{ "contributionDays": [bool] }`.
//! Reply: `{ "Response": string }` on success, `{ "Error": string }` when the
//! request was not understood.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::day_flags::DayFlags;
use crate::error::{PicoCalError, PicoCalResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeerRequest {
    ContributionDays(DayFlags),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PeerReply {
    Response(String),
    Error(String),
}

pub const REPLY_RECEIVED: &str = "Data received";
pub const REPLY_UNRECOGNIZED: &str = "Data format not recognized";

impl PeerRequest {
    /// Validate a raw payload. Anything other than exactly one `contributionDays`
    /// array of booleans is malformed.
    pub fn decode(payload: &Value) -> PicoCalResult<Self> {
        serde_json::from_value(payload.clone())
            .map_err(|e| PicoCalError::MalformedPeerMessage(e.to_string()))
    }

    pub fn encode(&self) -> PicoCalResult<Value> {
        serde_json::to_value(self).map_err(|e| PicoCalError::Serialization(e.to_string()))
    }
}

impl PeerReply {
    pub fn decode(payload: &Value) -> PicoCalResult<Self> {
        serde_json::from_value(payload.clone())
            .map_err(|e| PicoCalError::MalformedPeerMessage(format!("bad reply: {e}")))
    }

    pub fn encode(&self) -> Value {
        match self {
            PeerReply::Response(msg) => serde_json::json!({ "Response": msg }),
            PeerReply::Error(msg) => serde_json::json!({ "Error": msg }),
        }
    }
}
