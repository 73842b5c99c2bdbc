//! HCS-10 message envelopes
//!
//! Every HCS-10 message is a JSON object tagged with `"p": "hcs-10"` and an
//! `op` field. Parsing maps each payload deterministically onto an
//! [`Operation`]; nothing here fails.

use serde::{Deserialize, Serialize};

use crate::feed::{ConnectionRequest, OperatorId, Operation};
use crate::ids::{AccountId, TopicId};

/// Protocol tag carried in `p`
pub const PROTOCOL: &str = "hcs-10";

pub const OP_CONNECTION_REQUEST: &str = "connection_request";
pub const OP_CONNECTION_CREATED: &str = "connection_created";
pub const OP_MESSAGE: &str = "message";

/// Wire envelope of an HCS-10 message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hcs10Message {
    pub p: String,
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_topic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m: Option<String>,
}

impl Hcs10Message {
    fn envelope(op: &str) -> Self {
        Self {
            p: PROTOCOL.to_string(),
            op: op.to_string(),
            operator_id: None,
            connection_topic_id: None,
            connected_account_id: None,
            connection_id: None,
            data: None,
            m: None,
        }
    }

    /// `connection_request` sent to another agent's inbound topic
    pub fn connection_request(requester: &OperatorId, memo: Option<&str>) -> Self {
        Self {
            operator_id: Some(requester.to_string()),
            m: memo.map(str::to_string),
            ..Self::envelope(OP_CONNECTION_REQUEST)
        }
    }

    /// `connection_created` confirming request `request_id`
    pub fn connection_created(
        request_id: u64,
        connection_topic: &TopicId,
        connected_account: &AccountId,
        operator: &OperatorId,
    ) -> Self {
        Self {
            operator_id: Some(operator.to_string()),
            connection_topic_id: Some(connection_topic.to_string()),
            connected_account_id: Some(connected_account.to_string()),
            connection_id: Some(serde_json::Value::from(request_id)),
            m: Some("Connection established".to_string()),
            ..Self::envelope(OP_CONNECTION_CREATED)
        }
    }

    /// Plain `message` posted on a connection topic
    pub fn message(operator: &OperatorId, data: impl Into<String>) -> Self {
        Self {
            operator_id: Some(operator.to_string()),
            data: Some(data.into()),
            ..Self::envelope(OP_MESSAGE)
        }
    }

    /// Serialize to the JSON payload published on the topic
    pub fn to_payload(&self) -> String {
        // A struct of strings and a JSON value always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Parse a raw payload into an operation
pub fn parse_operation(payload: &str) -> Operation {
    let message: Hcs10Message = match serde_json::from_str(payload) {
        Ok(message) => message,
        Err(e) => {
            return Operation::Unrecognized {
                reason: format!("not an HCS-10 envelope: {}", e),
            };
        }
    };

    if message.p != PROTOCOL {
        return Operation::Unrecognized {
            reason: format!("unsupported protocol '{}'", message.p),
        };
    }

    match message.op.as_str() {
        OP_CONNECTION_REQUEST => parse_request(message),
        OP_CONNECTION_CREATED => parse_confirmation(message),
        _ => Operation::Other { op: message.op },
    }
}

fn parse_request(message: Hcs10Message) -> Operation {
    let malformed = |reason: String| Operation::Malformed {
        op: OP_CONNECTION_REQUEST.to_string(),
        reason,
    };

    let Some(raw) = message.operator_id.as_deref() else {
        return malformed("missing operator_id".to_string());
    };

    match raw.parse::<OperatorId>() {
        Ok(requester) => Operation::Request(ConnectionRequest {
            requester,
            memo: message.m,
        }),
        Err(e) => malformed(e.to_string()),
    }
}

fn parse_confirmation(message: Hcs10Message) -> Operation {
    let malformed = |reason: String| Operation::Malformed {
        op: OP_CONNECTION_CREATED.to_string(),
        reason,
    };

    let request_id = match message.connection_id.as_ref().map(connection_id) {
        Some(Some(id)) => id,
        Some(None) => return malformed("connection_id is not an unsigned integer".to_string()),
        None => return malformed("missing connection_id".to_string()),
    };

    let connection_topic_id = match message.connection_topic_id.as_deref() {
        Some(raw) => match raw.parse::<TopicId>() {
            Ok(topic) => Some(topic),
            Err(e) => return malformed(e.to_string()),
        },
        None => None,
    };

    Operation::Confirmation {
        request_id,
        connection_topic_id,
    }
}

// Some publishers encode the id as a string.
fn connection_id(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
